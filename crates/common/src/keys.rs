//! Cache key namespace.
//!
//! Keys are hierarchical `resource:subresource:id` strings shared with every
//! collaborator reading the same store (mobile widgets included), so the
//! exact formats here are an interop contract, not a style choice.

/// Live position for a train, derived from telemetry by the position poller.
pub fn train_position(train_number: &str) -> String {
    format!("train:position:{}", train_number)
}

/// Static train facts (name, schedule, amenities).
pub fn train_info(train_number: &str) -> String {
    format!("train:info:{}", train_number)
}

/// Ordered route stops for a train.
pub fn train_route(train_number: &str) -> String {
    format!("train:route:{}", train_number)
}

/// Coach composition for a train.
pub fn train_coaches(train_number: &str) -> String {
    format!("train:coaches:{}", train_number)
}

/// Static station facts.
pub fn station_info(code: &str) -> String {
    format!("station:info:{}", code.to_uppercase())
}

/// Latest known PNR booking status.
pub fn pnr_status(pnr: &str) -> String {
    format!("pnr:status:{}", pnr)
}

/// Journey widget snapshot.
pub fn widget_journey(journey_id: &str) -> String {
    format!("widget:journey:{}", journey_id)
}

/// PNR widget snapshot.
pub fn widget_pnr(pnr: &str) -> String {
    format!("widget:pnr:{}", pnr)
}
