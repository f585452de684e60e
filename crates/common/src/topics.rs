//! Pub/sub topic namespace.
//!
//! One topic per logical resource stream. Only the corresponding poll job
//! publishes to a given topic, which is what gives subscribers per-topic
//! publish ordering.

/// Live position updates for a single train.
pub fn train_live(train_number: &str) -> String {
    format!("train:live:{}", train_number)
}

/// Live board updates for a single station.
pub fn station_live(code: &str) -> String {
    format!("station:live:{}", code.to_uppercase())
}

/// Status-change updates for a single PNR.
pub fn pnr_update(pnr: &str) -> String {
    format!("pnr:update:{}", pnr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_formats_are_stable() {
        assert_eq!(train_live("12952"), "train:live:12952");
        assert_eq!(station_live("ndls"), "station:live:NDLS");
        assert_eq!(pnr_update("8642317590"), "pnr:update:8642317590");
    }
}
