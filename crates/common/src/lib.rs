//! Shared domain types and conventions for the live rail distribution core.
//!
//! This crate owns the pieces every service agrees on:
//! - the cache-key and pub/sub-topic namespaces ([`keys`], [`topics`])
//! - the snapshot and status types exchanged with streaming clients
//! - the collaborator seams consumed by the core (search, notifications,
//!   static route facts) together with in-memory implementations used for
//!   wiring and tests

pub mod collaborators;
pub mod keys;
pub mod topics;
pub mod types;

pub use collaborators::{
    LogNotifier, NoopSearch, NotificationService, RouteRepository, SearchService, StaticRoutes,
};
pub use types::{
    LivePositionSample, NotificationKind, NotificationMessage, PlatformStatus, RouteStop,
    SearchResult, StationInfo,
};
