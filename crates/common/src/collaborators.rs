//! Collaborator seams consumed by the distribution core.
//!
//! Relational persistence, search indexing, and push delivery are external
//! systems; the core only sees these traits. The in-memory implementations
//! here back tests and local runs.

use crate::types::{NotificationMessage, RouteStop, SearchResult, StationInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

/// Read-only access to static train/station/route facts.
#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Ordered stops for a train, or `None` for an unknown train number.
    async fn train_route(&self, train_number: &str) -> Option<Vec<RouteStop>>;

    /// Station facts, or `None` for an unknown code.
    async fn station(&self, code: &str) -> Option<StationInfo>;
}

/// Full-text search collaborator.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchResult>>;

    /// Re-index static data into the search backend.
    async fn sync_data(&self) -> anyhow::Result<()>;
}

/// Push-notification delivery collaborator.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn dispatch(&self, user_id: &str, message: &NotificationMessage) -> anyhow::Result<()>;
}

/// Route repository backed by a fixed in-memory table.
#[derive(Debug, Default)]
pub struct StaticRoutes {
    trains: HashMap<String, Vec<RouteStop>>,
    stations: HashMap<String, StationInfo>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_train(mut self, train_number: &str, stops: Vec<RouteStop>) -> Self {
        self.trains.insert(train_number.to_string(), stops);
        self
    }

    pub fn with_station(mut self, station: StationInfo) -> Self {
        self.stations.insert(station.code.to_uppercase(), station);
        self
    }

    pub fn train_numbers(&self) -> Vec<String> {
        self.trains.keys().cloned().collect()
    }
}

#[async_trait]
impl RouteRepository for StaticRoutes {
    async fn train_route(&self, train_number: &str) -> Option<Vec<RouteStop>> {
        self.trains.get(train_number).cloned()
    }

    async fn station(&self, code: &str) -> Option<StationInfo> {
        self.stations.get(&code.to_uppercase()).cloned()
    }
}

/// Search collaborator that indexes nothing and finds nothing.
#[derive(Debug, Default)]
pub struct NoopSearch;

#[async_trait]
impl SearchService for NoopSearch {
    async fn search(&self, _query: &str) -> anyhow::Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }

    async fn sync_data(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notification collaborator that records deliveries in the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationService for LogNotifier {
    async fn dispatch(&self, user_id: &str, message: &NotificationMessage) -> anyhow::Result<()> {
        info!(
            user_id,
            kind = ?message.kind,
            title = %message.title,
            "notification dispatched"
        );
        Ok(())
    }
}
