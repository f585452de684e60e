//! HTTP event store client (Parseable-style REST API).
//!
//! Wire contract:
//! - `PUT /api/v1/logstream/{stream}` creates a stream (409 = already exists)
//! - `POST /api/v1/logstream/{stream}` with `X-P-Stream` appends records
//! - `POST /api/v1/query` runs a windowed SQL query
//! All requests use basic auth.

use crate::error::{Result, TelemetryError};
use crate::records::Stream;
use crate::store::{EventStore, Order, Query, TimeWindow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub struct HttpEventStore {
    base_url: String,
    client: reqwest::Client,
    user: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    query: String,
    start_time: &'a str,
    end_time: &'a str,
}

impl HttpEventStore {
    pub fn new(base_url: &str, user: &str, password: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    /// Liveness probe, used once at startup. Failure is reported, not fatal.
    pub async fn check_liveness(&self) -> bool {
        let url = format!("{}/api/v1/liveness", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn sql(stream: Stream, query: &Query<'_>) -> String {
        let mut sql = format!(r#"SELECT * FROM "{}""#, stream.name());
        if let Some((field, value)) = query.eq {
            // Single-quote escape; values come from path parameters.
            let value = value.replace('\'', "''");
            sql.push_str(&format!(" WHERE {} = '{}'", field, value));
        }
        sql.push_str(match query.order {
            Order::Asc => " ORDER BY timestamp ASC",
            Order::Desc => " ORDER BY timestamp DESC",
        });
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(TelemetryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl EventStore for HttpEventStore {
    async fn ingest_batch(&self, stream: Stream, records: Vec<Value>) -> Result<()> {
        let url = format!("{}/api/v1/logstream/{}", self.base_url, stream.name());
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("X-P-Stream", stream.name())
            .json(&records)
            .send()
            .await?;
        Self::expect_success(resp).await?;
        Ok(())
    }

    async fn query(
        &self,
        stream: Stream,
        query: &Query<'_>,
        window: TimeWindow,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/api/v1/query", self.base_url);
        let start = window.start.to_rfc3339();
        let end = window.end.to_rfc3339();
        let body = QueryBody {
            query: Self::sql(stream, query),
            start_time: &start,
            end_time: &end,
        };

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let resp = Self::expect_success(resp).await?;

        let result: Value = resp.json().await?;
        match result {
            Value::Array(rows) => Ok(rows),
            other => {
                debug!(stream = stream.name(), "non-array query result: {other}");
                Ok(Vec::new())
            }
        }
    }

    async fn ensure_stream(&self, stream: Stream) -> Result<()> {
        let url = format!("{}/api/v1/logstream/{}", self.base_url, stream.name());
        let resp = self
            .client
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            info!(stream = stream.name(), "created event stream");
            Ok(())
        } else if status.as_u16() == 409 {
            // Already exists.
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(TelemetryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
