//! Telemetry-stream health probe.
//!
//! The telemetry collector exposes a per-host health endpoint reporting
//! whether the instance's event stream is connected and how many events it
//! has delivered. The check runs only when both a proxy route and a branch
//! are known for the instance.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use muster_core::schema::TelemetryStatus;

use crate::error::ProbeError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Query stream health for a proxy host. `template` contains a `{host}`
/// placeholder, e.g. `http://127.0.0.1:4318/streams/{host}/health`.
pub async fn health(template: &str, host: &str) -> Result<TelemetryStatus, ProbeError> {
    let url = template.replace("{host}", host);
    tokio::task::spawn_blocking(move || {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .map_err(|e| ProbeError::Unavailable {
                message: format!("telemetry endpoint unreachable: {e}"),
            })?;

        // 404 means no stream was ever opened for this host.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(TelemetryStatus {
                connected: false,
                events_received: 0,
                last_event_at: None,
            });
        }
        if !response.status().is_success() {
            return Err(ProbeError::command(format!(
                "telemetry health returned {}",
                response.status()
            )));
        }

        let health: StreamHealth = response
            .json()
            .map_err(|e| ProbeError::parse_with("telemetry health JSON", e))?;
        Ok(TelemetryStatus {
            connected: health.connected,
            events_received: health.events_received,
            last_event_at: health.last_event_at,
        })
    })
    .await
    .map_err(|e| ProbeError::command_with("telemetry task join error", e))?
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamHealth {
    connected: bool,
    #[serde(default)]
    events_received: u64,
    #[serde(default)]
    last_event_at: Option<DateTime<Utc>>,
}
