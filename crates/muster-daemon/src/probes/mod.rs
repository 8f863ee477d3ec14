//! External probe adapters.
//!
//! Each probe is a thin request/response wrapper around an external
//! collaborator: the `git` and `gh` CLIs, `tmux`, the reverse-proxy admin
//! API, the telemetry health endpoint, and the OS process table. The engine
//! reaches them only through the [`Probes`] trait so tests can substitute a
//! mock set.

pub mod git;
pub mod process;
pub mod proxy;
pub mod review;
pub mod telemetry;
pub mod tmux;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use muster_core::config::Config;
use muster_core::schema::{GitInfo, ReviewStatus, TelemetryStatus};

use crate::error::ProbeError;
pub use process::{AssistantProcess, pid_alive};
pub use proxy::ProxyRoute;
pub use review::RateLimits;

/// The full probe surface the engine depends on.
#[async_trait]
pub trait Probes: Send + Sync {
    /// Version-control status. `Ok(None)` means the directory is not a git
    /// repository; a vanished directory is `Err(ProbeError::DirectoryVanished)`.
    async fn git_status(&self, path: &Path) -> Result<Option<GitInfo>, ProbeError>;

    /// Current PR plus check rollup for a branch. `Ok(None)` means no PR.
    async fn review_for_branch(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<Option<ReviewStatus>, ProbeError>;

    /// Remaining quota for the review API's sub-APIs.
    async fn rate_limit(&self) -> Result<RateLimits, ProbeError>;

    /// Whether a multiplexer session with this name exists.
    async fn multiplexer_session(&self, name: &str) -> Result<bool, ProbeError>;

    /// Current reverse-proxy route table.
    async fn proxy_routes(&self) -> Result<Vec<ProxyRoute>, ProbeError>;

    /// Remove one route.
    async fn delete_proxy_route(&self, route: &ProxyRoute) -> Result<(), ProbeError>;

    /// Telemetry-stream health for a proxy host.
    async fn telemetry_health(&self, host: &str) -> Result<TelemetryStatus, ProbeError>;

    /// Running assistant processes with their working directories.
    async fn scan_assistant_processes(&self) -> Result<Vec<AssistantProcess>, ProbeError>;
}

/// Production probes shelling out to the real collaborators.
pub struct LiveProbes {
    config: Arc<Config>,
}

impl LiveProbes {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Probes for LiveProbes {
    async fn git_status(&self, path: &Path) -> Result<Option<GitInfo>, ProbeError> {
        git::status(path).await
    }

    async fn review_for_branch(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<Option<ReviewStatus>, ProbeError> {
        review::review_for_branch(path, branch).await
    }

    async fn rate_limit(&self) -> Result<RateLimits, ProbeError> {
        review::rate_limit().await
    }

    async fn multiplexer_session(&self, name: &str) -> Result<bool, ProbeError> {
        tmux::has_session(name).await
    }

    async fn proxy_routes(&self) -> Result<Vec<ProxyRoute>, ProbeError> {
        match &self.config.proxy.admin_url {
            Some(url) => proxy::routes(url).await,
            None => Ok(Vec::new()),
        }
    }

    async fn delete_proxy_route(&self, route: &ProxyRoute) -> Result<(), ProbeError> {
        match &self.config.proxy.admin_url {
            Some(url) => proxy::delete_route(url, route).await,
            None => Ok(()),
        }
    }

    async fn telemetry_health(&self, host: &str) -> Result<TelemetryStatus, ProbeError> {
        match &self.config.telemetry.health_url_template {
            Some(template) => telemetry::health(template, host).await,
            None => Err(ProbeError::Unavailable {
                message: "telemetry health endpoint not configured".to_string(),
            }),
        }
    }

    async fn scan_assistant_processes(&self) -> Result<Vec<AssistantProcess>, ProbeError> {
        let name = self.config.assistant.process_name.clone();
        tokio::task::spawn_blocking(move || process::scan_by_name(&name))
            .await
            .map_err(|e| ProbeError::command_with("process scan task join error", e))?
    }
}

/// Directory-exists check shared by discovery and enrichment.
pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}
