//! The instance registry and its reconciliation engine.
//!
//! `Registry` is a map from workspace path to its [`Instance`] record;
//! map semantics make "at most one record per path" structural. The
//! [`Engine`] drives one reconciliation pass: discover paths, admit new
//! ones (restoring persisted records where possible), drop vanished
//! ones with side-effect cleanup, enrich the survivors in parallel, and
//! fold the results back in before publishing a snapshot.
//!
//! Enrichment is two-phase. The probe phase runs one future per stale
//! instance (git, then review when the quota governor allows, then
//! multiplexer and telemetry) with no shared state; the apply phase
//! folds outcomes into the registry serially, so tracker updates,
//! transition detection, and projection all happen single-threaded.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, trace, warn};

use muster_core::config::Config;
use muster_core::keys;
use muster_core::schema::{Instance, MultiplexerStatus, SessionStatus, StoreEvent};

use crate::assistant::SessionTracker;
use crate::discovery::{self, Discovery};
use crate::error::ProbeError;
use crate::governor::RateLimitGovernor;
use crate::probes::proxy::{host_for_instance, route_for_instance};
use crate::probes::Probes;
use crate::publisher::SnapshotPublisher;
use crate::review_monitor::ReviewMonitor;
use crate::store::CoordStore;

/// All known instances, keyed by workspace path.
#[derive(Debug, Default)]
pub struct Registry {
    instances: BTreeMap<String, Instance>,
}

impl Registry {
    pub fn contains(&self, path: &str) -> bool {
        self.instances.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&Instance> {
        self.instances.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Instance> {
        self.instances.get_mut(path)
    }

    pub fn insert(&mut self, instance: Instance) {
        self.instances.insert(instance.path.clone(), instance);
    }

    pub fn remove(&mut self, path: &str) -> Option<Instance> {
        self.instances.remove(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    pub fn instances(&self) -> &BTreeMap<String, Instance> {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
    pub published: bool,
}

/// Result of enriching a single instance.
enum EnrichResult {
    Updated(Box<EnrichData>),
    Vanished,
}

struct EnrichOutcome {
    path: String,
    result: EnrichResult,
}

/// Fresh probe data for one instance. `git_fresh` distinguishes "the
/// git probe answered" from "the probe failed this cycle"; only a
/// fresh answer may flip the version-controlled flag.
struct EnrichData {
    git: Option<muster_core::schema::GitInfo>,
    git_fresh: bool,
    review: ReviewFetch,
    multiplexer: Option<MultiplexerStatus>,
    proxy_host: Option<String>,
    telemetry: Option<muster_core::schema::TelemetryStatus>,
}

/// Whether the review probe actually ran this cycle. `Skipped` carries
/// the previous review status forward untouched.
enum ReviewFetch {
    Fetched(Option<muster_core::schema::ReviewStatus>),
    Skipped,
}

/// The reconciliation engine: registry plus every collaborator one
/// pass needs.
pub struct Engine {
    config: Arc<Config>,
    store: Arc<dyn CoordStore>,
    probes: Arc<dyn Probes>,
    discovery: Arc<dyn Discovery>,
    pub registry: Registry,
    pub tracker: SessionTracker,
    monitor: ReviewMonitor,
    pub governor: RateLimitGovernor,
    publisher: SnapshotPublisher,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn CoordStore>,
        probes: Arc<dyn Probes>,
        discovery: Arc<dyn Discovery>,
    ) -> Self {
        let publisher = SnapshotPublisher::new(std::time::Duration::from_secs(
            config.polling.min_publish_interval_secs,
        ));
        Self {
            tracker: SessionTracker::new(config.assistant.clone()),
            governor: RateLimitGovernor::new(config.review.clone()),
            monitor: ReviewMonitor::new(),
            publisher,
            registry: Registry::default(),
            config,
            store,
            probes,
            discovery,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CoordStore> {
        &self.store
    }

    /// Seed the workspace set from the last persisted snapshot so the
    /// first pass after a restart readmits everything that was known.
    pub async fn restore_from_store(&mut self) -> Result<(), crate::error::StoreError> {
        let persisted = self.store.smembers(keys::INSTANCES_SET).await?;
        for path in &persisted {
            self.store.sadd(keys::WORKSPACES_SET, path).await?;
        }
        if !persisted.is_empty() {
            info!(count = persisted.len(), "restored workspace set from previous run");
        }
        Ok(())
    }

    /// One full reconciliation pass. `force` bypasses the staleness
    /// gate and the review-cadence gate (quota pause still wins).
    pub async fn run_cycle(&mut self, force: bool) -> CycleStats {
        let started = std::time::Instant::now();
        let mut stats = CycleStats::default();
        let now = Utc::now();

        let discovered = match self.discovery.discover().await {
            Ok(paths) => paths
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
            Err(err) => {
                warn!(error = %err, "workspace discovery failed, keeping previous registry");
                return stats;
            }
        };
        let discovered_set: HashSet<&str> = discovered.iter().map(String::as_str).collect();

        // Drop registry entries discovery no longer reports.
        for path in self.registry.paths() {
            if !discovered_set.contains(path.as_str()) {
                self.remove_instance(&path).await;
                stats.removed += 1;
            }
        }

        // Admit new paths, restoring persisted records where possible.
        // Admissions always enrich this pass regardless of the staleness
        // gate, so a fresh discovery is never published empty.
        let mut admitted: HashSet<String> = HashSet::new();
        for path in &discovered {
            if !self.registry.contains(path) {
                let instance = self.restore_or_new(path, now).await;
                self.registry.insert(instance);
                admitted.insert(path.clone());
            }
        }

        self.governor.maybe_refresh(self.probes.as_ref(), force).await;

        // Timeout sweep runs every pass, whether or not enrichment does.
        let mut swept: HashSet<String> = HashSet::new();
        for path in self.registry.paths() {
            if self.tracker.sweep(&path, now) {
                swept.insert(path);
            }
        }
        let registered: HashSet<String> = self.registry.paths().into_iter().collect();
        self.tracker.prune_untracked(&registered, now);

        // One route-table fetch per pass, shared by every instance.
        let routes = match self.probes.proxy_routes().await {
            Ok(routes) => routes,
            Err(err) => {
                debug!(error = %err, "proxy route probe failed");
                Vec::new()
            }
        };

        let stale_after = chrono::Duration::seconds(self.config.polling.stale_after_secs as i64);
        let mut plan = Vec::new();
        for path in &discovered {
            let Some(instance) = self.registry.get(path) else {
                continue;
            };
            if !force
                && !admitted.contains(path)
                && now.signed_duration_since(instance.last_updated) < stale_after
            {
                stats.skipped += 1;
                continue;
            }
            let refresh_review =
                self.governor
                    .should_refresh(instance.review_last_updated, force, now);
            let proxy_host = host_for_instance(&routes, &instance.name);
            plan.push(enrich_one(
                Arc::clone(&self.probes),
                path.clone(),
                instance.name.clone(),
                refresh_review,
                proxy_host,
            ));
        }

        for outcome in join_all(plan).await {
            match outcome.result {
                EnrichResult::Vanished => {
                    self.remove_instance(&outcome.path).await;
                    stats.removed += 1;
                }
                EnrichResult::Updated(data) => {
                    self.apply(&outcome.path, *data, now).await;
                    swept.remove(&outcome.path);
                    stats.updated += 1;
                }
            }
        }

        // Sweep-only changes on instances that skipped enrichment still
        // need their published projection refreshed.
        for path in swept {
            self.refresh_assistant_projection(&path);
        }

        match self.publisher.publish(&self.store, self.registry.instances()).await {
            Ok(published) => stats.published = published,
            Err(err) => warn!(error = %err, "snapshot publish failed"),
        }

        debug!(
            updated = stats.updated,
            skipped = stats.skipped,
            removed = stats.removed,
            published = stats.published,
            "reconciliation pass complete"
        );
        trace!(elapsed_ms = started.elapsed().as_millis() as u64, "cycle timing");
        stats
    }

    /// Fold assistant lifecycle state into the published record and
    /// write the snapshot out. Used by the event path, which must not
    /// wait for the next poll.
    pub async fn publish_now(&mut self) {
        if let Err(err) = self
            .publisher
            .publish(&self.store, self.registry.instances())
            .await
        {
            warn!(error = %err, "snapshot publish failed");
        }
    }

    /// Re-derive one instance's published assistant status from the
    /// tracker, applying the checks-pending projection.
    pub fn refresh_assistant_projection(&mut self, path: &str) {
        let status = self.tracker.status_for(path).cloned();
        let Some(instance) = self.registry.get_mut(path) else {
            return;
        };
        let conclusion = instance.review_status.as_ref().and_then(|r| r.conclusion());
        instance.assistant_status = status.map(|s| s.projected(conclusion));
    }

    /// Run the assistant process-table scan and refresh projections.
    pub async fn run_process_scan(&mut self) {
        let processes = match self.probes.scan_assistant_processes().await {
            Ok(processes) => processes,
            Err(err) => {
                warn!(error = %err, "assistant process scan failed");
                return;
            }
        };
        let paths = self.registry.paths();
        self.tracker.apply_scan(&paths, &processes, Utc::now());
        for path in paths {
            self.refresh_assistant_projection(&path);
        }
    }

    /// Run the external enumeration command, feeding its results into
    /// the shared workspace set for the next discovery pass.
    pub async fn run_enumeration(&mut self) {
        let Some(command) = self.config.discovery.command.clone() else {
            return;
        };
        match discovery::enumerate_external(&command).await {
            Ok(paths) => {
                for path in paths {
                    let path = path.to_string_lossy().into_owned();
                    if let Err(err) = self.store.sadd(keys::WORKSPACES_SET, &path).await {
                        warn!(error = %err, "failed to record enumerated workspace");
                    }
                }
            }
            Err(err) => warn!(error = %err, "workspace enumeration failed"),
        }
    }

    async fn restore_or_new(&mut self, path: &str, now: DateTime<Utc>) -> Instance {
        match self.store.get(&keys::instance_key(path)).await {
            Ok(Some(payload)) => match serde_json::from_str::<Instance>(&payload) {
                Ok(instance) => {
                    if let Some(mut status) = instance.assistant_status.clone() {
                        // The persisted record may carry the display-only
                        // checking state; the tracker stores real states.
                        for session in status.sessions.values_mut() {
                            if session.status == SessionStatus::Checking {
                                session.status = SessionStatus::Idle;
                            }
                        }
                        self.tracker.restore(path, status);
                    }
                    debug!(path, "restored instance record");
                    return instance;
                }
                Err(err) => warn!(path, error = %err, "discarding unreadable instance record"),
            },
            Ok(None) => {}
            Err(err) => warn!(path, error = %err, "failed to read persisted instance record"),
        }
        info!(path, "discovered new instance");
        Instance::discovered(path, now)
    }

    async fn apply(&mut self, path: &str, data: EnrichData, now: DateTime<Utc>) {
        let Some(instance) = self.registry.get_mut(path) else {
            return;
        };

        if data.git_fresh {
            instance.is_version_controlled = data.git.is_some();
            instance.git_info = data.git;
        } else {
            // Probe failed; publish nothing rather than stale data.
            instance.git_info = None;
        }

        let mut notifications = Vec::new();
        if let ReviewFetch::Fetched(review) = data.review {
            let transitions = self.monitor.observe(path, review.as_ref());
            if let Some(review) = &review {
                for transition in transitions {
                    notifications.push(transition.to_event(path, &instance.name, review));
                }
            }
            instance.review_status = review;
            instance.review_last_updated = Some(now);
        }

        instance.multiplexer_status = data.multiplexer;
        instance.proxy_host = data.proxy_host;
        instance.telemetry_status = data.telemetry;
        instance.last_updated = now;

        self.refresh_assistant_projection(path);

        for event in notifications {
            self.publish_event(keys::channels::NOTIFY, &event).await;
        }
    }

    pub async fn publish_event(&self, channel: &str, event: &StoreEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                if let Err(err) = self.store.publish(channel, &payload).await {
                    warn!(channel, error = %err, "failed to publish event");
                }
            }
            Err(err) => warn!(channel, error = %err, "failed to encode event"),
        }
    }

    async fn remove_instance(&mut self, path: &str) {
        let instance = self.registry.remove(path);
        self.tracker.remove(path);
        self.monitor.forget(path);

        if let Err(err) = self.store.del(&keys::instance_key(path)).await {
            warn!(path, error = %err, "failed to delete instance record");
        }
        if let Err(err) = self.store.srem(keys::INSTANCES_SET, path).await {
            warn!(path, error = %err, "failed to prune instance set");
        }
        if let Err(err) = self.store.srem(keys::WORKSPACES_SET, path).await {
            warn!(path, error = %err, "failed to prune workspace set");
        }

        // Route cleanup is best-effort: a dangling route only wastes a
        // hostname until the proxy is reconfigured.
        if let Some(instance) = instance
            && instance.proxy_host.is_some()
        {
            match self.probes.proxy_routes().await {
                Ok(routes) => {
                    if let Some(route) = route_for_instance(&routes, &instance.name)
                        && let Err(err) = self.probes.delete_proxy_route(route).await
                    {
                        warn!(path, error = %err, "failed to delete proxy route");
                    }
                }
                Err(err) => debug!(path, error = %err, "route lookup for cleanup failed"),
            }
        }

        info!(path, "removed instance");
    }
}

async fn enrich_one(
    probes: Arc<dyn Probes>,
    path: String,
    name: String,
    refresh_review: bool,
    proxy_host: Option<String>,
) -> EnrichOutcome {
    let dir = PathBuf::from(&path);

    let (git, git_fresh) = match probes.git_status(&dir).await {
        Ok(info) => (info, true),
        Err(ProbeError::DirectoryVanished { .. }) => {
            return EnrichOutcome {
                path,
                result: EnrichResult::Vanished,
            };
        }
        Err(err) => {
            debug!(path = %path, error = %err, "git probe failed");
            (None, false)
        }
    };

    let review = if !refresh_review {
        ReviewFetch::Skipped
    } else if let Some(info) = &git {
        match probes.review_for_branch(&dir, &info.branch).await {
            Ok(review) => ReviewFetch::Fetched(review),
            Err(err) => {
                debug!(path = %path, error = %err, "review probe failed");
                ReviewFetch::Skipped
            }
        }
    } else if git_fresh {
        // Known to be outside version control, so no PR can exist.
        ReviewFetch::Fetched(None)
    } else {
        ReviewFetch::Skipped
    };

    let multiplexer = match probes.multiplexer_session(&name).await {
        Ok(exists) => Some(MultiplexerStatus {
            session_name: name.clone(),
            exists,
        }),
        Err(err) => {
            debug!(path = %path, error = %err, "multiplexer probe failed");
            None
        }
    };

    // Telemetry streams are keyed by proxy host and branch; without
    // both there is nothing to check.
    let telemetry = match proxy_host.as_ref().filter(|_| git.is_some()) {
        Some(host) => match probes.telemetry_health(host).await {
            Ok(status) => Some(status),
            Err(ProbeError::Unavailable { .. }) => None,
            Err(err) => {
                debug!(path = %path, error = %err, "telemetry probe failed");
                None
            }
        },
        None => None,
    };

    EnrichOutcome {
        path,
        result: EnrichResult::Updated(Box::new(EnrichData {
            git,
            git_fresh,
            review,
            multiplexer,
            proxy_host,
            telemetry,
        })),
    }
}
