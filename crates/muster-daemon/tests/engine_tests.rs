//! End-to-end reconciliation passes against an in-memory store and
//! scripted probes.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use muster_core::config::Config;
use muster_core::keys;
use muster_core::schema::{
    CheckConclusion, Checks, GitInfo, Instance, Mergeability, ReviewState, ReviewStatus,
    SessionStatus, StoreEvent, TelemetryStatus,
};
use muster_daemon::assistant::LifecycleKind;
use muster_daemon::discovery::WorkspaceDiscovery;
use muster_daemon::error::ProbeError;
use muster_daemon::probes::{AssistantProcess, Probes, ProxyRoute, RateLimits};
use muster_daemon::registry::Engine;
use muster_daemon::store::{CoordStore, MemoryStore};

#[derive(Default)]
struct ProbeState {
    git: HashMap<String, GitInfo>,
    vanished: HashSet<String>,
    reviews: HashMap<String, ReviewStatus>,
    remaining: u64,
    tmux_sessions: HashSet<String>,
    routes: Vec<ProxyRoute>,
    processes: Vec<AssistantProcess>,
}

struct MockProbes {
    state: Mutex<ProbeState>,
    review_calls: AtomicUsize,
}

impl MockProbes {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ProbeState {
                remaining: 5000,
                ..ProbeState::default()
            }),
            review_calls: AtomicUsize::new(0),
        })
    }

    fn set_git(&self, path: &str, branch: &str) {
        self.state.lock().unwrap().git.insert(
            path.to_string(),
            GitInfo {
                branch: branch.to_string(),
                upstream: Some(format!("origin/{branch}")),
                ahead: 0,
                behind: 0,
                modified: 1,
                staged: 0,
                untracked: 0,
                dirty: true,
            },
        );
    }

    fn set_review(&self, branch: &str, passing: u32, failing: u32, pending: u32) {
        self.state.lock().unwrap().reviews.insert(
            branch.to_string(),
            ReviewStatus {
                number: 42,
                title: "Add the feature".to_string(),
                url: "https://example.com/pr/42".to_string(),
                state: ReviewState::Open,
                mergeable: Some(Mergeability::Mergeable),
                checks: Some(Checks::from_counts(passing, failing, pending, Vec::new())),
            },
        );
    }

    fn set_remaining(&self, remaining: u64) {
        self.state.lock().unwrap().remaining = remaining;
    }

    fn mark_vanished(&self, path: &str) {
        self.state.lock().unwrap().vanished.insert(path.to_string());
    }

    fn set_processes(&self, processes: Vec<AssistantProcess>) {
        self.state.lock().unwrap().processes = processes;
    }
}

#[async_trait]
impl Probes for MockProbes {
    async fn git_status(&self, path: &Path) -> Result<Option<GitInfo>, ProbeError> {
        let key = path.to_string_lossy().into_owned();
        let state = self.state.lock().unwrap();
        if state.vanished.contains(&key) {
            return Err(ProbeError::DirectoryVanished { path: key });
        }
        Ok(state.git.get(&key).cloned())
    }

    async fn review_for_branch(
        &self,
        _path: &Path,
        branch: &str,
    ) -> Result<Option<ReviewStatus>, ProbeError> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().reviews.get(branch).cloned())
    }

    async fn rate_limit(&self) -> Result<RateLimits, ProbeError> {
        let remaining = self.state.lock().unwrap().remaining;
        Ok(RateLimits {
            core_remaining: remaining,
            core_limit: 5000,
            graphql_remaining: remaining,
            graphql_limit: 5000,
        })
    }

    async fn multiplexer_session(&self, name: &str) -> Result<bool, ProbeError> {
        Ok(self.state.lock().unwrap().tmux_sessions.contains(name))
    }

    async fn proxy_routes(&self) -> Result<Vec<ProxyRoute>, ProbeError> {
        Ok(self.state.lock().unwrap().routes.clone())
    }

    async fn delete_proxy_route(&self, _route: &ProxyRoute) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn telemetry_health(&self, _host: &str) -> Result<TelemetryStatus, ProbeError> {
        Err(ProbeError::Unavailable {
            message: "not configured".to_string(),
        })
    }

    async fn scan_assistant_processes(&self) -> Result<Vec<AssistantProcess>, ProbeError> {
        Ok(self.state.lock().unwrap().processes.clone())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    probes: Arc<MockProbes>,
    engine: Engine,
}

impl Fixture {
    fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let probes = MockProbes::new();
        let store_dyn: Arc<dyn CoordStore> = Arc::clone(&store) as Arc<dyn CoordStore>;
        let engine = Engine::new(
            Arc::new(config),
            Arc::clone(&store_dyn),
            Arc::clone(&probes) as Arc<dyn Probes>,
            Arc::new(WorkspaceDiscovery::new(store_dyn)),
        );
        Self {
            store,
            probes,
            engine,
        }
    }

    fn new() -> Self {
        Self::with_config(Config::default())
    }

    async fn enroll(&self, path: &str) {
        self.store
            .sadd(keys::WORKSPACES_SET, path)
            .await
            .unwrap();
    }

    async fn persisted(&self, path: &str) -> Option<Instance> {
        self.store
            .get(&keys::instance_key(path))
            .await
            .unwrap()
            .map(|payload| serde_json::from_str(&payload).unwrap())
    }
}

fn workdir() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_string_lossy().into_owned();
    (dir, path)
}

#[tokio::test]
async fn pending_checks_project_idle_sessions_as_checking() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;
    fx.probes.set_git(&path, "feat-x");
    fx.probes.set_review("feat-x", 4, 0, 1);

    // An assistant turn that already ended.
    fx.engine
        .tracker
        .apply_event(&path, LifecycleKind::Stopped, Some(77), None, Utc::now());

    let mut feed = fx.store.subscribe_all();
    let stats = fx.engine.run_cycle(true).await;
    assert_eq!(stats.updated, 1);
    assert!(stats.published);

    let instance = fx.engine.registry.get(&path).unwrap();
    assert!(instance.is_version_controlled);
    assert_eq!(instance.branch(), Some("feat-x"));
    let review = instance.review_status.as_ref().unwrap();
    assert_eq!(review.conclusion(), Some(CheckConclusion::Pending));

    // Published view shows checking; tracker still holds idle.
    let session = &instance.assistant_status.as_ref().unwrap().sessions[&77];
    assert_eq!(session.status, SessionStatus::Checking);
    let tracked = fx.engine.tracker.status_for(&path).unwrap();
    assert_eq!(tracked.sessions[&77].status, SessionStatus::Idle);

    // The store carries the same projection.
    let persisted = fx.persisted(&path).await.unwrap();
    let persisted_session = &persisted.assistant_status.unwrap().sessions[&77];
    assert_eq!(persisted_session.status, SessionStatus::Checking);

    // Pending checks alone never raise a notification.
    while let Ok(message) = feed.try_recv() {
        assert_ne!(message.channel, keys::channels::NOTIFY);
    }
}

#[tokio::test]
async fn settled_checks_revert_projection_and_notify() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;
    fx.probes.set_git(&path, "feat-x");
    fx.probes.set_review("feat-x", 4, 0, 1);
    fx.engine
        .tracker
        .apply_event(&path, LifecycleKind::Stopped, Some(77), None, Utc::now());
    fx.engine.run_cycle(true).await;

    let mut feed = fx.store.subscribe_all();
    fx.probes.set_review("feat-x", 5, 0, 0);
    fx.engine.run_cycle(true).await;

    let instance = fx.engine.registry.get(&path).unwrap();
    let session = &instance.assistant_status.as_ref().unwrap().sessions[&77];
    assert_eq!(session.status, SessionStatus::Idle);

    let mut kinds = Vec::new();
    while let Ok(message) = feed.try_recv() {
        if message.channel == keys::channels::NOTIFY
            && let Ok(StoreEvent::Notification { kind, path: event_path, .. }) =
                serde_json::from_str::<StoreEvent>(&message.payload)
        {
            assert_eq!(event_path, path);
            kinds.push(kind);
        }
    }
    assert_eq!(kinds, vec!["checksPassed".to_string()]);
}

#[tokio::test]
async fn unmanaged_directory_publishes_without_git() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;

    let stats = fx.engine.run_cycle(true).await;
    assert_eq!(stats.updated, 1);

    let persisted = fx.persisted(&path).await.unwrap();
    assert!(!persisted.is_version_controlled);
    assert!(persisted.git_info.is_none());
    assert!(persisted.review_status.is_none());
}

#[tokio::test]
async fn dropped_workspace_is_removed_and_cleaned_up() {
    let (_dir_a, path_a) = workdir();
    let (_dir_b, path_b) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path_a).await;
    fx.enroll(&path_b).await;
    fx.engine.run_cycle(true).await;
    assert_eq!(fx.engine.registry.len(), 2);

    fx.store
        .srem(keys::WORKSPACES_SET, &path_b)
        .await
        .unwrap();
    let stats = fx.engine.run_cycle(true).await;
    assert_eq!(stats.removed, 1);
    assert_eq!(fx.engine.registry.len(), 1);
    assert!(fx.persisted(&path_b).await.is_none());

    let members = fx.store.smembers(keys::INSTANCES_SET).await.unwrap();
    assert_eq!(members, vec![path_a.clone()]);
}

#[tokio::test]
async fn vanished_directory_is_removed_mid_cycle() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;
    fx.engine.run_cycle(true).await;
    assert!(fx.engine.registry.contains(&path));

    fx.probes.mark_vanished(&path);
    let stats = fx.engine.run_cycle(true).await;
    assert_eq!(stats.removed, 1);
    assert!(!fx.engine.registry.contains(&path));
    assert!(fx.persisted(&path).await.is_none());
}

#[tokio::test]
async fn critical_quota_pauses_review_polling_only() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;
    fx.probes.set_git(&path, "feat-x");
    fx.probes.set_review("feat-x", 3, 0, 0);
    fx.probes.set_remaining(10);

    fx.engine.run_cycle(true).await;

    assert_eq!(fx.probes.review_calls.load(Ordering::SeqCst), 0);
    let instance = fx.engine.registry.get(&path).unwrap();
    // Everything else still flows.
    assert_eq!(instance.branch(), Some("feat-x"));
    assert!(instance.review_status.is_none());
}

#[tokio::test]
async fn review_cadence_skips_fresh_fetches_and_carries_forward() {
    let (_dir, path) = workdir();
    let mut config = Config::default();
    config.polling.stale_after_secs = 0;
    let mut fx = Fixture::with_config(config);
    fx.enroll(&path).await;
    fx.probes.set_git(&path, "feat-x");
    fx.probes.set_review("feat-x", 3, 0, 0);

    fx.engine.run_cycle(false).await;
    assert_eq!(fx.probes.review_calls.load(Ordering::SeqCst), 1);

    // Second pass is inside the normal-tier cadence; the previous
    // review status must survive the skipped fetch.
    fx.engine.run_cycle(false).await;
    assert_eq!(fx.probes.review_calls.load(Ordering::SeqCst), 1);
    let instance = fx.engine.registry.get(&path).unwrap();
    assert_eq!(
        instance.review_status.as_ref().map(|r| r.number),
        Some(42)
    );
}

#[tokio::test]
async fn fresh_instances_are_skipped_until_stale() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;

    let first = fx.engine.run_cycle(false).await;
    assert_eq!(first.updated, 1);

    let second = fx.engine.run_cycle(false).await;
    assert_eq!(second.updated, 0);
    assert_eq!(second.skipped, 1);
}

#[tokio::test]
async fn process_scan_registers_idle_sessions() {
    let (_dir, path) = workdir();
    let mut fx = Fixture::new();
    fx.enroll(&path).await;
    fx.engine.run_cycle(true).await;

    fx.probes.set_processes(vec![AssistantProcess {
        pid: 501,
        cwd: std::path::PathBuf::from(&path),
        host_pid: Some(77),
    }]);
    fx.engine.run_process_scan().await;

    let tracked = fx.engine.tracker.status_for(&path).unwrap();
    assert_eq!(tracked.sessions[&501].status, SessionStatus::Idle);
    let instance = fx.engine.registry.get(&path).unwrap();
    assert!(instance.assistant_status.is_some());
}

#[tokio::test]
async fn restore_readmits_persisted_instances() {
    let (_dir, path) = workdir();
    let fx = Fixture::new();

    // A previous run left a snapshot behind but no workspace set entry.
    let instance = Instance::discovered(&path, Utc::now());
    fx.store
        .set_ex(
            &keys::instance_key(&path),
            &serde_json::to_string(&instance).unwrap(),
            keys::INSTANCE_TTL_SECS,
        )
        .await
        .unwrap();
    fx.store.sadd(keys::INSTANCES_SET, &path).await.unwrap();

    let mut fx = fx;
    fx.engine.restore_from_store().await.unwrap();
    fx.engine.run_cycle(true).await;
    assert!(fx.engine.registry.contains(&path));
}
