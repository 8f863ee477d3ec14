//! The main select loop.
//!
//! One loop multiplexes four inputs: the adaptive poll timer (fast
//! while the user is active, slow after the idle threshold), the
//! fixed-cadence process scan, the fixed-cadence workspace
//! enumeration, and the pub/sub subscription. Everything that mutates
//! the registry happens here, on one task; probes fan out inside a
//! pass, but application is serial.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muster_core::keys;

use crate::error::DaemonError;
use crate::registry::Engine;
use crate::scheduler::ActivityState;
use crate::worktree::JobOrchestrator;

use super::events::{self, Dispatch};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

pub async fn run(
    mut engine: Engine,
    orchestrator: Arc<JobOrchestrator>,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let store = Arc::clone(engine.store());
    let subscriptions = keys::channels::daemon_subscriptions();
    let mut events = store.subscribe(&subscriptions).await?;

    let polling = engine.config().polling.clone();
    let mut activity = ActivityState::new(&polling);

    // First pass up front so consumers see state immediately, with the
    // process scan first so assistant sessions are known before publish.
    engine.run_enumeration().await;
    engine.run_process_scan().await;
    engine.run_cycle(true).await;

    let scan_period = Duration::from_secs(polling.process_scan_interval_secs);
    let mut scan = tokio::time::interval_at(Instant::now() + scan_period, scan_period);
    scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let enum_period = Duration::from_secs(polling.enumeration_interval_secs);
    let mut enumeration = tokio::time::interval_at(Instant::now() + enum_period, enum_period);
    enumeration.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut next_poll = Instant::now() + activity.dynamic_interval(std::time::Instant::now());

    info!("daemon loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("daemon loop stopping");
                break;
            }
            _ = tokio::time::sleep_until(next_poll) => {
                engine.run_cycle(false).await;
                next_poll = Instant::now() + activity.dynamic_interval(std::time::Instant::now());
            }
            _ = scan.tick() => {
                engine.run_process_scan().await;
            }
            _ = enumeration.tick() => {
                engine.run_enumeration().await;
            }
            message = events.recv() => {
                match message {
                    Some(message) => {
                        if keys::channels::is_activity_channel(&message.channel)
                            && activity.mark_activity(std::time::Instant::now())
                        {
                            // Waking from idle: poll promptly instead of
                            // waiting out the remaining idle interval.
                            next_poll = Instant::now();
                        }
                        if events::dispatch(&mut engine, &orchestrator, message).await
                            == Dispatch::ForceCycle
                        {
                            engine.run_cycle(true).await;
                            next_poll = Instant::now()
                                + activity.dynamic_interval(std::time::Instant::now());
                        }
                    }
                    None => {
                        warn!("event subscription lost, resubscribing");
                        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                        match store.subscribe(&subscriptions).await {
                            Ok(receiver) => events = receiver,
                            Err(err) => {
                                warn!(error = %err, "resubscribe failed, will retry");
                            }
                        }
                    }
                }
            }
        }
    }

    // Flush one final snapshot so consumers see the state we exit with.
    engine.publish_now().await;
    Ok(())
}
