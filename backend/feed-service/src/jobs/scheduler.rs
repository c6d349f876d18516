//! Semantic batch scheduling.
//!
//! One scheduler loop per process owns the pipeline: a 90-minute interval
//! regenerates every user, and serve-time consumption fires on-demand
//! triggers through the handle. The run is single-flight (the loop is the
//! only runner, with a reentrancy flag as a belt-and-braces guard) and a
//! 10-minute cooldown applies unless the trigger is marked priority.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::services::semantic::SemanticPipeline;

const SCHEDULE_INTERVAL: Duration = Duration::from_secs(90 * 60);
const COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// A request to regenerate candidate batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTrigger {
    /// Regenerate one user, or every tracked user when `None`.
    pub user_did: Option<String>,
    /// Priority triggers bypass the cooldown.
    pub force_priority: bool,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<BatchTrigger>,
}

impl SchedulerHandle {
    /// Serve-time consumption crossed the regeneration threshold.
    pub fn trigger_priority(&self, user_did: &str) {
        let trigger = BatchTrigger {
            user_did: Some(user_did.to_string()),
            force_priority: true,
        };
        if self.tx.send(trigger).is_err() {
            warn!("Scheduler channel closed, priority trigger dropped");
        }
    }

    pub fn trigger_all(&self) {
        if self
            .tx
            .send(BatchTrigger {
                user_did: None,
                force_priority: false,
            })
            .is_err()
        {
            warn!("Scheduler channel closed, trigger dropped");
        }
    }
}

pub fn scheduler_channel() -> (SchedulerHandle, mpsc::UnboundedReceiver<BatchTrigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SchedulerHandle { tx }, rx)
}

pub async fn run_semantic_scheduler(
    pipeline: Arc<SemanticPipeline>,
    users: Vec<String>,
    mut rx: mpsc::UnboundedReceiver<BatchTrigger>,
) {
    let running = AtomicBool::new(false);
    let mut last_run: Option<Instant> = None;
    let mut interval = tokio::time::interval(SCHEDULE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        users = users.len(),
        interval_secs = SCHEDULE_INTERVAL.as_secs(),
        "Semantic scheduler started"
    );

    loop {
        let trigger = tokio::select! {
            _ = interval.tick() => BatchTrigger { user_did: None, force_priority: false },
            received = rx.recv() => match received {
                Some(trigger) => trigger,
                None => {
                    info!("Scheduler channel closed, stopping");
                    return;
                }
            },
        };

        if !trigger.force_priority {
            if let Some(last) = last_run {
                if last.elapsed() < COOLDOWN {
                    debug!("Semantic batch inside cooldown, skipping");
                    continue;
                }
            }
        }
        if running.swap(true, Ordering::SeqCst) {
            debug!("Semantic batch already running, skipping");
            continue;
        }

        match &trigger.user_did {
            Some(user) => pipeline.run_for_all(std::slice::from_ref(user)).await,
            None => pipeline.run_for_all(&users).await,
        }

        running.store(false, Ordering::SeqCst);
        last_run = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_trigger_carries_user_and_flag() {
        let (handle, mut rx) = scheduler_channel();
        handle.trigger_priority("did:plc:u");
        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.user_did.as_deref(), Some("did:plc:u"));
        assert!(trigger.force_priority);
    }

    #[test]
    fn trigger_all_targets_everyone() {
        let (handle, mut rx) = scheduler_channel();
        handle.trigger_all();
        let trigger = rx.try_recv().unwrap();
        assert_eq!(trigger.user_did, None);
        assert!(!trigger.force_priority);
    }
}
