//! # Sync Scheduler
//!
//! Timers that feed the sync manager's event inbox: a fixed-interval tick
//! and the one-shot sync shortly after startup.
//!
//! Ticks that fall behind are skipped rather than bursted, so a slow pass
//! never causes a backlog of checks.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::sync::SyncEvent;

/// Synchronization scheduler
#[derive(Debug, Clone, Copy)]
pub struct SyncScheduler {
    /// Periodic check interval
    interval: Duration,
    /// Delay of the startup sync
    initial_delay: Duration,
}

impl SyncScheduler {
    /// Create a new sync scheduler
    pub fn new(interval: Duration, initial_delay: Duration) -> Self {
        Self {
            interval,
            initial_delay,
        }
    }

    /// Periodic check interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Post [`SyncEvent::Tick`] every interval, first one after a full interval.
    ///
    /// The task ends once the inbox is closed.
    pub fn spawn_periodic(&self, events: UnboundedSender<SyncEvent>) -> JoinHandle<()> {
        let period = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if events.send(SyncEvent::Tick).is_err() {
                    break;
                }
            }
        })
    }

    /// Post [`SyncEvent::InitialSync`] once after the startup delay
    pub fn spawn_initial(&self, events: UnboundedSender<SyncEvent>) -> JoinHandle<()> {
        let delay = self.initial_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SyncEvent::InitialSync);
        })
    }
}
