//! Background expiry sweeper.
//!
//! Periodically calls [`ReservationLedger::sweep_expired`] so stale Pending
//! and Approved reservations give their capacity back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::ledger::ReservationLedger;

pub struct ExpirySweeper {
    ledger: Arc<ReservationLedger>,
    period: Duration,
    running: AtomicBool,
    shutdown: Notify,
}

impl ExpirySweeper {
    pub fn new(ledger: Arc<ReservationLedger>, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            period,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Spawn the sweep loop. Returns `None` if it is already running or the
    /// ledger has no expiry configured.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.ledger.policy().is_enabled() {
            info!("reservation expiry disabled, sweeper not started");
            return None;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return None;
        }

        let sweeper = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(sweeper.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(period_ms = sweeper.period.as_millis() as u64, "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweeper.sweep_once(Instant::now());
                    }
                    _ = sweeper.shutdown.notified() => {
                        sweeper.running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }))
    }

    /// Run one sweep at `now`; returns the ids that expired.
    pub fn sweep_once(&self, now: Instant) -> Vec<String> {
        let expired = self.ledger.sweep_expired(now);
        if !expired.is_empty() {
            info!(count = expired.len(), ids = ?expired, "reservations expired");
        }
        expired
    }

    pub fn stop(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
