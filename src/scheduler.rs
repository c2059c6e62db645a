//! Reconciliation scheduling.
//!
//! One repeating background task drives the engine's reconciliation passes:
//! a fixed interval plus a manual trigger hook the host wires to
//! focus-regain and login events. Teardown is deterministic: cancel the
//! token, await the tracker, nothing keeps ticking.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::sync::OrderEngine;

/// Default period between reconciliation passes while a session is active.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to the background reconciliation loop.
pub struct SyncScheduler {
    cancel: CancellationToken,
    trigger: Arc<Notify>,
    tracker: TaskTracker,
}

impl SyncScheduler {
    /// Spawn the loop. Each wakeup (interval tick or manual trigger) runs
    /// one reconciliation pass; failed passes are logged and the loop keeps
    /// going.
    pub fn start(engine: Arc<OrderEngine>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let trigger = Arc::new(Notify::new());
        let tracker = TaskTracker::new();

        let token = cancel.clone();
        let wakeup = trigger.clone();
        tracker.spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "sync scheduler started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = wakeup.notified() => {}
                }
                if let Err(e) = engine.sync_once().await {
                    warn!(error = %e, "reconciliation pass failed");
                }
            }
            info!("sync scheduler stopped");
        });
        tracker.close();

        Self {
            cancel,
            trigger,
            tracker,
        }
    }

    /// Request an immediate pass (focus regained, operator signed in). If a
    /// pass is already running the request is remembered and honored right
    /// after it.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop the loop and wait for the in-flight pass, if any, to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{
        DispatchOutcome, LedgerError, LoginOutcome, RemoteLedger, RemoteSnapshot,
    };
    use crate::model::{Order, SettlementRecord};
    use crate::storage::Store;
    use crate::sync::OrderEngine;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingLedger {
        fetches: AtomicU64,
    }

    impl CountingLedger {
        fn fetch_count(&self) -> u64 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteLedger for CountingLedger {
        async fn fetch_orders(&self) -> Result<RemoteSnapshot, LedgerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteSnapshot::default())
        }
        async fn fetch_orders_fallback(&self) -> Result<RemoteSnapshot, LedgerError> {
            Ok(RemoteSnapshot::default())
        }
        async fn fetch_settled_ids(&self) -> Result<HashSet<String>, LedgerError> {
            Ok(HashSet::new())
        }
        async fn login(&self, _u: &str, _p: &str) -> Result<LoginOutcome, LedgerError> {
            Ok(LoginOutcome::default())
        }
        async fn submit_order(&self, _order: &Order) -> DispatchOutcome {
            DispatchOutcome::Accepted
        }
        async fn mark_deleted(&self, _id: &str, _by: &str, _at: &str) -> DispatchOutcome {
            DispatchOutcome::Accepted
        }
        async fn record_settlement(&self, _record: &SettlementRecord) -> DispatchOutcome {
            DispatchOutcome::Accepted
        }
    }

    fn engine_with_counter() -> (Arc<OrderEngine>, Arc<CountingLedger>) {
        let store = Store::open_in_memory().unwrap();
        let ledger = Arc::new(CountingLedger::default());
        let engine = OrderEngine::new(store, ledger.clone() as Arc<dyn RemoteLedger>);
        (engine, ledger)
    }

    #[tokio::test]
    async fn interval_drives_repeated_passes() {
        let (engine, ledger) = engine_with_counter();
        let scheduler = SyncScheduler::start(engine, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ledger.fetch_count() >= 2, "expected repeated passes");

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn manual_trigger_runs_a_pass_before_the_interval() {
        let (engine, ledger) = engine_with_counter();
        let scheduler = SyncScheduler::start(engine, Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ledger.fetch_count(), 0);

        scheduler.trigger_now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ledger.fetch_count(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (engine, ledger) = engine_with_counter();
        let scheduler = SyncScheduler::start(engine, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;

        scheduler.shutdown().await;
        let after_shutdown = ledger.fetch_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ledger.fetch_count(), after_shutdown);
    }
}
