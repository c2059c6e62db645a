//! Sync & reconciliation engine.
//!
//! Owns the authoritative local order set and the settlement archive.
//! Submissions commit locally first and dispatch to the remote ledger in the
//! background; reconciliation passes pull the remote snapshot, fold it into
//! local state, and recompute which orders failed to propagate. The remote
//! store offers no write confirmation, so presence in the next snapshot is
//! the only real acknowledgment an order ever gets.
//!
//! Every reconciliation pass is stamped with a monotonic sequence number;
//! a pass whose network reads finish after a newer pass has already applied
//! is discarded, so overlapping triggers cannot roll state backwards.

use chrono::{DateTime, Local, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cart::Cart;
use crate::checkout;
use crate::ledger::{DispatchOutcome, RemoteLedger, RemoteSnapshot};
use crate::model::{
    self, archived_ids, Order, SettlementBatch, SettlementRecord, SUBMISSION_GRACE_WINDOW_SECS,
};
use crate::notice::NoticeHub;
use crate::storage::Store;

/// Debounce for persisting the active order list.
const ORDERS_SAVE_DEBOUNCE_MS: u64 = 300;

// ---------------------------------------------------------------------------
// Pure reconciliation
// ---------------------------------------------------------------------------

/// Inputs to one reconciliation pass, all captured explicitly so the merge
/// itself has no hidden state.
pub struct ReconcileInput<'a> {
    pub remote: &'a RemoteSnapshot,
    /// IDs the remote store reports as already settled.
    pub settled_ids: &'a HashSet<String>,
    pub local: &'a [Order],
    /// IDs already in a local archive batch; never re-inserted.
    pub archived: &'a HashSet<String>,
    pub recent_submissions: &'a HashMap<String, DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// The next active order set.
    pub active: Vec<Order>,
    /// Local orders that another device settled; to be archived here too.
    pub auto_archived: Vec<Order>,
    /// Full recomputation of the sync-failed set.
    pub sync_failed: HashSet<String>,
    /// Grace-window entries that aged out this pass.
    pub expired_submissions: Vec<String>,
}

/// Merge a remote snapshot into the local active set.
///
/// 1. Local orders the remote reports settled move out of the active set.
/// 2. Remaining remote orders merge in: known IDs take the remote fields
///    (remote is authoritative for cross-device edits), unknown IDs append.
///    Archived and settled IDs are never inserted.
/// 3. The sync-failed set is recomputed in full: local, absent from the
///    remote snapshot, not inside the submission grace window.
pub fn reconcile(input: ReconcileInput<'_>) -> ReconcileOutcome {
    let mut expired_submissions = Vec::new();
    let mut shielded: HashSet<&str> = HashSet::new();
    for (id, submitted_at) in input.recent_submissions {
        if (input.now - *submitted_at).num_seconds() > SUBMISSION_GRACE_WINDOW_SECS {
            expired_submissions.push(id.clone());
        } else {
            shielded.insert(id.as_str());
        }
    }

    let (auto_archived, mut active): (Vec<Order>, Vec<Order>) = input
        .local
        .iter()
        .cloned()
        .partition(|order| input.settled_ids.contains(&order.order_id));

    for remote_order in &input.remote.orders {
        let id = &remote_order.order_id;
        if id.is_empty() || input.archived.contains(id) || input.settled_ids.contains(id) {
            continue;
        }
        match active.iter_mut().find(|order| &order.order_id == id) {
            Some(local_order) => *local_order = merge_order(local_order, remote_order),
            None => active.push(remote_order.clone()),
        }
    }

    let mut sync_failed = HashSet::new();
    for order in &active {
        let id = &order.order_id;
        if !input.remote.ids.contains(id)
            && !shielded.contains(id.as_str())
            && !input.settled_ids.contains(id)
        {
            sync_failed.insert(id.clone());
        }
    }

    ReconcileOutcome {
        active,
        auto_archived,
        sync_failed,
        expired_submissions,
    }
}

/// Remote fields overwrite local ones, with two exceptions: a deletion seen
/// on either side sticks, and a remote row with no parsed items or tender
/// detail (the spreadsheet fallback) does not clobber richer local data.
fn merge_order(local: &Order, remote: &Order) -> Order {
    let mut merged = remote.clone();

    if merged.items.is_empty() && !local.items.is_empty() {
        merged.items = local.items.clone();
    }
    if merged.payment_amounts.is_empty() && !local.payment_amounts.is_empty() {
        merged.payment_amounts = local.payment_amounts.clone();
        merged.received_amount = local.received_amount;
        merged.change_amount = local.change_amount;
    }
    if local.is_deleted() {
        merged.deleted = true;
        if merged.deleted_by.is_none() {
            merged.deleted_by = local.deleted_by.clone();
        }
        if merged.deleted_at.is_none() {
            merged.deleted_at = local.deleted_at.clone();
        }
    }
    if merged.is_deleted() {
        merged.deleted = true;
    }

    merged
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Summary of an applied reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub active: usize,
    pub auto_archived: usize,
    pub sync_failed: usize,
    /// True when this pass lost the race to a newer one and was discarded.
    pub stale: bool,
}

struct EngineState {
    orders: Vec<Order>,
    archives: Vec<SettlementBatch>,
    last_remote_ids: HashSet<String>,
    sync_failed: HashSet<String>,
    recent_submissions: HashMap<String, DateTime<Utc>>,
}

/// The order engine: exclusive owner of the active order list and the
/// archive. Everything else reads snapshots and issues intents through the
/// methods here.
pub struct OrderEngine {
    store: Store,
    ledger: Arc<dyn RemoteLedger>,
    notices: NoticeHub,
    state: Mutex<EngineState>,
    pass_counter: AtomicU64,
    applied_pass: AtomicU64,
    save_scheduled: AtomicBool,
    /// Back-reference for the debounced save task.
    self_ref: Weak<OrderEngine>,
}

impl OrderEngine {
    /// Load persisted state and wire up the engine. Stored orders that
    /// predate order IDs get one derived from their timestamp.
    pub fn new(store: Store, ledger: Arc<dyn RemoteLedger>) -> Arc<Self> {
        let mut orders = store.load_orders();
        for order in &mut orders {
            if order.order_id.is_empty() {
                if let Some(id) = model::order_id_from_timestamp(&order.timestamp) {
                    order.order_id = id;
                }
            }
        }
        let archives = store.load_archives();

        info!(
            orders = orders.len(),
            archives = archives.len(),
            "order engine loaded"
        );

        Arc::new_cyclic(|self_ref| Self {
            store,
            ledger,
            notices: NoticeHub::new(),
            state: Mutex::new(EngineState {
                orders,
                archives,
                last_remote_ids: HashSet::new(),
                sync_failed: HashSet::new(),
                recent_submissions: HashMap::new(),
            }),
            pass_counter: AtomicU64::new(0),
            applied_pass: AtomicU64::new(0),
            save_scheduled: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn notices(&self) -> &NoticeHub {
        &self.notices
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Snapshot of the active order set.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().map(|s| s.orders.clone()).unwrap_or_default()
    }

    /// Snapshot of the settlement archive.
    pub fn archives(&self) -> Vec<SettlementBatch> {
        self.state.lock().map(|s| s.archives.clone()).unwrap_or_default()
    }

    /// Orders currently flagged as failed to propagate.
    pub fn sync_failed(&self) -> HashSet<String> {
        self.state
            .lock()
            .map(|s| s.sync_failed.clone())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------
    // Submission pipeline
    // -----------------------------------------------------------------

    /// Validate the cart, commit the order locally, clear the cart, and
    /// dispatch the order to the remote ledger.
    ///
    /// The local commit happens before any network traffic and is never
    /// rolled back: a failed upload leaves the order held locally and
    /// flagged by the next reconciliation pass.
    pub async fn submit(&self, cart: &mut Cart, user: &str) -> Result<Order, String> {
        let order = checkout::build_order(cart, user)?;

        {
            let mut state = self.state.lock().map_err(|e| e.to_string())?;
            state
                .recent_submissions
                .insert(order.order_id.clone(), Utc::now());
            state.orders.push(order.clone());
        }
        cart.clear();
        self.schedule_orders_save();
        self.notices.success("order submitted");
        info!(order_id = %order.order_id, total = order.total, "order committed locally");

        if let DispatchOutcome::Rejected(error) = self.ledger.submit_order(&order).await {
            warn!(order_id = %order.order_id, error = %error, "background order upload failed");
            self.notices
                .error("order kept locally; cloud upload failed");
        }

        Ok(order)
    }

    /// Re-send a stored order to the remote ledger. Clearing the failed
    /// flag only needs the write accepted for dispatch; confirmed
    /// persistence still waits for the next reconciliation read.
    pub async fn retry(&self, order_id: &str) -> Result<(), String> {
        let order = {
            let state = self.state.lock().map_err(|e| e.to_string())?;
            state
                .orders
                .iter()
                .find(|o| o.order_id == order_id)
                .cloned()
                .ok_or_else(|| format!("order not found: {order_id}"))?
        };

        self.notices.info("re-uploading order...");
        let outcome = self.ledger.submit_order(&order).await;
        if outcome.is_dispatched() {
            if let Ok(mut state) = self.state.lock() {
                state.sync_failed.remove(order_id);
            }
            self.notices.success("order re-uploaded");
            Ok(())
        } else {
            self.notices.error("re-upload failed, try again later");
            Err(format!("re-upload failed: {order_id}"))
        }
    }

    /// Soft-delete an order: flagged locally, kept for audit, excluded from
    /// active aggregates. The marker is forwarded to the remote ledger
    /// best-effort.
    pub async fn delete(&self, order_id: &str, user: &str) -> Result<(), String> {
        let deleted_at = Utc::now().to_rfc3339();

        {
            let mut state = self.state.lock().map_err(|e| e.to_string())?;
            let order = state
                .orders
                .iter_mut()
                .find(|o| o.order_id == order_id)
                .ok_or_else(|| format!("order not found: {order_id}"))?;
            order.deleted = true;
            order.deleted_by = Some(user.to_string());
            order.deleted_at = Some(deleted_at.clone());
        }
        self.schedule_orders_save();

        let outcome = self.ledger.mark_deleted(order_id, user, &deleted_at).await;
        if !outcome.is_dispatched() {
            warn!(order_id, "delete marker upload failed");
            self.notices
                .error("delete recorded locally; cloud sync failed");
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------

    /// Settle the given orders: send the aggregate settlement record,
    /// re-send delete markers for deleted members, then archive the batch
    /// and drop it from the active set.
    ///
    /// The local archive applies regardless of the dispatch outcome. A
    /// repeat call naming already-settled IDs finds nothing and is a no-op
    /// (`Ok(None)`).
    pub async fn settle(
        &self,
        order_ids: &[String],
        user: &str,
    ) -> Result<Option<SettlementBatch>, String> {
        let wanted: HashSet<&str> = order_ids.iter().map(String::as_str).collect();
        let selected: Vec<Order> = {
            let state = self.state.lock().map_err(|e| e.to_string())?;
            state
                .orders
                .iter()
                .filter(|o| wanted.contains(o.order_id.as_str()))
                .cloned()
                .collect()
        };
        if selected.is_empty() {
            return Ok(None);
        }

        let now = Local::now();
        let batch_id = model::new_settlement_id(&now);
        let record = SettlementRecord::build(batch_id.clone(), user, selected.clone(), "");

        let outcome = self.ledger.record_settlement(&record).await;
        if !outcome.is_dispatched() {
            warn!(batch_id = %batch_id, "settlement upload failed; archiving locally anyway");
            self.notices
                .error("settlement recorded locally; cloud sync failed");
        }

        // The remote store may not have seen the delete markers yet.
        for order in selected.iter().filter(|o| o.is_deleted()) {
            let deleted_by = order.deleted_by.as_deref().unwrap_or(user);
            let deleted_at = order
                .deleted_at
                .clone()
                .unwrap_or_else(|| now.to_rfc3339());
            let _ = self
                .ledger
                .mark_deleted(&order.order_id, deleted_by, &deleted_at)
                .await;
        }

        // Re-partition under the lock: anything a concurrent pass already
        // removed stays out of the batch, so nothing archives twice.
        let batch = {
            let mut state = self.state.lock().map_err(|e| e.to_string())?;
            let (settled, remaining): (Vec<Order>, Vec<Order>) = state
                .orders
                .drain(..)
                .partition(|o| wanted.contains(o.order_id.as_str()));
            state.orders = remaining;
            if settled.is_empty() {
                return Ok(None);
            }

            let batch = SettlementBatch {
                id: batch_id,
                timestamp: now.to_rfc3339(),
                orders: settled,
                note: None,
            };
            state.archives.push(batch.clone());
            for id in batch.order_ids() {
                state.sync_failed.remove(id);
            }
            self.persist_archives(&state.archives);
            batch
        };
        self.schedule_orders_save();

        self.notices
            .success(format!("settled {} orders", batch.orders.len()));
        info!(batch_id = %batch.id, count = batch.orders.len(), "settlement archived");
        Ok(Some(batch))
    }

    /// Settle the entire active set. Refuses when there is nothing to
    /// settle.
    pub async fn settle_all(&self, user: &str) -> Result<SettlementBatch, String> {
        let ids: Vec<String> = {
            let state = self.state.lock().map_err(|e| e.to_string())?;
            state.orders.iter().map(|o| o.order_id.clone()).collect()
        };
        if ids.is_empty() {
            return Err("no active orders to settle".to_string());
        }
        self.settle(&ids, user)
            .await?
            .ok_or_else(|| "no active orders to settle".to_string())
    }

    // -----------------------------------------------------------------
    // Reconciliation passes
    // -----------------------------------------------------------------

    /// One full remote-read + merge + failure-detection cycle.
    ///
    /// Reads the primary endpoint; if that fails, falls back to the
    /// spreadsheet visualization query with an empty settled set.
    pub async fn sync_once(&self) -> Result<SyncReport, String> {
        let seq = self.pass_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let (snapshot, settled_ids) = match self.ledger.fetch_orders().await {
            Ok(snapshot) => {
                let settled = match self.ledger.fetch_settled_ids().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(error = %e, "settled-ID query failed; continuing without");
                        HashSet::new()
                    }
                };
                (snapshot, settled)
            }
            Err(primary_err) => {
                warn!(error = %primary_err, "primary read failed; trying sheet fallback");
                match self.ledger.fetch_orders_fallback().await {
                    Ok(snapshot) => (snapshot, HashSet::new()),
                    Err(fallback_err) => {
                        debug!(error = %fallback_err, "sheet fallback failed");
                        return Err(format!("sync failed: {primary_err}"));
                    }
                }
            }
        };

        Ok(self.apply_snapshot(seq, &snapshot, &settled_ids))
    }

    /// Fold a fetched snapshot into local state, unless a newer pass got
    /// there first.
    fn apply_snapshot(
        &self,
        seq: u64,
        snapshot: &RemoteSnapshot,
        settled_ids: &HashSet<String>,
    ) -> SyncReport {
        let mut auto_archived_count = 0usize;
        let report = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(_) => return SyncReport::default(),
            };

            // Stale-pass check happens under the state lock so the compare
            // and the apply are atomic.
            if self.applied_pass.load(Ordering::SeqCst) >= seq {
                debug!(seq, "discarding stale reconciliation pass");
                return SyncReport {
                    stale: true,
                    ..SyncReport::default()
                };
            }
            self.applied_pass.store(seq, Ordering::SeqCst);

            let archived = archived_ids(&state.archives);
            let outcome = reconcile(ReconcileInput {
                remote: snapshot,
                settled_ids,
                local: &state.orders,
                archived: &archived,
                recent_submissions: &state.recent_submissions,
                now: Utc::now(),
            });

            for id in &outcome.expired_submissions {
                state.recent_submissions.remove(id);
            }

            if !outcome.auto_archived.is_empty() {
                auto_archived_count = outcome.auto_archived.len();
                let now = Local::now();
                let batch = SettlementBatch {
                    id: model::new_settlement_id(&now),
                    timestamp: now.to_rfc3339(),
                    orders: outcome.auto_archived,
                    note: Some("settled from another device".to_string()),
                };
                state.archives.push(batch);
                self.persist_archives(&state.archives);
            }

            state.orders = outcome.active;
            state.last_remote_ids = snapshot.ids.clone();
            state.sync_failed = outcome.sync_failed;

            SyncReport {
                active: state.orders.len(),
                auto_archived: auto_archived_count,
                sync_failed: state.sync_failed.len(),
                stale: false,
            }
        };
        self.schedule_orders_save();

        if report.auto_archived > 0 {
            self.notices.info(format!(
                "auto-archived {} orders settled from another device",
                report.auto_archived
            ));
        }
        debug!(
            active = report.active,
            sync_failed = report.sync_failed,
            "reconciliation pass applied"
        );
        report
    }

    /// First-run hydration: with an empty local store, pull whatever the
    /// remote already holds (primary, then fallback) so a fresh device
    /// starts from the shared state.
    pub async fn hydrate_if_empty(&self) -> Result<usize, String> {
        {
            let state = self.state.lock().map_err(|e| e.to_string())?;
            if !state.orders.is_empty() {
                return Ok(0);
            }
        }

        let snapshot = match self.ledger.fetch_orders().await {
            Ok(snapshot) => snapshot,
            Err(_) => self
                .ledger
                .fetch_orders_fallback()
                .await
                .map_err(|e| format!("initial order load failed: {e}"))?,
        };

        let count = snapshot.orders.len();
        if count > 0 {
            let mut state = self.state.lock().map_err(|e| e.to_string())?;
            if state.orders.is_empty() {
                state.orders = snapshot.orders;
            }
        }
        self.schedule_orders_save();
        Ok(count)
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Debounced order-list persistence: rapid mutations coalesce into one
    /// write.
    fn schedule_orders_save(&self) {
        if self.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(engine) = self.self_ref.upgrade() else {
            self.flush();
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ORDERS_SAVE_DEBOUNCE_MS)).await;
            engine.flush();
        });
    }

    /// Write the active order list to the store now. Called by the debounce
    /// task and on teardown.
    pub fn flush(&self) {
        self.save_scheduled.store(false, Ordering::SeqCst);
        let orders = match self.state.lock() {
            Ok(state) => state.orders.clone(),
            Err(_) => return,
        };
        if let Err(e) = self.store.save_orders(&orders) {
            warn!(error = %e, "failed to persist order list");
        }
    }

    fn persist_archives(&self, archives: &[SettlementBatch]) {
        if let Err(e) = self.store.save_archives(archives) {
            warn!(error = %e, "failed to persist archives");
        }
    }

    #[cfg(test)]
    fn backdate_submission(&self, order_id: &str, secs: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(at) = state.recent_submissions.get_mut(order_id) {
            *at -= chrono::Duration::seconds(secs);
        }
    }
}
