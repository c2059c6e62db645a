//! Darkroom POS - offline-first point-of-sale client core.
//!
//! The counter keeps working whether or not the network does: checkouts
//! commit locally first, a background engine reconciles against the remote
//! spreadsheet-backed ledger, and settlement archives a shift's orders with
//! aggregates for the books. The embedding shell (desktop app, web view
//! host) owns rendering; this crate owns the state and the failure
//! semantics.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use darkroom_pos::{
//!     config::LedgerConfig, ledger::HttpLedger, scheduler::{SyncScheduler, DEFAULT_SYNC_INTERVAL},
//!     storage::Store, sync::OrderEngine,
//! };
//!
//! # async fn wire() -> Result<(), String> {
//! let config = LedgerConfig::from_env()?;
//! let ledger = Arc::new(HttpLedger::new(config)?);
//! let store = Store::open(std::path::Path::new("./data"))?;
//! let engine = OrderEngine::new(store, ledger);
//! engine.hydrate_if_empty().await?;
//! let scheduler = SyncScheduler::start(engine.clone(), DEFAULT_SYNC_INTERVAL);
//! scheduler.trigger_now();
//! # Ok(())
//! # }
//! ```

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod history;
pub mod ledger;
pub mod model;
pub mod notice;
pub mod payments;
pub mod promo;
pub mod scheduler;
pub mod sheet;
pub mod storage;
pub mod sync;

pub use cart::Cart;
pub use ledger::{DispatchOutcome, HttpLedger, RemoteLedger};
pub use model::{Order, OrderItem, SettlementBatch};
pub use sync::OrderEngine;

/// Initialize structured logging: console always, plus a daily rolling file
/// when `log_dir` is given. Call once from the embedding shell.
pub fn init_tracing(log_dir: Option<&std::path::Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,darkroom_pos=debug"));

    let console_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let file_appender = tracing_appender::rolling::daily(dir, "pos");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            registry.with(file_layer).init();
            // Keep the guard alive for the lifetime of the process; dropping
            // it flushes and closes the file writer.
            std::mem::forget(guard);
        }
        None => registry.init(),
    }

    info!("Darkroom POS core v{}", env!("CARGO_PKG_VERSION"));
}
