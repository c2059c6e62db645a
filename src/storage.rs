//! Local persistent key-value storage.
//!
//! A single SQLite table plays the role the browser's localStorage played
//! for the web client: string keys (`user`, `orders`, `archives`) mapped to
//! JSON string values. Uses rusqlite with WAL mode; malformed stored JSON is
//! treated as empty rather than ever blocking startup.

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::model::{Order, SettlementBatch};

pub const KEY_USER: &str = "user";
pub const KEY_ORDERS: &str = "orders";
pub const KEY_ARCHIVES: &str = "archives";

/// Handle to the local store. The connection sits behind a mutex; callers
/// never hold it across await points.
pub struct Store {
    conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store at `{data_dir}/pos.db`.
    ///
    /// On open failure the file is deleted and the open retried once, so a
    /// corrupted database degrades to a fresh one instead of a dead client.
    pub fn open(data_dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

        let db_path = data_dir.join("pos.db");
        info!("Opening local store at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!("Store open failed ({first_err}), deleting and retrying once");
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path)
                    .map_err(|e| format!("Store open failed after retry: {e}"))?
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // -----------------------------------------------------------------
    // Raw key-value access
    // -----------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().ok()?;
        conn.query_row(
            "SELECT store_value FROM local_store WHERE store_key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .ok()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO local_store (store_key, store_value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(store_key) DO UPDATE SET
                store_value = excluded.store_value,
                updated_at = excluded.updated_at",
            params![key, value],
        )
        .map_err(|e| format!("store set {key}: {e}"))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| e.to_string())?;
        conn.execute(
            "DELETE FROM local_store WHERE store_key = ?1",
            params![key],
        )
        .map_err(|e| format!("store remove {key}: {e}"))?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------

    pub fn load_user(&self) -> Option<String> {
        self.get(KEY_USER).filter(|u| !u.is_empty())
    }

    /// Persist or clear the operator identity.
    pub fn save_user(&self, user: Option<&str>) -> Result<(), String> {
        match user {
            Some(name) if !name.is_empty() => self.set(KEY_USER, name),
            _ => self.remove(KEY_USER),
        }
    }

    pub fn load_orders(&self) -> Vec<Order> {
        self.load_json_list(KEY_ORDERS)
    }

    pub fn save_orders(&self, orders: &[Order]) -> Result<(), String> {
        self.save_json(KEY_ORDERS, orders)
    }

    pub fn load_archives(&self) -> Vec<SettlementBatch> {
        self.load_json_list(KEY_ARCHIVES)
    }

    pub fn save_archives(&self, archives: &[SettlementBatch]) -> Result<(), String> {
        self.save_json(KEY_ARCHIVES, archives)
    }

    fn load_json_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(raw) = self.get(key) else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                warn!(key, error = %e, "Stored JSON is malformed, treating as empty");
                Vec::new()
            }
        }
    }

    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), String> {
        let raw =
            serde_json::to_string(value).map_err(|e| format!("serialize {key}: {e}"))?;
        self.set(key, &raw)
    }
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    ensure_schema(&conn)?;
    Ok(conn)
}

fn ensure_schema(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS local_store (
            store_key   TEXT PRIMARY KEY,
            store_value TEXT NOT NULL,
            updated_at  TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create local_store: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderItem;

    fn sample_order(id: &str) -> Order {
        Order {
            order_id: id.to_string(),
            timestamp: "2026-03-01T10:00:00+08:00".to_string(),
            user: "amy".to_string(),
            items: vec![OrderItem {
                name: "Tea".to_string(),
                price: 40,
                quantity: 1,
                custom_options: Some("half / no ice".to_string()),
            }],
            subtotal: 40,
            total: 40,
            received_amount: 40,
            payment_method: "cash".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn user_roundtrip_and_clear() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.load_user(), None);

        store.save_user(Some("amy")).unwrap();
        assert_eq!(store.load_user().as_deref(), Some("amy"));

        store.save_user(None).unwrap();
        assert_eq!(store.load_user(), None);
    }

    #[test]
    fn orders_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let orders = vec![sample_order("a"), sample_order("b")];
        store.save_orders(&orders).unwrap();
        assert_eq!(store.load_orders(), orders);
    }

    #[test]
    fn malformed_json_loads_as_empty() {
        let store = Store::open_in_memory().unwrap();
        store.set(KEY_ORDERS, "{not json").unwrap();
        assert!(store.load_orders().is_empty());

        store.set(KEY_ARCHIVES, "42").unwrap();
        assert!(store.load_archives().is_empty());
    }

    #[test]
    fn archives_roundtrip_with_note() {
        let store = Store::open_in_memory().unwrap();
        let batch = SettlementBatch {
            id: "S-1".to_string(),
            timestamp: "2026-03-01T22:00:00+08:00".to_string(),
            orders: vec![sample_order("a")],
            note: Some("settled from another device".to_string()),
        };
        store.save_archives(std::slice::from_ref(&batch)).unwrap();
        assert_eq!(store.load_archives(), vec![batch]);
    }

    #[test]
    fn open_creates_db_file_and_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("darkroom-pos-test-{}", uuid::Uuid::new_v4()));
        {
            let store = Store::open(&dir).unwrap();
            store.save_user(Some("amy")).unwrap();
        }
        {
            let store = Store::open(&dir).unwrap();
            assert_eq!(store.load_user().as_deref(), Some("amy"));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
