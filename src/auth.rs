//! Operator identity.
//!
//! Login is delegated to the remote endpoint; the only thing held locally is
//! the operator name, persisted so a restart lands back in the signed-in
//! state. Reconciliation and submissions run under whichever identity is
//! current.

use std::sync::Mutex;
use tracing::{info, warn};

use crate::ledger::RemoteLedger;
use crate::storage::Store;

/// A signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Presentation name from the login response; falls back to the
    /// username.
    pub display_name: String,
}

/// Current operator, persisted across restarts.
pub struct AuthState {
    current: Mutex<Option<String>>,
}

impl AuthState {
    /// Restore the persisted identity, if any.
    pub fn load(store: &Store) -> Self {
        let saved = store.load_user();
        if let Some(user) = &saved {
            info!(user = %user, "restored operator identity");
        }
        Self {
            current: Mutex::new(saved),
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.current.lock().ok().and_then(|g| g.clone())
    }

    /// Verify credentials against the remote endpoint and persist the
    /// identity on success.
    pub async fn login(
        &self,
        ledger: &dyn RemoteLedger,
        store: &Store,
        username: &str,
        password: &str,
    ) -> Result<Identity, String> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err("username and password are required".to_string());
        }

        let outcome = ledger
            .login(username, password)
            .await
            .map_err(|e| format!("cannot reach the login service: {e}"))?;

        if !outcome.success {
            return Err(outcome
                .message
                .unwrap_or_else(|| "login failed".to_string()));
        }

        let resolved = outcome
            .username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| username.to_string());
        let display_name = outcome
            .display_name
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| resolved.clone());

        if let Err(e) = store.save_user(Some(&resolved)) {
            warn!(error = %e, "failed to persist operator identity");
        }
        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(resolved.clone());
        }
        info!(user = %resolved, "operator signed in");

        Ok(Identity {
            username: resolved,
            display_name,
        })
    }

    /// Sign out and clear the persisted identity.
    pub fn logout(&self, store: &Store) {
        if let Ok(mut guard) = self.current.lock() {
            *guard = None;
        }
        if let Err(e) = store.save_user(None) {
            warn!(error = %e, "failed to clear operator identity");
        }
        info!("operator signed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{DispatchOutcome, LedgerError, LoginOutcome, RemoteSnapshot};
    use crate::model::{Order, SettlementRecord};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct StubLedger {
        response: LoginOutcome,
        unreachable: bool,
    }

    #[async_trait]
    impl RemoteLedger for StubLedger {
        async fn fetch_orders(&self) -> Result<RemoteSnapshot, LedgerError> {
            Ok(RemoteSnapshot::default())
        }
        async fn fetch_orders_fallback(&self) -> Result<RemoteSnapshot, LedgerError> {
            Ok(RemoteSnapshot::default())
        }
        async fn fetch_settled_ids(&self) -> Result<HashSet<String>, LedgerError> {
            Ok(HashSet::new())
        }
        async fn login(&self, _u: &str, _p: &str) -> Result<LoginOutcome, LedgerError> {
            if self.unreachable {
                return Err(LedgerError::Unreachable("stub".to_string()));
            }
            Ok(self.response.clone())
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

    fn accepting(display_name: Option<&str>) -> StubLedger {
        StubLedger {
            response: LoginOutcome {
                success: true,
                username: Some("amy".to_string()),
                display_name: display_name.map(str::to_string),
                message: None,
            },
            unreachable: false,
        }
    }

    #[tokio::test]
    async fn login_persists_identity() {
        let store = Store::open_in_memory().unwrap();
        let auth = AuthState::load(&store);
        let ledger = accepting(Some("Amy C."));

        let identity = auth.login(&ledger, &store, " amy ", "pw").await.unwrap();
        assert_eq!(identity.username, "amy");
        assert_eq!(identity.display_name, "Amy C.");
        assert_eq!(auth.current_user().as_deref(), Some("amy"));
        assert_eq!(store.load_user().as_deref(), Some("amy"));

        // A fresh AuthState sees the persisted identity.
        let restored = AuthState::load(&store);
        assert_eq!(restored.current_user().as_deref(), Some("amy"));
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let store = Store::open_in_memory().unwrap();
        let auth = AuthState::load(&store);
        let ledger = accepting(None);

        assert!(auth.login(&ledger, &store, "", "pw").await.is_err());
        assert!(auth.login(&ledger, &store, "amy", "").await.is_err());
        assert_eq!(auth.current_user(), None);
    }

    #[tokio::test]
    async fn rejected_login_surfaces_remote_message() {
        let store = Store::open_in_memory().unwrap();
        let auth = AuthState::load(&store);
        let ledger = StubLedger {
            response: LoginOutcome {
                success: false,
                message: Some("bad credentials".to_string()),
                ..Default::default()
            },
            unreachable: false,
        };

        let err = auth.login(&ledger, &store, "amy", "pw").await.unwrap_err();
        assert_eq!(err, "bad credentials");
        assert_eq!(auth.current_user(), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let store = Store::open_in_memory().unwrap();
        let auth = AuthState::load(&store);
        let ledger = StubLedger {
            response: LoginOutcome::default(),
            unreachable: true,
        };

        let err = auth.login(&ledger, &store, "amy", "pw").await.unwrap_err();
        assert!(err.contains("cannot reach the login service"));
    }

    #[tokio::test]
    async fn logout_clears_persisted_identity() {
        let store = Store::open_in_memory().unwrap();
        let auth = AuthState::load(&store);
        let ledger = accepting(None);
        auth.login(&ledger, &store, "amy", "pw").await.unwrap();

        auth.logout(&store);
        assert_eq!(auth.current_user(), None);
        assert_eq!(store.load_user(), None);
    }
}
