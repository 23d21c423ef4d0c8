// Account moderation - suspend or reinstate a user across the auth subsystem
// and the profile subsystem.
//
// Two sequential writes, one per subsystem, no transaction spanning them:
// 1. auth ban state (failure aborts, nothing changed)
// 2. profile `banned_until` (failure after 1 succeeded = PartiallyApplied)
//
// There is no rollback of step 1. Each call is a complete, retryable unit;
// repeating it with the same target converges both sides.

use super::account_moderation_models::{
    indefinite_ban_expiry, ConsistencyReport, ModerationError, ModerationOutcome,
    PROFILE_BANNED_UNTIL_COLUMN, PROFILE_KEY_COLUMN, PROFILE_TABLE,
};
use crate::core::gateway::{
    parse_timestamp, BanDuration, Filter, GatewayError, Row, StorageGateway,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub struct AccountModerationCoordinator<G: StorageGateway> {
    gateway: Arc<G>,
}

impl<G: StorageGateway> AccountModerationCoordinator<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Suspend (`should_ban = true`) or reinstate a user.
    ///
    /// # Returns
    /// * `Ok(Applied)` - both subsystems updated
    /// * `Ok(PartiallyApplied)` - auth updated, profile write failed or found
    ///   no profile row
    /// * `Err(AuthUpdateFailed)` - nothing changed
    pub async fn set_ban_state(
        &self,
        user_id: &str,
        should_ban: bool,
    ) -> Result<ModerationOutcome, ModerationError> {
        self.gateway.ensure_configured().map_err(|e| match e {
            GatewayError::Misconfigured(msg) => ModerationError::Misconfigured(msg),
            other => ModerationError::Misconfigured(other.to_string()),
        })?;
        if user_id.trim().is_empty() {
            return Err(ModerationError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }

        // Step 1: authentication subsystem
        let duration = if should_ban {
            BanDuration::Indefinite
        } else {
            BanDuration::Lift
        };
        if let Err(e) = self
            .gateway
            .auth_admin_update_ban_state(user_id, duration)
            .await
        {
            tracing::error!(user_id, should_ban, "Auth ban update failed: {}", e);
            return Err(ModerationError::AuthUpdateFailed(e.to_string()));
        }

        // Step 2: profile subsystem
        let banned_until = if should_ban {
            Value::String(indefinite_ban_expiry(Utc::now()).to_rfc3339())
        } else {
            Value::Null
        };
        let mut patch = Row::new();
        patch.insert(PROFILE_BANNED_UNTIL_COLUMN.to_string(), banned_until);

        let profile_write = self
            .gateway
            .update(
                PROFILE_TABLE,
                &Filter::eq(PROFILE_KEY_COLUMN, user_id),
                patch,
            )
            .await;

        let failure = match profile_write {
            Ok(0) => Some((
                if should_ban {
                    "User was suspended from sign-in, but has no profile record to mark as suspended."
                } else {
                    "User can sign in again, but has no profile record to update."
                },
                format!("profile not found for user '{}'", user_id),
            )),
            Ok(_) => None,
            Err(e) => Some((
                if should_ban {
                    "User was suspended from sign-in, but their profile still shows them as active."
                } else {
                    "User can sign in again, but their profile still shows them as suspended."
                },
                e.to_string(),
            )),
        };

        if let Some((message, profile_error)) = failure {
            tracing::error!(
                user_id,
                should_ban,
                "Auth ban state changed but profile update failed, subsystems diverge: {}",
                profile_error
            );
            return Ok(ModerationOutcome::PartiallyApplied {
                banned: should_ban,
                message: message.to_string(),
                profile_error,
            });
        }

        tracing::info!(user_id, should_ban, "Account ban state applied");
        let message = if should_ban {
            "User suspended."
        } else {
            "User reinstated."
        };
        Ok(ModerationOutcome::Applied {
            banned: should_ban,
            message: message.to_string(),
        })
    }

    /// Read both ban representations and report whether they disagree.
    /// Detection only; nothing is repaired.
    pub async fn check_consistency(
        &self,
        user_id: &str,
    ) -> Result<ConsistencyReport, ModerationError> {
        self.gateway
            .ensure_configured()
            .map_err(|e| ModerationError::Misconfigured(e.to_string()))?;

        let auth = self.gateway.auth_admin_get_ban_state(user_id).await?;
        let rows = self
            .gateway
            .select(PROFILE_TABLE, &Filter::eq(PROFILE_KEY_COLUMN, user_id))
            .await?;

        let profile_banned_until = rows
            .first()
            .and_then(|row| row.get(PROFILE_BANNED_UNTIL_COLUMN))
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);

        let report = ConsistencyReport::new(user_id, auth, profile_banned_until, Utc::now());
        if report.divergent {
            tracing::warn!(user_id, "Ban state diverges between auth and profile");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::{AuthBanState, OrderBy};
    use crate::infra::storage::{GatewayOp, InMemoryGateway, AUTH_TABLE};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn gateway_with_profile(user_id: &str) -> Arc<InMemoryGateway> {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.put_row(
            PROFILE_TABLE,
            json!({ "id": user_id, "full_name": "Kofi", "banned_until": null }),
        );
        gateway
    }

    #[tokio::test]
    async fn test_ban_then_unban_keeps_both_sides_in_step() {
        let gateway = gateway_with_profile("user-1");
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        let outcome = coordinator.set_ban_state("user-1", true).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.message(), "User suspended.");
        let report = coordinator.check_consistency("user-1").await.unwrap();
        assert_eq!(report.auth, AuthBanState::Indefinite);
        assert!(report.profile_banned());
        assert!(!report.divergent);

        let outcome = coordinator.set_ban_state("user-1", false).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.message(), "User reinstated.");
        let report = coordinator.check_consistency("user-1").await.unwrap();
        assert_eq!(report.auth, AuthBanState::NotBanned);
        assert_eq!(report.profile_banned_until, None);
        assert!(!report.divergent);
        assert_eq!(gateway.rows(PROFILE_TABLE)[0]["banned_until"], Value::Null);
    }

    #[tokio::test]
    async fn test_profile_failure_reports_partial_and_divergence_is_visible() {
        let gateway = gateway_with_profile("user-1");
        gateway.fail(PROFILE_TABLE, GatewayOp::Update, "permission denied for table profiles");
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        let outcome = coordinator.set_ban_state("user-1", true).await.unwrap();
        match &outcome {
            ModerationOutcome::PartiallyApplied {
                banned,
                profile_error,
                ..
            } => {
                assert!(*banned);
                assert!(profile_error.contains("permission denied"));
            }
            other => panic!("expected PartiallyApplied, got {:?}", other),
        }
        assert!(!outcome.success());

        // Direct reads: auth banned, profile not
        assert_eq!(
            gateway.auth_admin_get_ban_state("user-1").await.unwrap(),
            AuthBanState::Indefinite
        );
        assert_eq!(gateway.rows(PROFILE_TABLE)[0]["banned_until"], Value::Null);

        let report = coordinator.check_consistency("user-1").await.unwrap();
        assert!(report.divergent);
        assert!(report.auth_banned());
        assert!(!report.profile_banned());

        // Retrying once the profile store recovers converges both sides
        gateway.clear_fault(PROFILE_TABLE, GatewayOp::Update);
        assert!(coordinator.set_ban_state("user-1", true).await.unwrap().success());
        assert!(!coordinator.check_consistency("user-1").await.unwrap().divergent);
    }

    #[tokio::test]
    async fn test_missing_profile_is_reported_as_partial() {
        let gateway = Arc::new(InMemoryGateway::new());
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        let outcome = coordinator.set_ban_state("ghost-1", true).await.unwrap();
        assert!(!outcome.success());
        match &outcome {
            ModerationOutcome::PartiallyApplied { profile_error, .. } => {
                assert!(profile_error.contains("profile not found"));
            }
            other => panic!("expected PartiallyApplied, got {:?}", other),
        }

        // The auth side did change, and the divergence is visible
        let report = coordinator.check_consistency("ghost-1").await.unwrap();
        assert!(report.auth_banned());
        assert!(report.divergent);

        let outcome = coordinator.set_ban_state("ghost-1", false).await.unwrap();
        assert!(!outcome.success());
        assert!(gateway.rows(PROFILE_TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_before_profile_write() {
        let gateway = gateway_with_profile("user-1");
        gateway.fail(AUTH_TABLE, GatewayOp::AuthUpdate, "User not found");
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        let err = coordinator.set_ban_state("user-1", true).await.unwrap_err();
        assert!(matches!(err, ModerationError::AuthUpdateFailed(ref m) if m.contains("User not found")));

        assert_eq!(gateway.rows(PROFILE_TABLE)[0]["banned_until"], Value::Null);
    }

    #[tokio::test]
    async fn test_repeat_ban_is_near_idempotent() {
        let gateway = gateway_with_profile("user-1");
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        coordinator.set_ban_state("user-1", true).await.unwrap();
        let first = coordinator
            .check_consistency("user-1")
            .await
            .unwrap()
            .profile_banned_until;
        coordinator.set_ban_state("user-1", true).await.unwrap();
        let second = coordinator.check_consistency("user-1").await.unwrap();

        assert_eq!(second.auth, AuthBanState::Indefinite);
        assert!(!second.divergent);
        // Expiry is recomputed from "now" on each call
        assert!(second.profile_banned_until >= first);
    }

    #[tokio::test]
    async fn test_misconfigured_gateway_touches_nothing() {
        let coordinator =
            AccountModerationCoordinator::new(Arc::new(InMemoryGateway::misconfigured("no key")));
        let err = coordinator.set_ban_state("user-1", true).await.unwrap_err();
        assert!(matches!(err, ModerationError::Misconfigured(_)));

        let coordinator = AccountModerationCoordinator::new(gateway_with_profile("user-1"));
        let err = coordinator.set_ban_state("", true).await.unwrap_err();
        assert!(matches!(err, ModerationError::InvalidInput(_)));
    }

    /// Delegates to the in-memory gateway but yields before every write and
    /// logs the order writes land in, so two calls genuinely interleave.
    struct InterleavingGateway {
        inner: InMemoryGateway,
        log: Mutex<Vec<String>>,
    }

    impl InterleavingGateway {
        fn record(&self, entry: String) {
            if let Ok(mut log) = self.log.lock() {
                log.push(entry);
            }
        }
    }

    #[async_trait]
    impl StorageGateway for InterleavingGateway {
        fn ensure_configured(&self) -> Result<(), GatewayError> {
            self.inner.ensure_configured()
        }

        async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, GatewayError> {
            self.inner.select(table, filter).await
        }

        async fn select_ordered(
            &self,
            table: &str,
            filter: &Filter,
            order: &OrderBy,
        ) -> Result<Vec<Row>, GatewayError> {
            self.inner.select_ordered(table, filter, order).await
        }

        async fn insert(&self, table: &str, row: Row) -> Result<Row, GatewayError> {
            self.inner.insert(table, row).await
        }

        async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, GatewayError> {
            tokio::task::yield_now().await;
            let banned = !patch[PROFILE_BANNED_UNTIL_COLUMN].is_null();
            self.record(format!("profile:{}", banned));
            self.inner.update(table, filter, patch).await
        }

        async fn auth_admin_update_ban_state(
            &self,
            user_id: &str,
            duration: BanDuration,
        ) -> Result<(), GatewayError> {
            tokio::task::yield_now().await;
            self.record(format!("auth:{}", duration == BanDuration::Indefinite));
            self.inner.auth_admin_update_ban_state(user_id, duration).await
        }

        async fn auth_admin_get_ban_state(
            &self,
            user_id: &str,
        ) -> Result<AuthBanState, GatewayError> {
            self.inner.auth_admin_get_ban_state(user_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_interleave_and_last_writes_win() {
        let inner = InMemoryGateway::new();
        inner.put_row(PROFILE_TABLE, json!({ "id": "user-1", "banned_until": null }));
        let gateway = Arc::new(InterleavingGateway {
            inner,
            log: Mutex::new(Vec::new()),
        });
        let coordinator = AccountModerationCoordinator::new(Arc::clone(&gateway));

        let (ban, unban) = tokio::join!(
            coordinator.set_ban_state("user-1", true),
            coordinator.set_ban_state("user-1", false),
        );
        assert!(ban.unwrap().success());
        assert!(unban.unwrap().success());

        let log = gateway.log.lock().unwrap().clone();
        assert_eq!(log.len(), 4);
        // Both auth writes land before either profile write: the calls overlapped
        assert!(log[..2].iter().all(|e| e.starts_with("auth:")));

        // No cross-call ordering: each side ends as its last write left it
        let last_auth = log.iter().rev().find(|e| e.starts_with("auth:")).unwrap();
        let last_profile = log.iter().rev().find(|e| e.starts_with("profile:")).unwrap();
        let report = coordinator.check_consistency("user-1").await.unwrap();
        assert_eq!(report.auth_banned(), last_auth.ends_with("true"));
        assert_eq!(report.profile_banned(), last_profile.ends_with("true"));
        assert_eq!(report.divergent, last_auth[5..] != last_profile[8..]);
    }
}
