//! Registration workflow
//!
//! Turns a presented registration key plus credentials into an account and a
//! person. Steps after the account insert are undone by hard deletes when a
//! later step fails; a failing undo is logged and reported as a warning, never
//! in place of the original error.
use crate::{
    access::AccessMediator,
    auth::CredentialHasher,
    config::MAX_KEY_BODY_LENGTH,
    db::{
        models::{Account, AccountId, NewAccount, NewPerson, Person, RegistrationKey, Role},
        EntityStore,
    },
    error::{AdminError, AdminResult},
    keys::KeyLifecycle,
    request::RequestContext,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Registration request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegistrationRequest {
    #[validate(length(min = 1, message = "key body is required"))]
    pub key_body: String,
    #[validate(length(min = 3, max = 64, message = "login must be 3-64 characters"))]
    pub login: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8-128 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(max = 100))]
    pub middle_name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "last name is required"))]
    pub last_name: String,
}

impl RegistrationRequest {
    /// Field validation plus the key body ceiling shared with key issuance
    pub fn check(&self) -> AdminResult<()> {
        self.validate()
            .map_err(|e| AdminError::InvalidArgument(e.to_string()))?;

        if self.key_body.chars().count() > MAX_KEY_BODY_LENGTH {
            return Err(AdminError::InvalidArgument(format!(
                "key_body: key body must be at most {} characters",
                MAX_KEY_BODY_LENGTH
            )));
        }

        Ok(())
    }
}

/// Newly registered person with its account and role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonWithAccount {
    pub person: Person,
    pub account: Account,
    pub role: Role,
    pub group_name: String,
}

/// A compensating action that did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CompensationWarning {
    AccountNotDeleted { account_id: AccountId, reason: String },
    PersonNotDeleted { person_uuid: Uuid, reason: String },
}

/// Primary outcome plus warnings from any compensation that ran
#[derive(Debug)]
pub struct Compensated<T> {
    pub outcome: AdminResult<T>,
    pub warnings: Vec<CompensationWarning>,
}

impl<T> Compensated<T> {
    fn clean(outcome: AdminResult<T>) -> Self {
        Self {
            outcome,
            warnings: Vec::new(),
        }
    }
}

/// Registration workflow service
#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn EntityStore>,
    hasher: Arc<dyn CredentialHasher>,
    keys: KeyLifecycle,
    access: AccessMediator,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        hasher: Arc<dyn CredentialHasher>,
        keys: KeyLifecycle,
        access: AccessMediator,
    ) -> Self {
        Self {
            store,
            hasher,
            keys,
            access,
        }
    }

    /// Register and return only the primary outcome; compensation warnings
    /// are logged
    pub async fn register(
        &self,
        ctx: &RequestContext,
        request: RegistrationRequest,
    ) -> AdminResult<PersonWithAccount> {
        let Compensated { outcome, warnings } = self.register_detailed(ctx, request).await?;

        for warning in &warnings {
            tracing::error!("Registration compensation incomplete: {:?}", warning);
        }

        outcome
    }

    /// Register and report compensation warnings alongside the outcome.
    ///
    /// The outer error covers validation, deadline and cancellation; the inner
    /// outcome is the workflow's own result.
    pub async fn register_detailed(
        &self,
        ctx: &RequestContext,
        request: RegistrationRequest,
    ) -> AdminResult<Compensated<PersonWithAccount>> {
        request.check()?;

        let this = self.clone();
        ctx.run(async move { Ok(this.run_workflow(request).await) })
            .await
    }

    async fn run_workflow(&self, request: RegistrationRequest) -> Compensated<PersonWithAccount> {
        let key = match self.check_key(&request.key_body).await {
            Ok(key) => key,
            Err(e) => return Compensated::clean(Err(e)),
        };

        let password_hash = match self.hasher.hash(&request.password) {
            Ok(hash) => hash,
            Err(e) => return Compensated::clean(Err(e.into_internal())),
        };

        let account = match self
            .store
            .save_account(NewAccount {
                login: request.login.clone(),
                password_hash,
                created_at: Utc::now(),
                key_id: key.id,
            })
            .await
        {
            Ok(account) => account,
            Err(e @ AdminError::Conflict(_)) => return Compensated::clean(Err(e)),
            Err(e) => return Compensated::clean(Err(e.into_internal())),
        };

        let mut warnings = Vec::new();

        let person = match self
            .store
            .save_person(NewPerson {
                uuid: Uuid::new_v4(),
                first_name: request.first_name,
                middle_name: request.middle_name.filter(|m| !m.trim().is_empty()),
                last_name: request.last_name,
                account_id: account.id,
            })
            .await
        {
            Ok(person) => person,
            Err(e) => {
                tracing::warn!("Saving person for account {} failed: {}", account.id, e);
                self.delete_account(account.id, &mut warnings).await;
                return Compensated {
                    outcome: Err(e.into_internal()),
                    warnings,
                };
            }
        };

        let key = match self.keys.increment_usage(&key).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Consuming key {} failed: {}", key.id, e);
                self.delete_person(person.uuid, &mut warnings).await;
                self.delete_account(account.id, &mut warnings).await;
                let outcome = match e {
                    AdminError::Conflict(_) => {
                        Err(AdminError::Forbidden("usage limit exceeded".to_string()))
                    }
                    other => Err(other.into_internal()),
                };
                return Compensated { outcome, warnings };
            }
        };

        let role = match self.access.resolve_role(account.id).await {
            Ok(role) => role,
            Err(e) => {
                return Compensated {
                    outcome: Err(e.into_internal()),
                    warnings,
                }
            }
        };

        tracing::info!(
            "Registered account {} ({}) with key {} as {}",
            account.id,
            account.login,
            key.id,
            role.name
        );

        Compensated {
            outcome: Ok(PersonWithAccount {
                person,
                account,
                role,
                group_name: key.group_name,
            }),
            warnings,
        }
    }

    /// Key lookup plus validity and exhaustion checks
    async fn check_key(&self, body: &str) -> AdminResult<RegistrationKey> {
        let key = match self.store.key_by_body(body).await {
            Ok(key) => key,
            Err(AdminError::NotFound(_)) => {
                return Err(AdminError::NotFound("invalid key".to_string()))
            }
            Err(e) => return Err(e.into_internal()),
        };

        if !key.is_valid {
            return Err(AdminError::Forbidden("key invalid".to_string()));
        }

        if key.is_exhausted() {
            if let Err(e) = self.keys.invalidate(key.id).await {
                tracing::error!("Failed to invalidate exhausted key {}: {}", key.id, e);
            }
            return Err(AdminError::Forbidden("usage limit exceeded".to_string()));
        }

        Ok(key)
    }

    async fn delete_account(&self, account_id: AccountId, warnings: &mut Vec<CompensationWarning>) {
        if let Err(e) = self.store.hard_delete_account(account_id).await {
            tracing::error!("Compensating delete of account {} failed: {}", account_id, e);
            warnings.push(CompensationWarning::AccountNotDeleted {
                account_id,
                reason: e.to_string(),
            });
        }
    }

    async fn delete_person(&self, person_uuid: Uuid, warnings: &mut Vec<CompensationWarning>) {
        if let Err(e) = self.store.hard_delete_person(person_uuid).await {
            tracing::error!("Compensating delete of person {} failed: {}", person_uuid, e);
            warnings.push(CompensationWarning::PersonNotDeleted {
                person_uuid,
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessMatch;
    use crate::auth::hasher::test_hasher;
    use crate::config::ServerConfig;
    use crate::db::models::RoleId;
    use crate::db::store::test_support::*;
    use crate::db::SqliteStore;
    use sqlx::SqlitePool;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    fn request(key_body: &str, login: &str) -> RegistrationRequest {
        RegistrationRequest {
            key_body: key_body.to_string(),
            login: login.to_string(),
            password: "correct horse".to_string(),
            first_name: "Ada".to_string(),
            middle_name: None,
            last_name: "Lovelace".to_string(),
        }
    }

    fn services(store: &Arc<SqliteStore>) -> (KeyLifecycle, RegistrationService) {
        let keys = KeyLifecycle::new(store.clone(), 12);
        let access = AccessMediator::new(store.clone(), AccessMatch::Disjoint);
        let registration = RegistrationService::new(
            store.clone(),
            Arc::new(test_hasher()),
            keys.clone(),
            access,
        );
        (keys, registration)
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_single_use_key() {
        let (_pool, store) = memory_store().await;
        let (keys, registration) = services(&store);

        let issued = keys.new_key(&ctx(), RoleId(2), 1, "G1").await.unwrap();

        let registered = registration
            .register(&ctx(), request(&issued.key.body, "teacher1"))
            .await
            .unwrap();
        assert_eq!(registered.role.name, "teacher");
        assert_eq!(registered.group_name, "G1");
        assert_eq!(registered.person.account_id, registered.account.id);

        let key = store.key_by_id(issued.key.id).await.unwrap();
        assert_eq!(key.current_usages, 1);
        assert!(key.is_valid);

        let second = registration
            .register(&ctx(), request(&issued.key.body, "teacher2"))
            .await;
        assert!(matches!(second, Err(AdminError::Forbidden(_))));

        let key = store.key_by_id(issued.key.id).await.unwrap();
        assert!(!key.is_valid);
        assert!(key.invalidated_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_key_body() {
        let (_pool, store) = memory_store().await;
        let (_keys, registration) = services(&store);

        let result = registration
            .register(&ctx(), request("NoSuchKeyXy", "someone"))
            .await;
        match result {
            Err(AdminError::NotFound(msg)) => assert_eq!(msg, "invalid key"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidated_key_forbidden() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 5, "G1").await.unwrap();
        keys.invalidate_key(&ctx(), issued.key.id).await.unwrap();

        let result = registration
            .register(&ctx(), request(&issued.key.body, "late"))
            .await;
        match result {
            Err(AdminError::Forbidden(msg)) => assert_eq!(msg, "key invalid"),
            other => panic!("Expected Forbidden, got {:?}", other),
        }
        assert_eq!(count(&pool, "account").await, 0);
    }

    #[tokio::test]
    async fn test_validation_precedes_lookup() {
        let (_pool, store) = memory_store().await;
        let (_keys, registration) = services(&store);

        let mut bad = request("Whatever", "ok-login");
        bad.password = "short".to_string();
        let result = registration.register(&ctx(), bad).await;
        assert!(matches!(result, Err(AdminError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_longest_configured_key_is_redeemable() {
        let (_pool, store) = memory_store().await;
        let mut config = ServerConfig::default();
        config.authentication.jwt_secret = "registration-test-secret-0123456789".to_string();
        config.keys.body_length = MAX_KEY_BODY_LENGTH;
        config.validate().unwrap();

        let keys = KeyLifecycle::new(store.clone(), config.keys.body_length);
        let registration = RegistrationService::new(
            store.clone(),
            Arc::new(test_hasher()),
            keys.clone(),
            AccessMediator::new(store.clone(), AccessMatch::Disjoint),
        );

        let issued = keys.new_key(&ctx(), RoleId(3), 1, "G1").await.unwrap();
        assert_eq!(issued.key.body.len(), MAX_KEY_BODY_LENGTH);

        let registered = registration
            .register(&ctx(), request(&issued.key.body, "long-key"))
            .await
            .unwrap();
        assert_eq!(registered.role.name, "student");
    }

    #[tokio::test]
    async fn test_overlong_key_body_rejected() {
        let (_pool, store) = memory_store().await;
        let (_keys, registration) = services(&store);

        let body = "K".repeat(MAX_KEY_BODY_LENGTH + 1);
        match registration.register(&ctx(), request(&body, "ok-login")).await {
            Err(AdminError::InvalidArgument(message)) => {
                assert!(message.contains("at most"), "{}", message)
            }
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_login_is_conflict() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 5, "G1").await.unwrap();

        registration
            .register(&ctx(), request(&issued.key.body, "twin"))
            .await
            .unwrap();
        let result = registration
            .register(&ctx(), request(&issued.key.body, "twin"))
            .await;

        assert!(matches!(result, Err(AdminError::Conflict(_))));
        assert_eq!(count(&pool, "account").await, 1);
        assert_eq!(store.key_by_id(issued.key.id).await.unwrap().current_usages, 1);
    }

    #[tokio::test]
    async fn test_person_failure_deletes_account() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 5, "G1").await.unwrap();

        sqlx::query("DROP TABLE person").execute(&pool).await.unwrap();

        let detailed = registration
            .register_detailed(&ctx(), request(&issued.key.body, "orphan"))
            .await
            .unwrap();

        assert!(matches!(detailed.outcome, Err(AdminError::Internal(_))));
        assert!(detailed.warnings.is_empty());
        assert_eq!(count(&pool, "account").await, 0);
        assert_eq!(store.key_by_id(issued.key.id).await.unwrap().current_usages, 0);
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_original_error() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 5, "G1").await.unwrap();

        sqlx::query("DROP TABLE person").execute(&pool).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER block_account_delete BEFORE DELETE ON account
             BEGIN SELECT RAISE(ABORT, 'account delete blocked'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let detailed = registration
            .register_detailed(&ctx(), request(&issued.key.body, "stuck"))
            .await
            .unwrap();

        match &detailed.outcome {
            Err(AdminError::Internal(msg)) => assert!(msg.contains("person")),
            other => panic!("Expected Internal person error, got {:?}", other),
        }
        assert_eq!(detailed.warnings.len(), 1);
        assert!(matches!(
            detailed.warnings[0],
            CompensationWarning::AccountNotDeleted { .. }
        ));
        // the orphaned account is left behind
        assert_eq!(count(&pool, "account").await, 1);

        // the plain entry point reports the same primary error
        let plain = registration
            .register(&ctx(), request(&issued.key.body, "stuck2"))
            .await;
        assert!(matches!(plain, Err(AdminError::Internal(_))));
    }

    #[tokio::test]
    async fn test_lost_consume_race_rolls_back() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 2, "G1").await.unwrap();

        // Another registration consumes the key between our check and our increment
        sqlx::query(
            "CREATE TRIGGER steal_usage AFTER INSERT ON person
             BEGIN UPDATE registration_key SET current_usages = max_usages; END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let detailed = registration
            .register_detailed(&ctx(), request(&issued.key.body, "racer"))
            .await
            .unwrap();

        match &detailed.outcome {
            Err(AdminError::Forbidden(msg)) => assert_eq!(msg, "usage limit exceeded"),
            other => panic!("Expected Forbidden, got {:?}", other),
        }
        assert!(detailed.warnings.is_empty());
        assert_eq!(count(&pool, "account").await, 0);
        assert_eq!(count(&pool, "person").await, 0);
        assert_eq!(store.key_by_id(issued.key.id).await.unwrap().current_usages, 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_has_no_effect() {
        let (pool, store) = memory_store().await;
        let (keys, registration) = services(&store);
        let issued = keys.new_key(&ctx(), RoleId(3), 5, "G1").await.unwrap();
        let expired =
            RequestContext::with_deadline(tokio::time::Instant::now() - Duration::from_millis(1));

        let result = registration
            .register(&expired, request(&issued.key.body, "too-late"))
            .await;

        assert!(matches!(result, Err(AdminError::DeadlineExceeded)));
        assert_eq!(count(&pool, "account").await, 0);
        assert_eq!(store.key_by_id(issued.key.id).await.unwrap().current_usages, 0);
    }
}
