//! Application context and dependency injection
use crate::{
    access::{AccessMatch, AccessMediator, PracticeGroupMediator},
    auth::{Argon2Hasher, Authenticator, CredentialHasher, TokenIssuer},
    config::ServerConfig,
    db::{self, models::RoleId, EntityStore, SqliteStore},
    error::AdminResult,
    keys::{KeyLifecycle, KeyWithRole},
    registration::RegistrationService,
    request::{Principal, RequestContext},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Role given to the key issued on first start
const BOOTSTRAP_ROLE: RoleId = RoleId(1);

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: Arc<dyn EntityStore>,
    pub access: AccessMediator,
    pub practices: PracticeGroupMediator,
    pub keys: KeyLifecycle,
    pub registration: RegistrationService,
    pub auth: Authenticator,
    /// Cancelled on shutdown; every request context derives from it
    pub shutdown: CancellationToken,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AdminResult<Self> {
        // Validate configuration
        config.validate()?;

        let db = db::create_pool(&config.storage).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let hasher = Arc::new(Argon2Hasher::new(&config.hashing)?);

        Ok(Self::with_pool(config, db, hasher))
    }

    /// Wire services over an already migrated pool
    pub fn with_pool(
        config: ServerConfig,
        db: SqlitePool,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Self {
        let store: Arc<dyn EntityStore> = Arc::new(SqliteStore::new(db.clone()));

        let access = AccessMediator::new(
            store.clone(),
            AccessMatch::from_strict(config.access.strict_pairs),
        );
        let practices = PracticeGroupMediator::new(store.clone());
        let keys = KeyLifecycle::new(store.clone(), config.keys.body_length);
        let registration =
            RegistrationService::new(store.clone(), hasher.clone(), keys.clone(), access.clone());
        let auth = Authenticator::new(
            store.clone(),
            hasher,
            TokenIssuer::new(&config.authentication),
        );

        Self {
            config: Arc::new(config),
            db,
            store,
            access,
            practices,
            keys,
            registration,
            auth,
            shutdown: CancellationToken::new(),
        }
    }

    /// Request context bounded by the configured timeout and the shutdown token
    pub fn request_context(&self, principal: Option<Principal>) -> RequestContext {
        let ctx = RequestContext::with_timeout(self.config.requests.timeout())
            .with_cancellation(self.shutdown.child_token());

        match principal {
            Some(principal) => ctx.with_principal(principal),
            None => ctx,
        }
    }

    /// Issue a single-use admin key when no key exists yet, so the first
    /// administrator can register
    pub async fn bootstrap(&self) -> AdminResult<Option<KeyWithRole>> {
        if self.store.count_keys().await? > 0 {
            return Ok(None);
        }

        let ctx = self.request_context(None);
        let key = self.keys.new_key(&ctx, BOOTSTRAP_ROLE, 1, "staff").await?;
        tracing::warn!(
            "No registration keys found; issued bootstrap {} key: {}",
            key.role.name,
            key.key.body
        );

        Ok(Some(key))
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
