//! Registration key lifecycle
//!
//! Issues keys, counts their consumption, invalidates them manually or on
//! exhaustion, and lists them with a validity filter.
use crate::{
    db::{
        models::{KeyId, KeyPatch, KeyState, NewKey, RegistrationKey, Role, RoleId},
        EntityStore,
    },
    error::{AdminError, AdminResult},
    request::RequestContext,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Group label used when a key is issued without one
pub const UNKNOWN_GROUP: &str = "unknown";

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

const BODY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Attempts at finding an unused body before giving up
const BODY_ATTEMPTS: usize = 3;

/// Registration key joined with its role, for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWithRole {
    #[serde(flatten)]
    pub key: RegistrationKey,
    pub state: KeyState,
    pub role: Role,
}

impl KeyWithRole {
    fn new(key: RegistrationKey, role: Role) -> Self {
        Self {
            state: key.state(),
            key,
            role,
        }
    }
}

/// Narrowed view returned after invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidatedKey {
    pub id: KeyId,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
    pub is_valid: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl From<RegistrationKey> for InvalidatedKey {
    fn from(key: RegistrationKey) -> Self {
        Self {
            id: key.id,
            role_id: key.role_id,
            created_at: key.created_at,
            is_valid: key.is_valid,
            invalidated_at: key.invalidated_at,
        }
    }
}

/// Validity filter applied to a fetched page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFilter {
    #[default]
    All,
    Invalid,
    Valid,
}

impl KeyFilter {
    pub fn accepts(&self, key: &RegistrationKey) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Invalid => !key.is_valid,
            KeyFilter::Valid => key.is_valid,
        }
    }
}

/// Pagination and filter for key listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(default, alias = "state")]
    pub filter: KeyFilter,
}

impl ListParams {
    /// Limit clamped to `1..=MAX_PAGE_LIMIT`
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Generate a random mixed-case alphabetic key body
pub fn generate_body(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| BODY_ALPHABET[rng.gen_range(0..BODY_ALPHABET.len())] as char)
        .collect()
}

/// Registration key lifecycle service
#[derive(Clone)]
pub struct KeyLifecycle {
    store: Arc<dyn EntityStore>,
    body_length: usize,
}

impl KeyLifecycle {
    pub fn new(store: Arc<dyn EntityStore>, body_length: usize) -> Self {
        Self { store, body_length }
    }

    /// Issue a new key for `role_id`
    pub async fn new_key(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        max_usages: i32,
        group_name: &str,
    ) -> AdminResult<KeyWithRole> {
        if max_usages <= 0 {
            return Err(AdminError::InvalidArgument(format!(
                "max usages must be positive, got {}",
                max_usages
            )));
        }

        let group_name = match group_name.trim() {
            "" => UNKNOWN_GROUP.to_string(),
            group => group.to_string(),
        };

        let this = self.clone();
        ctx.run(async move {
            let role = this.store.role_by_id(role_id).await?;

            let mut attempt = 0;
            let key = loop {
                attempt += 1;
                let result = this
                    .store
                    .insert_key(NewKey {
                        role_id,
                        body: generate_body(this.body_length),
                        max_usages,
                        group_name: group_name.clone(),
                        created_at: Utc::now(),
                    })
                    .await;

                match result {
                    Err(AdminError::Conflict(_)) if attempt < BODY_ATTEMPTS => {
                        tracing::debug!("Key body collision, regenerating (attempt {})", attempt);
                    }
                    other => break other?,
                }
            };

            tracing::info!(
                "Issued registration key {} for role {} (group {}, {} usages)",
                key.id,
                role.name,
                key.group_name,
                key.max_usages
            );

            Ok(KeyWithRole::new(key, role))
        })
        .await
    }

    /// Count one consumption of `key`
    pub async fn increment(
        &self,
        ctx: &RequestContext,
        key: RegistrationKey,
    ) -> AdminResult<RegistrationKey> {
        let this = self.clone();
        ctx.run(async move { this.increment_usage(&key).await })
            .await
    }

    /// Guarded `current_usages + 1` against the observed value. Fails with
    /// `Conflict` if the key changed, was invalidated or is already exhausted.
    pub async fn increment_usage(&self, key: &RegistrationKey) -> AdminResult<RegistrationKey> {
        self.store
            .update_key(key.id, KeyPatch::consume(key.current_usages))
            .await
    }

    /// Mark a key invalid; repeated calls succeed and refresh the timestamp
    pub async fn invalidate_key(&self, ctx: &RequestContext, id: KeyId) -> AdminResult<InvalidatedKey> {
        let this = self.clone();
        ctx.run(async move { this.invalidate(id).await }).await
    }

    pub async fn invalidate(&self, id: KeyId) -> AdminResult<InvalidatedKey> {
        let key = self.store.update_key(id, KeyPatch::invalidate(Utc::now())).await?;
        tracing::info!("Invalidated registration key {}", id);
        Ok(key.into())
    }

    pub async fn key_by_id(&self, ctx: &RequestContext, id: KeyId) -> AdminResult<KeyWithRole> {
        let store = self.store.clone();
        ctx.run(async move {
            let key = store.key_by_id(id).await?;
            let role = store.role_by_id(key.role_id).await?;
            Ok(KeyWithRole::new(key, role))
        })
        .await
    }

    /// One page of keys, filtered after fetching. Keys whose role cannot be
    /// resolved are skipped.
    pub async fn keys_by_params(
        &self,
        ctx: &RequestContext,
        params: ListParams,
    ) -> AdminResult<Vec<KeyWithRole>> {
        let store = self.store.clone();
        ctx.run(async move {
            let page = store.keys_by_params(params.limit(), params.offset()).await?;

            let mut keys = Vec::with_capacity(page.len());
            for key in page.into_iter().filter(|k| params.filter.accepts(k)) {
                match store.role_by_id(key.role_id).await {
                    Ok(role) => keys.push(KeyWithRole::new(key, role)),
                    Err(e) => {
                        tracing::warn!("Skipping key {}: role lookup failed: {}", key.id, e);
                    }
                }
            }

            Ok(keys)
        })
        .await
    }

    /// Invalidate every key that is still valid but fully consumed
    pub async fn sweep_exhausted(&self) -> AdminResult<usize> {
        let exhausted = self.store.exhausted_valid_keys().await?;

        let mut invalidated = 0;
        for key in exhausted {
            match self.invalidate(key.id).await {
                Ok(_) => invalidated += 1,
                Err(e) => tracing::warn!("Failed to invalidate exhausted key {}: {}", key.id, e),
            }
        }

        Ok(invalidated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_support::*;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_generate_body() {
        let body = generate_body(12);
        assert_eq!(body.len(), 12);
        assert!(body.chars().all(|c| c.is_ascii_alphabetic()));
        assert_ne!(generate_body(12), body);
    }

    #[test]
    fn test_list_params_clamped() {
        let params = ListParams {
            limit: Some(10_000),
            offset: Some(-4),
            filter: KeyFilter::All,
        };
        assert_eq!(params.limit(), MAX_PAGE_LIMIT);
        assert_eq!(params.offset(), 0);
        assert_eq!(ListParams::default().limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(
            ListParams {
                limit: Some(0),
                ..Default::default()
            }
            .limit(),
            1
        );
    }

    #[tokio::test]
    async fn test_new_key_defaults() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);

        let issued = keys.new_key(&ctx(), RoleId(3), 4, "  ").await.unwrap();
        assert_eq!(issued.key.body.len(), 9);
        assert_eq!(issued.key.group_name, UNKNOWN_GROUP);
        assert_eq!(issued.key.current_usages, 0);
        assert!(issued.key.is_valid);
        assert_eq!(issued.state, KeyState::Active);
        assert_eq!(issued.role.name, "student");
    }

    #[tokio::test]
    async fn test_new_key_rejects_non_positive_usages() {
        let (pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);

        let result = keys.new_key(&ctx(), RoleId(3), 0, "G1").await;
        assert!(matches!(result, Err(AdminError::InvalidArgument(_))));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registration_key")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_new_key_unknown_role() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);

        let result = keys.new_key(&ctx(), RoleId(42), 1, "G1").await;
        assert!(matches!(result, Err(AdminError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_increment_counts_usages() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);
        let mut key = keys.new_key(&ctx(), RoleId(3), 3, "G1").await.unwrap().key;

        for n in 1..=3 {
            key = keys.increment(&ctx(), key).await.unwrap();
            assert_eq!(key.current_usages, n);
            assert!(key.is_valid);
        }
        assert_eq!(key.state(), KeyState::Exhausted);

        // a fourth consumption is refused
        let result = keys.increment(&ctx(), key.clone()).await;
        assert!(matches!(result, Err(AdminError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);
        let issued = keys.new_key(&ctx(), RoleId(2), 2, "G1").await.unwrap();

        let first = keys.invalidate_key(&ctx(), issued.key.id).await.unwrap();
        assert!(!first.is_valid);
        assert!(first.invalidated_at.is_some());

        let second = keys.invalidate_key(&ctx(), issued.key.id).await.unwrap();
        assert!(!second.is_valid);
        assert!(second.invalidated_at.is_some());

        let stored = keys.key_by_id(&ctx(), issued.key.id).await.unwrap();
        assert_eq!(stored.state, KeyState::Invalidated);
        assert_eq!(stored.key.current_usages, 0);
        assert_eq!(stored.key.body, issued.key.body);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);

        let result = keys.invalidate_key(&ctx(), KeyId(9)).await;
        assert!(matches!(result, Err(AdminError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalidate_with_expired_deadline_has_no_effect() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);
        let issued = keys.new_key(&ctx(), RoleId(2), 2, "G1").await.unwrap();
        let expired =
            RequestContext::with_deadline(tokio::time::Instant::now() - Duration::from_millis(1));

        let result = keys.invalidate_key(&expired, issued.key.id).await;
        assert!(matches!(result, Err(AdminError::DeadlineExceeded)));

        let stored = keys.key_by_id(&ctx(), issued.key.id).await.unwrap();
        assert!(stored.key.is_valid);
    }

    #[tokio::test]
    async fn test_listing_filters_and_skips_orphans() {
        let (pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);
        let orphan_role = insert_role(&pool, "temporary", &[("keys", "read")]).await;

        let valid = keys.new_key(&ctx(), RoleId(3), 1, "G1").await.unwrap();
        let invalid = keys.new_key(&ctx(), RoleId(3), 1, "G1").await.unwrap();
        keys.invalidate_key(&ctx(), invalid.key.id).await.unwrap();
        let orphan = keys.new_key(&ctx(), orphan_role, 1, "G1").await.unwrap();

        // Remove the role out from under the key
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM role WHERE id = ?1")
            .bind(orphan_role)
            .execute(&pool)
            .await
            .unwrap();

        let all = keys.keys_by_params(&ctx(), ListParams::default()).await.unwrap();
        let ids: Vec<KeyId> = all.iter().map(|k| k.key.id).collect();
        assert_eq!(ids, vec![valid.key.id, invalid.key.id]);
        assert!(!ids.contains(&orphan.key.id));

        let only_valid = keys
            .keys_by_params(
                &ctx(),
                ListParams {
                    filter: KeyFilter::Valid,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(only_valid.len(), 1);
        assert_eq!(only_valid[0].key.id, valid.key.id);

        let only_invalid = keys
            .keys_by_params(
                &ctx(),
                ListParams {
                    filter: KeyFilter::Invalid,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(only_invalid.len(), 1);
        assert_eq!(only_invalid[0].state, KeyState::Invalidated);

        // filtering happens after paging
        let first_page_invalid = keys
            .keys_by_params(
                &ctx(),
                ListParams {
                    limit: Some(1),
                    offset: None,
                    filter: KeyFilter::Invalid,
                },
            )
            .await
            .unwrap();
        assert!(first_page_invalid.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_invalidates_exhausted_only() {
        let (_pool, store) = memory_store().await;
        let keys = KeyLifecycle::new(store.clone(), 9);
        let spent = keys.new_key(&ctx(), RoleId(3), 1, "G1").await.unwrap();
        let fresh = keys.new_key(&ctx(), RoleId(3), 2, "G1").await.unwrap();
        keys.increment(&ctx(), spent.key.clone()).await.unwrap();
        keys.increment(&ctx(), fresh.key.clone()).await.unwrap();

        assert_eq!(keys.sweep_exhausted().await.unwrap(), 1);
        assert_eq!(keys.sweep_exhausted().await.unwrap(), 0);

        let spent = keys.key_by_id(&ctx(), spent.key.id).await.unwrap();
        let fresh = keys.key_by_id(&ctx(), fresh.key.id).await.unwrap();
        assert_eq!(spent.state, KeyState::Invalidated);
        assert_eq!(fresh.state, KeyState::Active);
    }
}
