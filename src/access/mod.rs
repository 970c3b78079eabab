//! Access mediator
//!
//! Answers access-control queries by walking Account -> Key -> Role ->
//! Permissions. Nothing is cached; every call re-resolves from the store.

pub mod practice;

pub use practice::PracticeGroupMediator;

use crate::{
    db::{
        models::{AccountId, Permission, Role},
        EntityStore,
    },
    error::{AdminError, AdminResult},
    request::RequestContext,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How object and action are matched against a role's permission set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMatch {
    /// Some permission names the object and some, possibly other, permission
    /// names the action
    #[default]
    Disjoint,
    /// One permission must name both the object and the action
    StrictPair,
}

impl AccessMatch {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            AccessMatch::StrictPair
        } else {
            AccessMatch::Disjoint
        }
    }

    /// Evaluate the match over live permissions only
    pub fn matches(&self, permissions: &[Permission], object: &str, action: &str) -> bool {
        let live = || permissions.iter().filter(|p| p.is_live());
        match self {
            AccessMatch::Disjoint => {
                live().any(|p| p.object.name == object) && live().any(|p| p.action.name == action)
            }
            AccessMatch::StrictPair => {
                live().any(|p| p.object.name == object && p.action.name == action)
            }
        }
    }
}

/// A role and its object -> actions projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionView {
    pub role: Role,
    pub permissions: BTreeMap<String, Vec<String>>,
}

impl RolePermissionView {
    fn project(role: Role, permissions: &[Permission]) -> Self {
        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for permission in permissions.iter().filter(|p| p.is_live()) {
            grouped
                .entry(permission.object.name.clone())
                .or_default()
                .insert(permission.action.name.clone());
        }

        Self {
            role,
            permissions: grouped
                .into_iter()
                .map(|(object, actions)| (object, actions.into_iter().collect()))
                .collect(),
        }
    }
}

/// Access mediator service
#[derive(Clone)]
pub struct AccessMediator {
    store: Arc<dyn EntityStore>,
    mode: AccessMatch,
}

impl AccessMediator {
    pub fn new(store: Arc<dyn EntityStore>, mode: AccessMatch) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> AccessMatch {
        self.mode
    }

    /// Whether the account may perform `action` on `object`
    pub async fn has_access(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        object: &str,
        action: &str,
    ) -> AdminResult<bool> {
        let this = self.clone();
        let object = object.to_string();
        let action = action.to_string();
        ctx.run(async move { this.resolve_access(account_id, &object, &action).await })
            .await
    }

    /// Role of the account plus its permissions grouped by object
    pub async fn permissions_by_account_id(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> AdminResult<RolePermissionView> {
        let this = self.clone();
        ctx.run(async move { this.resolve_permissions(account_id).await })
            .await
    }

    pub async fn role_by_account_id(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> AdminResult<Role> {
        let this = self.clone();
        ctx.run(async move { this.resolve_role(account_id).await })
            .await
    }

    /// Account -> Key -> Role, for use inside an already dispatched worker
    pub async fn resolve_role(&self, account_id: AccountId) -> AdminResult<Role> {
        let account = self.store.account_by_id(account_id).await?;
        let key = self.store.key_by_id(account.key_id).await?;
        self.store.role_by_id(key.role_id).await
    }

    pub async fn resolve_access(
        &self,
        account_id: AccountId,
        object: &str,
        action: &str,
    ) -> AdminResult<bool> {
        let role = self.resolve_role(account_id).await?;
        let permissions = self.store.permissions_by_role_id(role.id).await?;

        if permissions.is_empty() {
            return Err(AdminError::AmbiguousResult(format!(
                "role {} has no permissions",
                role.name
            )));
        }

        if role.lifecycle.is_deleted() {
            tracing::debug!("Role {} is deleted, denying {}/{}", role.name, object, action);
            return Ok(false);
        }

        let allowed = self.mode.matches(&permissions, object, action);
        tracing::debug!(
            "Access check: account={} role={} object={} action={} allowed={}",
            account_id,
            role.name,
            object,
            action,
            allowed
        );

        Ok(allowed)
    }

    pub async fn resolve_permissions(&self, account_id: AccountId) -> AdminResult<RolePermissionView> {
        let role = self.resolve_role(account_id).await?;
        let permissions = self.store.permissions_by_role_id(role.id).await?;
        Ok(RolePermissionView::project(role, &permissions))
    }
}
