//! Authentication: password login and bearer-token verification

pub mod hasher;
pub mod token;

pub use hasher::{Argon2Hasher, CredentialHasher};
pub use token::TokenIssuer;

use crate::{
    db::{models::AccountId, EntityStore},
    error::{AdminError, AdminResult},
    request::{Principal, RequestContext},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Issued session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub account_id: AccountId,
    pub expires_at: DateTime<Utc>,
}

/// Login and token verification service
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn EntityStore>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: TokenIssuer,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    /// Authenticate by login and password and issue a session token
    pub async fn login(
        &self,
        ctx: &RequestContext,
        login: &str,
        password: &str,
    ) -> AdminResult<Session> {
        let this = self.clone();
        let login = login.to_string();
        let password = password.to_string();

        ctx.run(async move {
            let account = match this.store.account_by_login(&login).await {
                Ok(account) => account,
                Err(AdminError::NotFound(_)) => {
                    tracing::debug!("Login failed: unknown login {}", login);
                    return Err(invalid_credentials());
                }
                Err(e) => return Err(e),
            };

            if !account.is_active || account.deactivated_at.is_some() {
                return Err(AdminError::Forbidden("Account is deactivated".to_string()));
            }

            if !this.hasher.verify(&password, &account.password_hash)? {
                tracing::debug!("Login failed: wrong password for account {}", account.id);
                return Err(invalid_credentials());
            }

            let (token, expires_at) = this.tokens.issue(account.id)?;
            tracing::info!("Account {} logged in", account.id);

            Ok(Session {
                token,
                account_id: account.id,
                expires_at,
            })
        })
        .await
    }

    /// Resolve a bearer token to its principal
    pub fn verify_token(&self, token: &str) -> AdminResult<Principal> {
        self.tokens.verify(token)
    }
}

fn invalid_credentials() -> AdminError {
    AdminError::Unauthenticated("invalid credentials".to_string())
}
