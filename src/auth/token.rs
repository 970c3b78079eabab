//! Session tokens (HS256 JWT)
use crate::{
    config::AuthConfig,
    db::models::AccountId,
    error::{AdminError, AdminResult},
    request::Principal,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl: Duration::seconds(config.token_ttl_secs),
        }
    }

    /// Sign a token for `account_id`, returning it with its expiry
    pub fn issue(&self, account_id: AccountId) -> AdminResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: account_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AdminError::Internal(format!("Failed to generate token: {}", e)))?;

        Ok((token, expires_at))
    }

    /// Verify signature and expiry, returning the principal named by `sub`
    pub fn verify(&self, token: &str) -> AdminResult<Principal> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AdminError::Unauthenticated("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    AdminError::Unauthenticated("Invalid token signature".to_string())
                }
                _ => AdminError::Unauthenticated(format!("Invalid token: {}", e)),
            }
        })?;

        let account_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AdminError::Unauthenticated("Invalid JWT: malformed 'sub' claim".to_string()))?;

        Ok(Principal {
            account_id: AccountId(account_id),
        })
    }
}
