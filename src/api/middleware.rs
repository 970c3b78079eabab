//! Authentication extractors and permission guards
use crate::{
    context::AppContext,
    error::{AdminError, AdminResult},
    request::{Principal, RequestContext},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Authenticated request: the verified principal and a request context
/// carrying it
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub request: RequestContext,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = AdminError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AdminError::Unauthenticated("Missing authorization header".to_string()))?;

        let principal = state.auth.verify_token(&token)?;

        Ok(AuthContext {
            principal,
            request: state.request_context(Some(principal)),
        })
    }
}

/// Anonymous request context
#[derive(Debug, Clone)]
pub struct Anonymous {
    pub request: RequestContext,
}

#[async_trait]
impl FromRequestParts<AppContext> for Anonymous {
    type Rejection = AdminError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        Ok(Anonymous {
            request: state.request_context(None),
        })
    }
}

impl AuthContext {
    /// Fail with `Forbidden` unless the principal may perform `action` on `object`
    pub async fn require(&self, state: &AppContext, object: &str, action: &str) -> AdminResult<()> {
        let allowed = state
            .access
            .has_access(&self.request, self.principal.account_id, object, action)
            .await?;

        if !allowed {
            tracing::warn!(
                "Account {} denied {} on {}",
                self.principal.account_id,
                action,
                object
            );
            return Err(AdminError::Forbidden(format!(
                "{} on {} not permitted",
                action, object
            )));
        }

        Ok(())
    }
}
