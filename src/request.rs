//! Request-scoped execution context
//!
//! Every core operation runs as exactly one spawned worker raced against the
//! request deadline and its cancellation token. A worker that loses the race
//! is detached, not aborted: it runs to completion and its result is dropped.

use crate::{
    db::models::AccountId,
    error::{AdminError, AdminResult},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub account_id: AccountId,
}

/// Deadline, cancellation token and optional principal of one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
    principal: Option<Principal>,
}

impl RequestContext {
    /// Context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline,
            cancel: CancellationToken::new(),
            principal: None,
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Share an externally owned token, e.g. a server shutdown token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn principal(&self) -> Option<Principal> {
        self.principal
    }

    /// The principal, or `Unauthenticated` for anonymous requests
    pub fn require_principal(&self) -> AdminResult<Principal> {
        self.principal
            .ok_or_else(|| AdminError::Unauthenticated("authentication required".to_string()))
    }

    /// Run `work` on its own task and return the first of its result, the
    /// deadline or cancellation.
    ///
    /// Nothing is dispatched when the deadline has already passed or the token
    /// is already cancelled, so such a call has no observable effect.
    pub async fn run<T, F>(&self, work: F) -> AdminResult<T>
    where
        F: Future<Output = AdminResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if Instant::now() >= self.deadline {
            return Err(AdminError::DeadlineExceeded);
        }
        if self.cancel.is_cancelled() {
            return Err(AdminError::Cancelled);
        }

        let worker = tokio::spawn(work);

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                tracing::debug!("Request cancelled, detaching worker");
                Err(AdminError::Cancelled)
            }
            _ = tokio::time::sleep_until(self.deadline) => {
                tracing::warn!("Request deadline exceeded, detaching worker");
                Err(AdminError::DeadlineExceeded)
            }
            joined = worker => match joined {
                Ok(result) => result,
                Err(e) => Err(AdminError::Internal(format!("Worker task failed: {}", e))),
            },
        }
    }
}
