//! Background task implementations
use crate::{context::AppContext, error::AdminResult};

/// Invalidate keys that are still valid but fully consumed
pub async fn sweep_exhausted_keys(ctx: &AppContext) -> AdminResult<usize> {
    ctx.keys.sweep_exhausted().await
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> AdminResult<()> {
    ctx.store.ping().await
}
