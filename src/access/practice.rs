//! Practice-group mediator: group-scoped access to issued practices
use crate::{
    db::{
        models::{AccountId, PracticeId},
        EntityStore,
    },
    error::{AdminError, AdminResult},
    request::RequestContext,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct PracticeGroupMediator {
    store: Arc<dyn EntityStore>,
}

impl PracticeGroupMediator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Whether the account's key group is one of the practice's target groups.
    /// A disjoint or empty target set is `false`, not an error.
    pub async fn issued_group_match(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        practice_id: PracticeId,
    ) -> AdminResult<bool> {
        let store = self.store.clone();
        ctx.run(async move {
            let (group, practice) = tokio::try_join!(
                async {
                    let account = store.account_by_id(account_id).await?;
                    let key = store.key_by_id(account.key_id).await?;
                    Ok::<_, AdminError>(key.group_name)
                },
                store.issued_practice_by_id(practice_id),
            )?;

            let matched = practice.target_groups.iter().any(|g| *g == group);
            tracing::debug!(
                "Group match: account={} group={} practice={} matched={}",
                account_id,
                group,
                practice_id,
                matched
            );

            Ok(matched)
        })
        .await
    }
}
