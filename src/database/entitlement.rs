use log::warn;
use sqlx::SqlitePool;

use super::kv;
use crate::error::AppResult;
use crate::models::{EntitlementDecision, PersistedEntitlement, SubscriptionGroupStatus};

pub const PREMIUM_KEY: &str = "entitlement.premium";
pub const EVER_ACTIVATED_KEY: &str = "entitlement.premium_ever_activated";
pub const GROUP_STATUS_KEY: &str = "entitlement.subscription_group_status";

pub async fn get(pool: &SqlitePool) -> AppResult<PersistedEntitlement> {
    let rows = kv::get_many(pool, &[PREMIUM_KEY, EVER_ACTIVATED_KEY, GROUP_STATUS_KEY]).await?;

    let mut state = PersistedEntitlement::default();
    for row in rows {
        match row.key.as_str() {
            PREMIUM_KEY => state.premium = row.value.parse().unwrap_or(false),
            EVER_ACTIVATED_KEY => state.premium_ever_activated = row.value.parse().unwrap_or(false),
            GROUP_STATUS_KEY => {
                state.group_status = SubscriptionGroupStatus::parse(&row.value).unwrap_or_else(|| {
                    warn!("Unknown stored group status '{}', treating as none", row.value);
                    SubscriptionGroupStatus::None
                })
            }
            _ => {}
        }
    }

    Ok(state)
}

/// Writes all three flags in one transaction. The sticky flag is merged with
/// the stored value inside the same transaction.
pub async fn put(
    pool: &SqlitePool,
    decision: &EntitlementDecision,
    sticky_activation: bool,
) -> AppResult<PersistedEntitlement> {
    let mut tx = pool.begin().await?;

    let ever_activated = kv::get_in(&mut tx, EVER_ACTIVATED_KEY)
        .await?
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    let previous = PersistedEntitlement {
        premium_ever_activated: ever_activated,
        ..PersistedEntitlement::default()
    };
    let next = previous.apply(decision, sticky_activation);

    kv::upsert(&mut tx, PREMIUM_KEY, &next.premium.to_string()).await?;
    kv::upsert(&mut tx, EVER_ACTIVATED_KEY, &next.premium_ever_activated.to_string()).await?;
    kv::upsert(&mut tx, GROUP_STATUS_KEY, next.group_status.as_str()).await?;

    tx.commit().await?;
    Ok(next)
}
