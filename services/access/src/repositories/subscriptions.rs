//! Read-only view of the membership table maintained by the admin directory

use async_trait::async_trait;
use common::error::DatabaseError;
use sqlx::{PgPool, Row};

use crate::{
    error::StoreError,
    models::{Subscription, SubscriptionStatus, UserId},
    subscription::SubscriptionStore,
};

/// Subscription repository
///
/// Expects `subscriptions(user_id TEXT PRIMARY KEY, status TEXT, valid_until TIMESTAMPTZ)`.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status, valid_until
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(DatabaseError::Query)?;
        let status: SubscriptionStatus =
            status.parse().map_err(|detail| DatabaseError::CorruptRow {
                table: "subscriptions",
                detail,
            })?;

        Ok(Some(Subscription {
            status,
            valid_until: row.try_get("valid_until").map_err(DatabaseError::Query)?,
        }))
    }
}
