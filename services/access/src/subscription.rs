//! Subscription store port
//!
//! Membership data belongs to the admin directory. The access core only
//! reads it and treats whatever the store returns as ground truth.

use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::{
    error::StoreError,
    models::{Subscription, UserId},
};

/// Read-only lookup of a user's subscription
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// `None` when the user has no subscription on record
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, StoreError>;
}

/// Map-backed store for tests and local runs
#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<UserId, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, user_id: UserId, subscription: Subscription) {
        self.subscriptions
            .write()
            .await
            .insert(user_id, subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.subscriptions.read().await.get(user_id).cloned())
    }
}
