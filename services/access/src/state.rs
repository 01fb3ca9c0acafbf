//! Application state shared across handlers

use common::cache::RedisStore;
use sqlx::PgPool;

use crate::{middleware::OperatorAuth, service::AccessService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    /// Remote key channel, probed by the health check
    pub key_channel: RedisStore,
    pub access: AccessService,
    pub operator_auth: OperatorAuth,
}
