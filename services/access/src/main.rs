use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use access::{
    AppState,
    clock::SystemClock,
    config::{AccessConfig, ServerConfig},
    keys::{CachingKeyProvider, RedisKeySource, StaticKeyProvider},
    middleware::OperatorAuth,
    repositories::{PgScanLog, PgSubscriptionStore},
    routes,
    service::{AccessPorts, AccessService},
};
use common::{
    cache::{RedisConfig, RedisStore},
    database::{self, DatabaseConfig},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting access service");

    let server_config = ServerConfig::from_env()?;
    let access_config = AccessConfig::from_env()?;

    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    if !database::health_check(&pool).await {
        anyhow::bail!("Failed to connect to database");
    }

    let scan_log = PgScanLog::new(pool.clone());
    scan_log.init_schema().await?;

    // Redis only carries key overrides; the static ring covers any outage
    let redis = RedisStore::open(&RedisConfig::from_env())?;
    let keys = CachingKeyProvider::new(
        RedisKeySource::new(redis.clone(), access_config.remote_key_name.clone()),
        StaticKeyProvider::new(access_config.key_ring.clone()),
        access_config.remote_key_policy.clone(),
    );
    info!(
        "Static token key version {}",
        access_config.key_ring.current().version()
    );

    let access = AccessService::new(
        &access_config,
        AccessPorts {
            keys: Arc::new(keys),
            subscriptions: Arc::new(PgSubscriptionStore::new(pool.clone())),
            log: Arc::new(scan_log),
            clock: Arc::new(SystemClock),
        },
    );

    let app_state = AppState {
        db_pool: pool,
        key_channel: redis,
        access,
        operator_auth: OperatorAuth::new(&server_config.operator_jwt_secret),
    };

    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&server_config.bind_address).await?;
    info!("Access service listening on {}", server_config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
