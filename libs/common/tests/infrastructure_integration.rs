//! Checks against live backing services
//!
//! Needs PostgreSQL and Redis reachable through `DATABASE_URL` and
//! `REDIS_URL`. Ignored by default.

use common::{
    cache::{RedisConfig, RedisStore},
    database::{DatabaseConfig, health_check, init_pool},
};
use sqlx::Row;
use std::time::Duration;

#[tokio::test]
#[ignore = "requires PostgreSQL and Redis"]
async fn test_backing_services_are_usable() -> Result<(), Box<dyn std::error::Error>> {
    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    assert!(health_check(&pool).await);

    let now: chrono::DateTime<chrono::Utc> = sqlx::query("SELECT now() AS now")
        .fetch_one(&pool)
        .await?
        .try_get("now")?;
    assert!(now.timestamp() > 0);

    let store = RedisStore::open(&RedisConfig::from_env())?;
    assert!(store.ping().await?);

    // A published override expires on its own
    let key = "access:integration:override";
    let mut conn = redis::Client::open(RedisConfig::from_env().url)?
        .get_multiplexed_async_connection()
        .await?;
    let _: () = redis::AsyncCommands::set_ex(&mut conn, key, "7:integration", 1).await?;
    assert_eq!(store.read(key).await?, Some("7:integration".to_string()));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.read(key).await?, None);

    Ok(())
}
