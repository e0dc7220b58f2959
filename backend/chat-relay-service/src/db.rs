use crate::config::DatabaseConfig;
use anyhow::Context;
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Pool, PoolConfig as PoolSize, RecyclingMethod, Runtime,
};
use tokio_postgres::NoTls;

const SCHEMA: &str = include_str!("../migrations/0001_create_messages.sql");

pub async fn init_pool(cfg: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut pool_cfg = PoolConfig::new();
    pool_cfg.url = Some(cfg.url.clone());
    pool_cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pool_cfg.pool = Some(PoolSize::new(cfg.max_connections));

    let pool = pool_cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .context("create postgres pool")?;

    let client = pool.get().await.context("connect to postgres")?;
    client
        .batch_execute(SCHEMA)
        .await
        .context("apply messages schema")?;

    tracing::info!(max_connections = cfg.max_connections, "database pool ready");
    Ok(pool)
}
