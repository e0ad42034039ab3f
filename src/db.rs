use crate::config::AppConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for the database connection pool
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 16,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    fn from_app_config(config: &AppConfig) -> Self {
        Self {
            url: config.database_url.clone(),
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            connect_timeout: Duration::from_secs(config.db_connect_timeout_secs),
            acquire_timeout: Duration::from_secs(config.db_acquire_timeout_secs),
        }
    }
}

/// Establishes the connection pool described by the application config.
///
/// The pool is built once at startup and injected into services; business
/// logic never re-checks or re-opens connections.
pub async fn establish_connection_from_app_config(
    config: &AppConfig,
) -> Result<DbPool, anyhow::Error> {
    establish_connection_with_config(&DbConfig::from_app_config(config)).await
}

/// Establishes a connection pool with explicit settings.
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, anyhow::Error> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(options).await?;
    info!(
        max_connections = config.max_connections,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Runs pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), anyhow::Error> {
    crate::migrator::Migrator::up(pool, None).await?;
    info!("Database migrations applied");
    Ok(())
}
