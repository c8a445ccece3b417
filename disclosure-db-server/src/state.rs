//! Application state shared across handlers.

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use disclosure_db_api::{
    AggregateValidator, NoUnits, SearchService, SubmissionLoader, SubmissionManager, UnitResolver,
};
use disclosure_db_store::{PgPool, SchemaRegistry};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Shared state: the pool, the schema registry and the engine facades.
pub struct AppState {
    pub config: ServerConfig,
    pub pool: PgPool,
    pub registry: Arc<SchemaRegistry>,
    pub loader: SubmissionLoader,
    pub manager: SubmissionManager,
    pub search: SearchService,
    pub validator: AggregateValidator,
}

impl AppState {
    /// Connect the pool and wire the engines.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.database_url)
            .await
            .map_err(|e| ServerError::internal(format!("database connection failed: {e}")))?;
        Ok(Self::from_pool(config, pool))
    }

    /// Wire the engines over an existing pool.
    pub fn from_pool(config: ServerConfig, pool: PgPool) -> Self {
        let registry = Arc::new(SchemaRegistry::new(config.root_form.clone()));
        let units: Arc<dyn UnitResolver> = Arc::new(NoUnits);
        let loader = SubmissionLoader::new(
            pool.clone(),
            registry.clone(),
            units,
            config.fetch_options(),
        );
        let manager = SubmissionManager::new(loader.clone());
        let search = SearchService::new(loader.clone());
        let validator = AggregateValidator::new(loader.clone());
        AppState {
            config,
            pool,
            registry,
            loader,
            manager,
            search,
            validator,
        }
    }

    /// Reload the schema registry snapshot.
    pub async fn refresh_schema(&self) -> Result<()> {
        self.registry
            .refresh(&self.pool)
            .await
            .map_err(|e| ServerError::internal(format!("schema refresh failed: {e}")))?;
        Ok(())
    }
}
