//! Server configuration

use clap::Parser;
use std::net::SocketAddr;

/// Disclosure DB server configuration. Every flag can also be supplied via
/// environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "disclosure-db-server", version, about)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "DDB_LISTEN_ADDR", default_value = "127.0.0.1:8090")]
    pub listen_addr: SocketAddr,

    /// PostgreSQL connection URL
    #[arg(long, env = "DDB_DATABASE_URL")]
    pub database_url: String,

    /// Maximum connections in the pool
    #[arg(long, env = "DDB_POOL_SIZE", default_value_t = 20)]
    pub pool_size: u32,

    /// Name of the base disclosure form
    #[arg(long, env = "DDB_ROOT_FORM", default_value = "disclosure_form")]
    pub root_form: String,

    /// Number of per-table fetch queries grouped onto one connection
    /// during submission reconstruction
    #[arg(long, env = "DDB_FETCH_BATCH_SIZE", default_value_t = 80)]
    pub fetch_batch_size: usize,

    /// Deadline in seconds for one reconstruction fetch batch
    #[arg(long, env = "DDB_BATCH_TIMEOUT_SECS", default_value_t = 30)]
    pub batch_timeout_secs: u64,

    /// Consult the aggregate cache on read paths
    #[arg(
        long,
        env = "DDB_USE_AGGREGATE",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 1
    )]
    pub use_aggregate: bool,

    /// Create the static tables at startup if they do not exist
    #[arg(long, env = "DDB_INIT_SCHEMA", default_value_t = false)]
    pub init_schema: bool,

    /// Enable permissive CORS (development)
    #[arg(long, env = "DDB_CORS", default_value_t = false)]
    pub cors_enabled: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "DDB_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: "human" or "json"
    #[arg(long, env = "DDB_LOG_FORMAT", default_value = "human")]
    pub log_format: String,
}

impl ServerConfig {
    /// Fetch options derived from the configuration.
    pub fn fetch_options(&self) -> disclosure_db_store::FetchOptions {
        disclosure_db_store::FetchOptions {
            batch_size: self.fetch_batch_size,
            batch_timeout: std::time::Duration::from_secs(self.batch_timeout_secs),
        }
    }
}
