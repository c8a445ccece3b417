//! Disclosure DB server CLI
//!
//! Run with: `cargo run -p disclosure-db-server -- --help`

use clap::Parser;
use disclosure_db_server::{telemetry, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::parse();
    telemetry::init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        root_form = %config.root_form,
        fetch_batch_size = config.fetch_batch_size,
        batch_timeout_secs = config.batch_timeout_secs,
        use_aggregate = config.use_aggregate,
        "starting disclosure-db server"
    );

    disclosure_db_server::serve(config).await.map_err(Into::into)
}
