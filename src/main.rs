//! Check binary.
//!
//! Opens the pool described by the command line (or a JSON config file), runs
//! a health check through a request session and shuts the pool down again.

use scoped_mysql::config::Config;
use scoped_mysql::db::{RequestScope, SessionProvider};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();
    init_tracing(&config);

    info!("Starting scoped-mysql check v{}", env!("CARGO_PKG_VERSION"));

    let mysql_config = config.mysql_config()?;
    let provider = SessionProvider::connect(mysql_config).await?;
    let _reaper = provider.start_reaper(config.max_ttl_duration());

    let scope = RequestScope::with_timeout(config.timeout_duration());
    let check = provider.with_request(scope, |session| async move {
        session.ping().await?;
        let row = session.query_one("SELECT VERSION() AS version, NOW() AS now", &[]).await;
        row.to_json_map()
    });

    let result = tokio::select! {
        result = check => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            Err(scoped_mysql::SessionError::Cancelled)
        }
    };

    match &result {
        Ok(row) => info!(row = %serde_json::Value::Object(row.clone()), "Health check passed"),
        Err(e) => error!(error = %e, "Health check failed"),
    }

    let stats = provider.stats();
    info!(
        size = stats.size,
        idle = stats.idle,
        in_use = stats.in_use,
        "Pool statistics"
    );

    if let Err(e) = provider.shutdown().await {
        error!(error = %e, "Shutdown error");
        return Err(e.into());
    }
    result?;

    info!("Check complete");
    Ok(())
}
