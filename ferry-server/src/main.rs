use anyhow::Result;
use clap::Parser;
use ferry::api::ApiServer;
use ferry::config::Config;
use ferry::security::{Authenticator, LicenseService, RolePermissionEvaluator, TokenProvider};
use ferry::staging::StagingManager;
use ferry::transfer::TransferService;
use ferry_storage::SqliteStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ferry-server")]
#[command(about = "Ferry project transfer server")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "ferry.toml", env = "FERRY_CONFIG")]
    config: String,

    /// Address to bind to, overriding server.bind_addr
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_create(Path::new(&args.config))?;
    ferry::observability::init_tracing(&config.observability);

    tracing::info!("Config file: {}", args.config);

    let metrics_handle = if config.observability.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let database = config.database_path();
    tracing::info!("Entity store: {:?}", database);
    let store = Arc::new(SqliteStore::open(&database)?);

    let licenses = Arc::new(LicenseService::from_path(config.license.path.as_deref())?);

    let secret = match config.security.jwt_secret.clone() {
        Some(secret) => secret,
        None => {
            tracing::warn!("No security.jwt_secret configured; issued tokens will not survive a restart");
            TokenProvider::generate_secret()
        }
    };
    let tokens = Arc::new(TokenProvider::from_base64_secret(
        &secret,
        config.security.token_validity_secs,
    )?);

    let staging = StagingManager::new(config.staging_root(), config.staging.max_sessions)?;
    let _sweeper = staging.spawn_sweeper(config.staging.sweep_interval(), config.staging.max_age());

    let transfer = Arc::new(TransferService::new(
        store,
        staging,
        Arc::new(RolePermissionEvaluator),
        config.staging.unpack_limits(),
    ));
    let authenticator = Arc::new(Authenticator::new(
        licenses.clone(),
        tokens,
        &config.security,
    ));

    let mut server = ApiServer::new(transfer, licenses, authenticator, config.server.clone());
    if let Some(handle) = metrics_handle {
        server = server.with_metrics(handle);
    }

    let addr = args.bind.unwrap_or_else(|| config.server.bind_addr.clone());
    tracing::info!("Starting Ferry server on {}", addr);
    server.serve(&addr).await?;

    Ok(())
}
