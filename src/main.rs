use clap::Parser;
use sea_orm::{ConnectOptions, Database};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use botforge::clients::ai::AiClient;
use botforge::clients::telegram::TelegramClient;
use botforge::governor::{self, RateGovernor};
use botforge::provisioning::{self, BackendContext};
use botforge::server::config::ServerConfig;
use botforge::server::deploy_tracker::DeployTracker;
use botforge::server::registry::BotRegistry;
use botforge::services::lifecycle::BotLifecycle;
use botforge::services::vault::Vault;
use botforge::web::{create_axum_router, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // File: JSON, daily rotation. Stdout: human-readable.
    let file_appender = rolling::daily(log_dir, "botforge.log");
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).json();
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!(provisioner = %config.provisioner, "starting botforge");

    let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(10);
    // Shared handle; the connection itself is never duplicated.
    let db = Arc::new(Database::connect(opt).await?);
    info!("database connection established");

    let vault = Arc::new(Vault::new(&config.vault_secret));
    let registry = Arc::new(BotRegistry::new());
    let telegram = Arc::new(TelegramClient::new());
    let ai = Arc::new(AiClient::new());

    let ctx = BackendContext {
        registry: registry.clone(),
        telegram,
        ai,
    };
    let (backend, local_runner) = provisioning::backend_from_config(&config, &ctx);

    let tracker = Arc::new(DeployTracker::new());
    let lifecycle = Arc::new(BotLifecycle::new(db.clone(), vault, backend, tracker));

    let governor = Arc::new(RateGovernor::new());
    let _purge_handle = governor::spawn_purge_task(governor.clone());

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        lifecycle,
        governor,
        registry,
        local_runner,
    });

    let app = create_axum_router(state);
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!(%addr, "http server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!(error = %e, "http server exited with error");
        return Err(e.into());
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
