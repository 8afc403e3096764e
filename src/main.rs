use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ponte_server::bot::{BotTransport, CommandDispatcher};
use ponte_server::config::{self, AppConfig};
use ponte_server::provider::OAuthProvider;
use ponte_server::server::{run_server, RequestsLoggingLevel, ServerState};
use ponte_server::sso::SsoClient;
use ponte_server::store::{FullIdpStore, SqliteIdpStore};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI
    /// arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Directory for the idp.db database file. Can also be specified in the
    /// config file.
    #[clap(long)]
    pub db_dir: Option<PathBuf>,

    /// The address to listen on.
    #[clap(long, default_value = "0.0.0.0")]
    pub host: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            host: args.host.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = Arc::new(AppConfig::resolve(&cli_config, file_config)?);

    info!("Configuration loaded:");
    info!("  listen: {}:{}", app_config.host, app_config.port);
    info!("  external_url: {}", app_config.external_url);
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  registered clients: {}", app_config.clients.len());

    if app_config.clients.is_empty() {
        warn!("No OAuth clients configured; the authorization endpoint will reject everything");
    }
    if app_config.sso.enabled && app_config.sso.client_id.is_empty() {
        warn!("SSO client is enabled but has no client_id configured");
    }

    if !app_config.idp_db_path().exists() {
        info!("Creating new idp database at {:?}", app_config.idp_db_path());
    }
    let store: Arc<dyn FullIdpStore> = Arc::new(SqliteIdpStore::new(app_config.idp_db_path())?);

    let sso = Arc::new(SsoClient::new(app_config.sso.clone())?);
    let provider = Arc::new(OAuthProvider::new(&app_config));

    let shutdown_token = CancellationToken::new();

    // Bot transport and command dispatcher.
    let transport = BotTransport::new(app_config.bot.clone(), shutdown_token.child_token());
    let dispatcher = CommandDispatcher::new(
        app_config.clone(),
        store.clone(),
        transport.clone(),
        sso.clone(),
    );
    let bot_tasks = transport.start(dispatcher);
    if bot_tasks.is_empty() {
        warn!("Both bot transport modes are disabled; chat commands will not work");
    }

    let server_state = ServerState::new(app_config.clone(), store, sso, provider);

    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = run_server(server_state, shutdown_token.child_token()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
        }
    }

    // Fail outstanding bot RPCs and wait for the transport supervisors.
    transport.cancel_pending().await;
    for task in bot_tasks {
        let _ = task.await;
    }

    info!("Shutdown complete");
    Ok(())
}
