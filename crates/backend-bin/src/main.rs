//! syncwatch server
//!
//! Entry point for the watch-party synchronization server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use backend_lib::{
    auth::{AnonymousIdentity, IdentityProvider, TrustedQueryIdentity},
    config::{LogFormat, Settings, DEFAULT_CONFIG_FILE},
    ws_router, AppState,
};
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IdentityMode {
    /// Trust `userId` and `name` query parameters
    Trusted,
    /// Mint a guest identity per connection
    Anonymous,
}

#[derive(Debug, Parser)]
#[command(name = "syncwatch-server", version, about = "Watch-party synchronization server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,

    /// How connections are identified
    #[arg(long, value_enum, default_value_t = IdentityMode::Trusted)]
    identity: IdentityMode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    settings.validate()?;

    init_tracing(&settings);
    info!(
        bind_addr = %settings.bind_addr,
        max_rooms = settings.limits.max_rooms,
        max_members_per_room = settings.limits.max_members_per_room,
        "Configuration loaded"
    );

    let identity: Arc<dyn IdentityProvider> = match cli.identity {
        IdentityMode::Trusted => Arc::new(TrustedQueryIdentity::new()),
        IdentityMode::Anonymous => Arc::new(AnonymousIdentity::new()),
    };

    let addr = settings.bind_addr;
    let state = Arc::new(AppState::new(settings, identity)?);
    let app = ws_router::create_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("syncwatch listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.rooms.shutdown();
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", settings.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match settings.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            },
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
