use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vc_exchange::config::AppConfig;
use vc_exchange::rest::{app, build_state};

#[derive(Parser)]
#[command(name = "exchange-server")]
#[command(about = "Verifiable-credential exchange orchestrator for the Acme and Bob agents")]
struct Args {
    /// Path to the TOML configuration file. Falls back to the built-in
    /// demo layout when the file does not exist.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        AppConfig::load_with_env_overrides(&args.config)?
    } else {
        AppConfig::demo()
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let address = config.server_address();
    let state = build_state(config);
    let router = app(state);

    let listener = TcpListener::bind(&address).await?;
    info!(%address, "Exchange server listening");

    axum::serve(listener, router).await?;

    Ok(())
}
