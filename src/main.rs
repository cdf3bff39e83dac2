mod api;
mod backend;
mod gateway;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wabridge_channels::whatsapp::WhatsAppFactory;
use wabridge_core::{
    config::{self, Config, LoggingConfig},
    storage::StorageLayout,
};

/// Device name shown under "Linked devices" on each phone.
const DEVICE_NAME: &str = "wabridge";

#[derive(Parser)]
#[command(
    name = "wabridge",
    version,
    about = "Multi-number WhatsApp gateway bridging chat sessions to a backend webhook"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// HTTP port (overrides server.port).
    #[arg(long, env = "PORT", global = true)]
    port: Option<u16>,

    /// Backend base URL (overrides backend.base_url).
    #[arg(long, env = "BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Log directory (overrides logging.dir).
    #[arg(long, env = "LOG_DIR", global = true)]
    log_dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway.
    Start,
    /// Print the resolved configuration and stored sessions.
    Status,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut cfg = config::load(&self.config)?;
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(ref url) = self.backend_url {
            cfg.backend.base_url = url.clone();
        }
        if let Some(ref dir) = self.log_dir {
            cfg.logging.dir = dir.clone();
        }
        Ok(cfg)
    }
}

/// Log to stdout and to a daily-rolling `wabridge.log` in the log directory.
fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let dir = cfg.log_dir()?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("cannot create log dir {}: {e}", dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, "wabridge.log"));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level)))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let cfg = cli.load_config()?;
            let _log_guard = init_logging(&cfg.logging)?;

            let layout = StorageLayout::new(cfg.storage.data_path());
            let backend = Arc::new(backend::HttpBackend::from_config(&cfg.backend)?);
            let factory = Arc::new(WhatsAppFactory::new(DEVICE_NAME));
            let gw = gateway::Gateway::new(
                factory,
                backend,
                layout,
                cfg.recovery.clone(),
                cfg.media.clone(),
            );

            info!(
                "wabridge starting | data: {} | backend: {}",
                cfg.storage.data_path().display(),
                cfg.backend.resolved_base_url()
            );

            let bootstrap = Arc::clone(&gw);
            tokio::spawn(async move {
                bootstrap.bootstrap().await;
            });

            let served = api::serve(Arc::clone(&gw), &cfg.server).await;
            gw.shutdown().await;
            served?;
        }
        Commands::Status => {
            let cfg = cli.load_config()?;
            println!("wabridge status\n");
            println!("Config: {}", cli.config);
            println!("Listen: {}:{}", cfg.server.host, cfg.server.port);
            println!("Backend: {}", cfg.backend.resolved_base_url());
            println!("Data dir: {}", cfg.storage.data_path().display());
            match cfg.logging.log_dir() {
                Ok(dir) => println!("Log dir: {}", dir.display()),
                Err(e) => println!("Log dir: {e}"),
            }
            println!();

            let sessions = StorageLayout::new(cfg.storage.data_path()).stored_sessions();
            if sessions.is_empty() {
                println!("  no stored sessions");
            }
            for id in sessions {
                println!("  {id}: credentials stored");
            }
        }
    }

    Ok(())
}
