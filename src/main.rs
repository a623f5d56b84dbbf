use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use report_fetcher::config::{DEFAULT_CONFIG_PATH, FetcherConfig, ServerConfig};
use report_fetcher::fetcher::{Fetcher, ReportPipeline};
use report_fetcher::launcher::{self, Launcher, LauncherConfig};
use report_fetcher::mail::ImapConnector;
use report_fetcher::reports::{ApiUploader, HttpLinkResolver, NameExtractor};
use report_fetcher::server::{self, ServerState};
use report_fetcher::state::ProcessedStore;

#[derive(Parser)]
#[command(name = "report-fetcher", version, about = "Lab report mail fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the configured mailboxes and upload reports.
    Fetch {
        #[arg(long, env = "FETCHER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Serve the liveness and name-extraction HTTP endpoints.
    Serve,
    /// Provision the model asset, then start the fetcher (and the server).
    Launch {
        #[arg(long)]
        with_server: bool,
        #[arg(long, env = "FETCHER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Print the patient name extracted from a report PDF.
    Extract { file: PathBuf },
}

impl Command {
    fn log_name(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Serve => "serve",
            Self::Launch { .. } => "launch",
            Self::Extract { .. } => "extract",
        }
    }
}

/// Console logging, plus a daily rolling file when `FETCHER_LOG_DIR` is set.
fn init_tracing(log_name: &str) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("FETCHER_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, format!("{log_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.command.log_name());

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    match cli.command {
        Command::Fetch { config } => run_fetch(config).await,
        Command::Serve => run_serve().await,
        Command::Launch {
            with_server,
            config,
        } => run_launch(with_server, config).await,
        Command::Extract { file } => run_extract(file).await,
    }
}

async fn run_fetch(config_path: PathBuf) -> anyhow::Result<()> {
    let config = FetcherConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let processed = ProcessedStore::load(&config.state_file)
        .await
        .context("loading processed state")?;

    tracing::info!(
        path = %processed.path().display(),
        count = processed.len().await,
        "Processed state loaded"
    );

    let uploader = ApiUploader::new(config.upload_url.clone())?;
    tracing::info!(upload_url = uploader.url(), "Uploading reports");

    let pipeline = ReportPipeline {
        extractor: NameExtractor::with_model(&launcher::model_path_from_env()),
        resolver: Arc::new(HttpLinkResolver::new()?),
        sink: Arc::new(uploader),
    };

    let fetcher = Fetcher::new(config, Arc::new(ImapConnector), pipeline, processed);
    fetcher
        .run_forever(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

async fn run_serve() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let state = ServerState {
        extractor: NameExtractor::with_model(&launcher::model_path_from_env()),
    };
    server::serve(&config, state)
        .await
        .with_context(|| format!("serving on {}", config.addr))
}

async fn run_launch(with_server: bool, config_path: PathBuf) -> anyhow::Result<()> {
    let launcher = Launcher::for_current_exe(LauncherConfig::from_env(with_server), &config_path)?;
    let running = launcher.start().await?;
    tracing::info!(processes = ?running.names(), "Launch complete");
    running.wait_all().await;
    Ok(())
}

async fn run_extract(file: PathBuf) -> anyhow::Result<()> {
    let pdf = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extractor = NameExtractor::with_model(&launcher::model_path_from_env());
    let extraction = extractor.extract_blocking(pdf, filename).await?;
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}
