//! macro-runner: serve the macro HTTP API, or run one macro from the shell.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use excel_macro_runner::MacroRunner;
use macro_runner_server::api::dto::RunMacroResponse;
use macro_runner_server::{logging, router, MacroService, ServerConfig};

#[derive(Parser)]
#[command(name = "macro-runner")]
#[command(author, version, about = "Run workbook macros in Excel over HTTP")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address (overrides config)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Run one macro against a local workbook and print the C2 value as JSON
    Run {
        /// Workbook to open; it is saved in place
        file: PathBuf,

        /// Macro name, e.g. `Module1.Refresh`
        macro_name: String,
    },

    /// Print the effective configuration as JSON and exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        if !path.is_file() {
            anyhow::bail!("config file does not exist: {}", path.display());
        }
    }

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            logging::init(config.log_format);
            serve(config).await
        }
        Commands::Run { file, macro_name } => {
            logging::init(config.log_format);
            run_once(config, file, macro_name).await
        }
        Commands::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    config.prepare_work_dir().with_context(|| {
        format!(
            "Failed to create work directory '{}'",
            config.work_dir.display()
        )
    })?;

    let runner = MacroRunner::new(config.bridge.clone());
    let service = Arc::new(MacroService::new(Arc::new(runner), &config));
    let app = router(service.clone(), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    tracing::info!(
        bind = %config.bind,
        work_dir = %service.work_dir().display(),
        keep_uploads = config.keep_uploads,
        max_sessions = ?config.max_sessions,
        "macro-runner listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("macro-runner stopped");
    Ok(())
}

async fn run_once(config: ServerConfig, file: PathBuf, macro_name: String) -> Result<()> {
    let runner = MacroRunner::new(config.bridge);
    let display = file.display().to_string();
    let value = tokio::task::spawn_blocking(move || runner.run(&file, &macro_name))
        .await
        .context("Macro worker panicked")?
        .with_context(|| format!("Macro run against '{display}' failed"))?;

    println!(
        "{}",
        serde_json::to_string(&RunMacroResponse::success(value))?
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
