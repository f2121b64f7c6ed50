use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use aggregate_manager::auth::SessionManager;
use aggregate_manager::cli::{self, Command, Shell};
use aggregate_manager::config::{CliArgs, ConnectionConfig};
use aggregate_manager::error::ApiError;
use aggregate_manager::http_client::AggregateHttpClient;
use aggregate_manager::service::AggregateService;

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    // Initialize logging with the configured level; RUST_LOG wins when set.
    // Logs go to stderr so reports on stdout stay clean.
    let log_level = args.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<ApiError>()
                .map(ApiError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let command = Command::from_args(&args)?;
    tracing::debug!(command = ?command, "Resolved command");

    let config_path = args.config_path();
    let config = ConnectionConfig::load(&config_path)
        .map_err(|e| ApiError::ConfigError(format!("{:#}", e)))?;
    let config = Arc::new(config);
    tracing::info!(
        organization = %config.organization,
        api_base = %config.api_base(),
        "Aggregate Manager starting"
    );

    let settings = args.client_settings();
    let sessions = Arc::new(SessionManager::new(Arc::clone(&config), &settings)?);
    let http_client = AggregateHttpClient::new(Arc::clone(&sessions), &settings)?;
    let service = AggregateService::new(http_client, settings.page_size);

    let shell = Shell::new(
        service,
        args.output_dir(),
        cli::thresholds(&args),
        cli::poll_options(&args),
    );
    shell
        .run(command)
        .await
        .context("Aggregate Manager command failed")?;

    tracing::info!(
        auth_round_trips = sessions.auth_round_trips(),
        "Aggregate Manager finished"
    );
    Ok(())
}
