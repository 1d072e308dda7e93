//! sqlguard - read-only SQL gatekeeper for generated queries.

use anyhow::Context;
use serde_json::json;
use sqlguard::cli::{Cli, Command};
use sqlguard::config::Config;
use sqlguard::db::PostgresBackend;
use sqlguard::error::GuardError;
use sqlguard::logging;
use sqlguard::query::{Envelope, QueryExecutor};
use sqlguard::safety::{rewrite_limit, validate, ValidationPolicy};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    match &cli.log_file {
        Some(path) => {
            let path = path.clone().unwrap_or_else(logging::default_log_path);
            logging::init_file_logging(&path);
        }
        None => logging::init_stderr_logging(),
    }

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            match e.downcast_ref::<GuardError>() {
                Some(guard) => error!("{}: {:#}", guard.category(), e),
                None => error!("{:#}", e),
            }
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command produced a success result.
async fn run(cli: &Cli) -> anyhow::Result<bool> {
    // Precedence: command line, then environment, then config file.
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    cli.apply_overrides(&mut config)?;
    config.validate()?;

    let sql = cli.sql()?;
    let policy = config.policy.to_policy();

    match cli.command {
        Command::Check { .. } => check(&sql, &policy),
        Command::Run { .. } => execute(&sql, &config, policy).await,
    }
}

fn check(sql: &str, policy: &ValidationPolicy) -> anyhow::Result<bool> {
    match validate(sql, policy) {
        Ok(parsed) => {
            let rewrite = rewrite_limit(parsed, policy.max_row_limit());
            let report = json!({
                "executed_sql": rewrite.executed_sql(),
                "was_capped": rewrite.was_capped(),
                "tables": rewrite.statement.tables_referenced(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        Err(rejection) => {
            print_envelope(&Envelope::from(rejection))?;
            Ok(false)
        }
    }
}

async fn execute(sql: &str, config: &Config, policy: ValidationPolicy) -> anyhow::Result<bool> {
    info!("Connection: {}", config.connection.display_string());
    let backend = Arc::new(
        PostgresBackend::connect(&config.connection, &config.execution)
            .await
            .context("could not open the database pool")?,
    );

    let mut executor = QueryExecutor::new(backend.clone(), Arc::new(policy))
        .with_timeout(config.execution.timeout());
    if let Some(tenant) = &config.policy.tenant_id {
        executor = executor.with_tenant(tenant.clone());
    }
    if let Some(project) = &config.policy.project_id {
        executor = executor.with_project(project.clone());
    }

    let envelope = executor.execute(sql).await;
    backend.close().await;

    print_envelope(&envelope)?;
    Ok(envelope.is_success())
}

fn print_envelope(envelope: &Envelope) -> anyhow::Result<()> {
    println!("{}", envelope.to_json()?);
    Ok(())
}
