//! shiftsync - キューの操作と確認を行う CLI
//!
//! 1 コマンドごとにエンジンを起動して終了する。起動時の自動同期と周期同期は
//! 無効化し、同期は `sync` サブコマンドでのみ走らせる。

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shiftsync_core::app::{BuildError, EngineBuilder, EngineError, Intercepted};
use shiftsync_core::domain::{ApiRequest, HttpMethod, OperationId, UnknownMethod};
use shiftsync_core::ports::CancelOutcome;
use shiftsync_core::{ConfigError, EngineHandle, SyncConfig};

#[derive(Debug, Parser)]
#[command(name = "shiftsync", about = "Offline mutation queue for the time-tracking API")]
struct Cli {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the queue snapshot as JSON.
    Status,
    /// Replay queued operations now and print the pass report.
    Sync,
    /// Move a failed operation back to the queue. It replays on the next `sync`.
    Retry { id: OperationId },
    /// Remove an operation that has not started syncing.
    Cancel { id: OperationId },
    /// Drop a failed operation.
    Discard { id: OperationId },
    /// Send one request through the interceptor.
    Request {
        #[arg(value_parser = parse_method)]
        method: HttpMethod,
        path: String,
        #[arg(long)]
        body: Option<String>,
        #[arg(long, default_value = "application/json")]
        content_type: String,
    },
    /// Delete synced operations.
    Compact,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),

    #[error("interrupted")]
    Interrupted,
}

fn parse_method(raw: &str) -> Result<HttpMethod, UnknownMethod> {
    raw.parse()
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let mut builder = EngineBuilder::from_config(&config)?;
    let mut settings = config.settings();
    settings.start_online = false;
    settings.periodic_sync = None;
    builder = builder.settings(settings);

    let task = builder.build()?.start();
    let handle = task.handle();

    let result = tokio::select! {
        result = execute(&handle, cli.command) => result,
        _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted),
    };

    task.shutdown_and_join().await;
    result
}

async fn execute(handle: &EngineHandle, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Sync => {
            let report = handle.force_sync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Retry { id } => {
            if !handle.requeue_failed(id).await? {
                return Err(CliError::Rejected(format!("{id} is not a failed operation")));
            }
            println!("{id} queued for retry; run `shiftsync sync` to replay it");
        }
        Command::Cancel { id } => match handle.cancel(id).await? {
            CancelOutcome::Removed => println!("{id} cancelled"),
            CancelOutcome::NotCancellable(status) => {
                return Err(CliError::Rejected(format!(
                    "{id} is {} and can no longer be cancelled",
                    status.as_str()
                )));
            }
            CancelOutcome::NotFound => {
                return Err(CliError::Rejected(format!("{id} not found")));
            }
        },
        Command::Discard { id } => {
            if !handle.discard_failed(id).await? {
                return Err(CliError::Rejected(format!("{id} is not a failed operation")));
            }
            println!("{id} discarded");
        }
        Command::Request {
            method,
            path,
            body,
            content_type,
        } => {
            let mut request = ApiRequest::new(method, path);
            if let Some(body) = body {
                request = request.with_body(content_type, body);
            }
            let outcome = handle.request(request).await?;
            match &outcome {
                Intercepted::Response(_) => {}
                Intercepted::Cached { stored_at, .. } => {
                    tracing::warn!(%stored_at, "offline, serving cached response");
                }
                Intercepted::Queued(ack) => {
                    tracing::info!(operation_id = %ack.operation_id, "offline, request queued");
                }
            }
            let response = outcome.into_response();
            println!("HTTP {}", response.status);
            println!("{}", String::from_utf8_lossy(&response.body));
        }
        Command::Compact => {
            let removed = handle.compact().await?;
            println!("removed {removed} synced operations");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_subcommand() {
        let cli = Cli::try_parse_from([
            "shiftsync",
            "--config",
            "sync.toml",
            "request",
            "post",
            "/api/clock/in",
            "--body",
            "{}",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("sync.toml")));
        assert!(matches!(
            cli.command,
            Command::Request { method: HttpMethod::Post, ref path, .. } if path == "/api/clock/in"
        ));
    }

    #[test]
    fn operation_ids_accept_prefix() {
        let cli = Cli::try_parse_from(["shiftsync", "retry", "op-7"]).unwrap();
        assert!(matches!(cli.command, Command::Retry { id } if id == OperationId::new(7)));
        assert!(Cli::try_parse_from(["shiftsync", "cancel", "seven"]).is_err());
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(Cli::try_parse_from(["shiftsync", "request", "TRACE", "/api/me"]).is_err());
    }
}
