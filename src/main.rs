// ABOUTME: CLI entry point for replica-sync
// ABOUTME: Parses connection arguments, runs one sync and maps the result to an exit code

use anyhow::Result;
use clap::{Args, Parser};
use replica_sync::phoenix::{AvaticaClient, PhoenixReader, PhoenixTarget};
use replica_sync::record::validate_table_name;
use replica_sync::EtlError;
use replica_sync::source::{SourceConfig, SourceReader};
use replica_sync::{DiffPolicy, PipelineConfig, Projection, RunOutcome};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "replica-sync")]
#[command(
    about = "Compare source session-access rows with their Phoenix replica, transform the changes, and upsert them",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    phoenix: PhoenixArgs,
    /// Source table to read, as [schema.]table
    #[arg(long = "source-table", default_value = "MYSCHEMA.MY_ORACLE_SOURCE_TABLE")]
    source_table: String,
    /// Replica table compared against, as [schema.]table
    #[arg(long = "replica-table", default_value = "MYSCHEMA.MY_PHOENIX_REPLICA_TABLE")]
    replica_table: String,
    /// Timestamp column that decides which side is newer
    #[arg(long = "last-updated-col", default_value = "LAST_UPDATED")]
    last_updated_col: String,
    /// Unique key column
    #[arg(long = "id-col", default_value = "ID")]
    id_col: String,
    /// Emit a changed record once (dedup) or once per differing field check (parity)
    #[arg(long = "diff-policy", value_enum, default_value_t = DiffPolicy::Dedup)]
    diff_policy: DiffPolicy,
    /// Diff and transform but do not write
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[derive(Args)]
struct SourceArgs {
    /// Source database host
    #[arg(long = "source-host", visible_alias = "oracle-host")]
    host: String,
    /// Source database port
    #[arg(long = "source-port", visible_alias = "oracle-port")]
    port: u16,
    /// Source database (service) name
    #[arg(long = "source-service-name", visible_alias = "oracle-service-name")]
    service_name: String,
    /// Source user
    #[arg(long = "source-user", visible_alias = "oracle-user")]
    user: String,
    /// Source password
    #[arg(long = "source-password", visible_alias = "oracle-password")]
    password: String,
    /// Require TLS to the source
    #[arg(long = "source-ssl", default_value_t = false)]
    ssl: bool,
    /// Seconds to wait for the source connection
    #[arg(long = "source-connect-timeout-secs", default_value_t = 30)]
    connect_timeout_secs: u64,
}

#[derive(Args)]
struct PhoenixArgs {
    /// Phoenix Query Server URL (e.g., http://phoenix-queryserver:8765/)
    #[arg(long = "phoenix-url")]
    url: String,
    /// Phoenix table the transformed rows are upserted into
    #[arg(long = "phoenix-table")]
    table: String,
    /// Per-request timeout for Query Server calls, in seconds
    #[arg(long = "replica-timeout-secs", default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match run(cli).await {
        Ok(outcome) => {
            println!("{}", outcome.status_line());
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Log with :? to show full error chain including root cause
            tracing::error!("Sync failed: {:?}", e);
            ExitCode::from(replica_sync::exit_code_for(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let projection = Projection::new(&cli.id_col, &cli.last_updated_col)
        .map_err(|e| EtlError::InvalidConfig(format!("{:#}", e)))?;
    validate_table_name(&cli.phoenix.table)
        .map_err(|e| EtlError::InvalidConfig(format!("{:#}", e)))?;

    let source_config = SourceConfig {
        host: cli.source.host,
        port: cli.source.port,
        service_name: cli.source.service_name,
        user: cli.source.user,
        password: cli.source.password,
        ssl: cli.source.ssl,
        connect_timeout: Duration::from_secs(cli.source.connect_timeout_secs),
    };
    tracing::debug!("Source configuration: {:?}", source_config);

    let phoenix = AvaticaClient::new(
        &cli.phoenix.url,
        Duration::from_secs(cli.phoenix.timeout_secs),
    )?;

    let source = SourceReader::new(source_config, &cli.source_table, projection.clone())?;
    let replica = PhoenixReader::new(phoenix.clone(), &cli.replica_table, projection)?;
    let target = PhoenixTarget::new(phoenix);

    let config = PipelineConfig {
        target_table: cli.phoenix.table,
        diff_policy: cli.diff_policy,
        dry_run: cli.dry_run,
    };

    replica_sync::run_pipeline(&source, &replica, &target, &config).await
}
