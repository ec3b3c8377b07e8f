mod assemble;
mod config;
mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use schemars::schema_for;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use martforge_compile::{DatasetSummary, ResyncContext, summarize_dataset};
use martforge_core::{
    Error as CoreError, RelationGraphReport, build_relation_graph_report, validate_mart,
};
use martforge_introspect::PostgresAdapter;
use martforge_sync::{AlwaysAbort, AlwaysProceed, OrphanConfirmation};

use assemble::{Assembled, assemble, partition_sources, sync_sources};
use config::{WorkspaceConfig, redact_connection_string};
use registry::{
    RunContext, init_run_logging, start_run, write_datasets, write_out, write_partitions,
    write_relations,
};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Parser, Debug)]
#[command(name = "martforge", version, about = "Martforge CLI")]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize the source schemas and print their relation graphs.
    Sync(RunArgs),
    /// Synchronize, generate every dataset and write the dataset summaries.
    Compile(RunArgs),
    /// Print the JSON schema of the dataset summary format.
    SummarySchema(SchemaArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Workspace config.
    #[arg(long, default_value = "martforge.toml")]
    config: PathBuf,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Optional copy of the command's main artifact.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Delete keys whose columns vanished from the source instead of aborting.
    #[arg(long, default_value_t = false)]
    delete_orphans: bool,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Write the schema here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Sync,
    Compile,
}

impl RunKind {
    fn as_str(self) -> &'static str {
        match self {
            RunKind::Sync => "sync",
            RunKind::Compile => "compile",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sync(args) => run(RunKind::Sync, args, &cli.log_level).await,
        Command::Compile(args) => run(RunKind::Compile, args, &cli.log_level).await,
        Command::SummarySchema(args) => summary_schema(args, &cli.log_level),
    }
}

async fn run(kind: RunKind, args: RunArgs, log_level: &str) -> Result<(), CliError> {
    let RunArgs {
        config: config_path,
        run_dir,
        out,
        delete_orphans,
    } = args;

    let config = WorkspaceConfig::load(&config_path)?;
    let conn = config.connection_url()?;
    let run_ctx = RunContext {
        run_id: Uuid::new_v4().to_string(),
        started_at: chrono::Utc::now(),
        command: kind.as_str().to_string(),
        run_dir,
        config_path,
        delete_orphans,
        connection: redact_connection_string(&conn),
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(log_level, Some(&run_paths.logs_path))?;
    tracing::info!(event = "run_started", run_id = %run_ctx.run_id, command = kind.as_str());

    let timer = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.connection.max_connections)
        .acquire_timeout(Duration::from_secs(config.connection.acquire_timeout_secs))
        .connect(&conn)
        .await?;
    let adapter = PostgresAdapter::new(pool);
    let confirmation: &dyn OrphanConfirmation = if delete_orphans {
        &AlwaysProceed
    } else {
        &AlwaysAbort
    };
    let context = ResyncContext {
        source: &adapter,
        rows: &adapter,
        confirmation,
    };

    let assembled = match kind {
        RunKind::Sync => sync_sources(&config, &context).await,
        RunKind::Compile => assemble(&config, &context).await,
    }
    .inspect_err(|err| {
        if matches!(err, CliError::Core(CoreError::Aborted(_))) {
            tracing::warn!(
                event = "orphans_found",
                "orphaned keys found, rerun with --delete-orphans to remove them"
            );
        }
    })?;
    validate_mart(&assembled.mart)?;

    let relations = relation_reports(&config, &assembled);
    println!("{}", serde_json::to_string_pretty(&relations)?);
    write_relations(&run_paths, &relations)?;
    tracing::info!(event = "relations_written", path = %run_paths.relations_path.display());

    match kind {
        RunKind::Sync => {
            if let Some(out) = out.as_deref() {
                write_out(out, &relations)?;
            }
        }
        RunKind::Compile => {
            let mart = &assembled.mart;
            let datasets = mart
                .datasets()
                .into_iter()
                .map(|dataset| summarize_dataset(mart, dataset))
                .collect::<Result<Vec<DatasetSummary>, CoreError>>()?;
            write_datasets(&run_paths, &datasets, out.as_deref())?;
            write_partitions(&run_paths, &partition_sources(mart))?;
            tracing::info!(
                event = "datasets_written",
                datasets = datasets.len(),
                path = %run_paths.datasets_path.display()
            );
        }
    }

    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(
        event = "run_finished",
        status = "success",
        duration_ms = duration_ms,
        run = %run_paths.root.display()
    );

    Ok(())
}

fn relation_reports(
    config: &WorkspaceConfig,
    assembled: &Assembled,
) -> BTreeMap<String, RelationGraphReport> {
    config
        .sources
        .iter()
        .filter_map(|source| {
            let schema = assembled.source(&source.name)?;
            Some((
                source.name.clone(),
                build_relation_graph_report(&assembled.mart, schema),
            ))
        })
        .collect()
}

fn summary_schema(args: SchemaArgs, log_level: &str) -> Result<(), CliError> {
    init_run_logging(log_level, None)?;
    let schema = schema_for!(DatasetSummary);
    match args.out {
        Some(path) => {
            write_out(&path, &schema)?;
            tracing::info!(event = "summary_schema_written", path = %path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&schema)?),
    }
    Ok(())
}
