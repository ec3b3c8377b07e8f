use std::collections::BTreeMap;
use std::fs::{OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Serialize;

use martforge_compile::{DatasetSummary, SUMMARY_VERSION};
use martforge_core::RelationGraphReport;

use super::{RegistryError, RegistryResult};

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub command: String,
    pub run_dir: PathBuf,
    pub config_path: PathBuf,
    pub delete_orphans: bool,
    /// Connection string with the password redacted.
    pub connection: String,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
struct RunConfig {
    run_id: String,
    started_at: String,
    command: String,
    summary_version: &'static str,
    config_path: String,
    delete_orphans: bool,
    connection: String,
    git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
struct GitInfo {
    commit: Option<String>,
    dirty: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub relations_path: PathBuf,
    pub datasets_path: PathBuf,
    pub partitions_path: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx
        .run_dir
        .join(format!("{timestamp}__{}_{}", ctx.command, ctx.run_id));
    create_dir_all(&root)?;

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        command: ctx.command.clone(),
        summary_version: SUMMARY_VERSION,
        config_path: ctx.config_path.display().to_string(),
        delete_orphans: ctx.delete_orphans,
        connection: ctx.connection.clone(),
        git: collect_git_info(),
    };
    write_json(&root.join("config.json"), &config)?;

    let logs_path = root.join("logs.ndjson");
    OpenOptions::new().create(true).append(true).open(&logs_path)?;

    Ok(RunPaths {
        relations_path: root.join("relations.json"),
        datasets_path: root.join("datasets.json"),
        partitions_path: root.join("partitions.json"),
        logs_path,
        root,
    })
}

/// Relation graph report per source schema.
pub fn write_relations(
    paths: &RunPaths,
    reports: &BTreeMap<String, RelationGraphReport>,
) -> RegistryResult<()> {
    write_json(&paths.relations_path, reports)
}

/// Dataset summaries, copied to `out` when given.
pub fn write_datasets(
    paths: &RunPaths,
    datasets: &[DatasetSummary],
    out: Option<&Path>,
) -> RegistryResult<()> {
    write_json(&paths.datasets_path, &datasets)?;
    if let Some(out) = out {
        write_out(out, &datasets)?;
    }
    Ok(())
}

/// Partition table name to where its rows come from.
pub fn write_partitions(paths: &RunPaths, sources: &BTreeMap<String, String>) -> RegistryResult<()> {
    write_json(&paths.partitions_path, sources)
}

fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

/// Write `value` to a path outside the run directory, creating parents.
pub fn write_out<T: Serialize + ?Sized>(path: &Path, value: &T) -> RegistryResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    write_json(path, value)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}
