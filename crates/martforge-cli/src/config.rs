//! `martforge.toml`: where the source lives and how each dataset is shaped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use martforge_core::{
    ApplicationRow, CompoundDefinition, ExpressionDefinition, LoopbackDefinition, OptimiserType,
    RelationRestriction, TableRestriction, UnrollDefinition,
};

use crate::CliError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub partition_tables: Vec<PartitionTableConfig>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection string written inline.
    pub url: Option<String>,
    /// Environment variable holding the connection string.
    pub url_env: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub database_schema: String,
    pub catalog: Option<String>,
    #[serde(default)]
    pub key_guessing: bool,
    /// Additional database schema -> partition prefix.
    #[serde(default)]
    pub partitions: BTreeMap<String, String>,
}

/// Partition table over the distinct values of a source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionTableConfig {
    pub name: String,
    pub source: String,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub name: String,
    pub source: String,
    pub central_table: String,
    #[serde(default)]
    pub optimiser: OptimiserType,
    #[serde(default)]
    pub invisible: bool,
    #[serde(default = "default_make_dimensions")]
    pub make_dimensions: bool,
    /// Turn the generated dataset into a partition table over these columns.
    pub partition_columns: Option<Vec<String>>,
    /// Database schema the main table is materialized in; rows of the
    /// partition table are read from there.
    pub materialized_schema: Option<String>,
    #[serde(default)]
    pub relations: Vec<RelationPolicy>,
    #[serde(default)]
    pub table_restrictions: Vec<TableRestrictionPolicy>,
    #[serde(default)]
    pub expressions: Vec<ExpressionPolicy>,
    #[serde(default)]
    pub partitions: Vec<PartitionApplicationConfig>,
    #[serde(default)]
    pub columns: Vec<ColumnPolicy>,
    #[serde(default)]
    pub dimensions: Vec<DimensionPolicy>,
}

fn default_make_dimensions() -> bool {
    true
}

/// Policies on one relation, filed under a generated table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationPolicy {
    pub table: String,
    /// Relation name as printed by `sync`, e.g. `ens.gene(gene_id)->ens.transcript(gene_id)`.
    pub relation: String,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub subclass: bool,
    #[serde(default)]
    pub alternative_join: bool,
    pub compound: Option<CompoundDefinition>,
    pub loopback: Option<LoopbackDefinition>,
    pub unroll: Option<UnrollDefinition>,
    pub restriction: Option<RelationRestriction>,
    #[serde(default)]
    pub restriction_iteration: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableRestrictionPolicy {
    pub table: String,
    pub source_table: String,
    pub restriction: TableRestriction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionPolicy {
    pub table: String,
    pub name: String,
    pub definition: ExpressionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionApplicationConfig {
    pub partition_table: String,
    /// Generated table the application is bound to; the whole dataset when
    /// absent.
    pub table: Option<String>,
    pub rows: Vec<ApplicationRow>,
}

/// Policies on a generated column, addressed by its visible or internal name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnPolicy {
    pub table: String,
    pub column: String,
    pub rename: Option<String>,
    #[serde(default)]
    pub masked: bool,
    #[serde(default)]
    pub indexed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionPolicy {
    pub table: String,
    #[serde(default)]
    pub masked: bool,
    /// Source table name the dimension walks from.
    pub transform_start: Option<String>,
}

impl WorkspaceConfig {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CliError> {
        let config: WorkspaceConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), CliError> {
        for dataset in &self.datasets {
            if !self.sources.iter().any(|source| source.name == dataset.source) {
                return Err(CliError::InvalidConfig(format!(
                    "dataset '{}' names unknown source '{}'",
                    dataset.name, dataset.source
                )));
            }
        }
        for partition in &self.partition_tables {
            if !self.sources.iter().any(|source| source.name == partition.source) {
                return Err(CliError::InvalidConfig(format!(
                    "partition table '{}' names unknown source '{}'",
                    partition.name, partition.source
                )));
            }
        }
        Ok(())
    }

    pub fn connection_url(&self) -> Result<String, CliError> {
        match (&self.connection.url, &self.connection.url_env) {
            (Some(url), None) => Ok(url.clone()),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                CliError::InvalidConfig(format!("environment variable '{var}' is not set"))
            }),
            (Some(_), Some(_)) => Err(CliError::InvalidConfig(
                "use either connection.url or connection.url_env".to_string(),
            )),
            (None, None) => Err(CliError::InvalidConfig(
                "connection string is required".to_string(),
            )),
        }
    }
}

/// Connection string with the password replaced, safe for run artifacts.
pub fn redact_connection_string(conn: &str) -> String {
    let Some(scheme_end) = conn.find("://") else {
        return conn.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &conn[authority_start..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return conn.to_string();
    };
    match rest[..at].find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &conn[..authority_start],
            &rest[..colon],
            &rest[at..]
        ),
        None => conn.to_string(),
    }
}
