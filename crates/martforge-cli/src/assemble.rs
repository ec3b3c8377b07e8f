//! Build a mart from a workspace config.
//!
//! Sources are synchronized first. Dataset structure and relation policies
//! are applied in one transaction and generated by a single resync; policies
//! addressing generated columns and tables follow in a second transaction.

use std::collections::BTreeMap;

use tracing::{debug, info};

use martforge_compile::{ResyncContext, ResyncReport, resync};
use martforge_core::{
    ApplicationTarget, ColumnId, Mart, PartitionApplication, PartitionSource, RelationId, SchemaId,
    SourceSettings, TableId,
};

use crate::CliError;
use crate::config::{DatasetConfig, PartitionApplicationConfig, RelationPolicy, WorkspaceConfig};

/// A mart brought up to date with its config, with the report of every
/// resync it took.
pub struct Assembled {
    pub mart: Mart,
    pub resyncs: Vec<ResyncReport>,
}

impl Assembled {
    pub fn source(&self, name: &str) -> Option<SchemaId> {
        self.mart.schema_by_name(name).filter(|schema| !self.mart.schema(*schema).is_dataset())
    }
}

/// Register and synchronize the configured sources.
pub async fn sync_sources(
    config: &WorkspaceConfig,
    context: &ResyncContext<'_>,
) -> Result<Assembled, CliError> {
    let mut mart = Mart::new();
    for source in &config.sources {
        let mut settings =
            SourceSettings::new(&source.database_schema).with_key_guessing(source.key_guessing);
        settings.catalog = source.catalog.clone();
        for (database_schema, prefix) in &source.partitions {
            settings = settings.with_partition(database_schema, prefix);
        }
        mart.add_source_schema(&source.name, settings)?;
    }
    let report = resync(&mut mart, context).await?;
    Ok(Assembled {
        mart,
        resyncs: vec![report],
    })
}

/// Synchronize the sources, then define, shape and generate every dataset.
pub async fn assemble(
    config: &WorkspaceConfig,
    context: &ResyncContext<'_>,
) -> Result<Assembled, CliError> {
    let mut assembled = sync_sources(config, context).await?;
    let mart = &mut assembled.mart;

    mart.begin_transaction();
    let defined = define(mart, config);
    mart.end_transaction();
    let datasets = defined?;
    assembled.resyncs.push(resync(mart, context).await?);

    mart.begin_transaction();
    let shaped = shape(mart, config, &datasets);
    let pending = mart.end_transaction();
    shaped?;
    if pending {
        assembled.resyncs.push(resync(mart, context).await?);
    }
    info!(
        datasets = datasets.len(),
        resyncs = assembled.resyncs.len(),
        "mart assembled"
    );
    Ok(assembled)
}

fn source_schema(mart: &Mart, name: &str) -> Result<SchemaId, CliError> {
    mart.schema_by_name(name)
        .filter(|schema| !mart.schema(*schema).is_dataset())
        .ok_or_else(|| CliError::InvalidConfig(format!("unknown source '{name}'")))
}

fn source_table(mart: &Mart, source: &str, table: &str) -> Result<TableId, CliError> {
    mart.find_table(source_schema(mart, source)?, table)
        .ok_or_else(|| CliError::InvalidConfig(format!("source '{source}' has no table '{table}'")))
}

fn relation(mart: &Mart, name: &str) -> Result<RelationId, CliError> {
    mart.find_relation_by_name(name)
        .ok_or_else(|| CliError::InvalidConfig(format!("unknown relation '{name}'")))
}

fn generated_table(mart: &Mart, dataset: SchemaId, name: &str) -> Result<TableId, CliError> {
    mart.find_table(dataset, name).ok_or_else(|| {
        CliError::InvalidConfig(format!(
            "dataset '{}' generated no table '{name}'",
            mart.schema(dataset).name()
        ))
    })
}

/// Column of a generated table by visible name, then by internal name.
fn generated_column(mart: &Mart, table: TableId, name: &str) -> Result<ColumnId, CliError> {
    let columns = mart.table(table).columns();
    let mut by_internal = None;
    for column in columns {
        let found = mart.column(column);
        if found.modified_name() == name {
            return Ok(column);
        }
        if found.name() == name {
            by_internal = Some(column);
        }
    }
    by_internal.ok_or_else(|| {
        CliError::InvalidConfig(format!(
            "'{}' has no column '{name}'",
            mart.table(table).name()
        ))
    })
}

/// Datasets, source partition tables and every policy that does not
/// address a generated entity.
fn define(mart: &mut Mart, config: &WorkspaceConfig) -> Result<Vec<SchemaId>, CliError> {
    for partition in &config.partition_tables {
        let table = source_table(mart, &partition.source, &partition.table)?;
        mart.add_source_partition_table(&partition.name, table, partition.columns.clone())?;
    }

    let mut datasets = Vec::with_capacity(config.datasets.len());
    for dataset in &config.datasets {
        let central = source_table(mart, &dataset.source, &dataset.central_table)?;
        let id = mart.add_dataset(&dataset.name, central)?;
        {
            let info = mart.dataset_mut(id)?;
            info.optimiser = dataset.optimiser;
            info.invisible = dataset.invisible;
        }
        mart.set_make_dimensions(id, dataset.make_dimensions)?;
        for policy in &dataset.relations {
            apply_relation_policy(mart, id, policy)?;
        }
        for policy in &dataset.table_restrictions {
            let table = source_table(mart, &dataset.source, &policy.source_table)?;
            mart.set_table_restriction(id, &policy.table, table, Some(policy.restriction.clone()))?;
        }
        for expression in &dataset.expressions {
            mart.add_expression_column(
                id,
                &expression.table,
                &expression.name,
                expression.definition.clone(),
            )?;
        }
        for application in dataset
            .partitions
            .iter()
            .filter(|application| !dataset_backed(config, &application.partition_table))
        {
            apply_partition(mart, id, application)?;
        }
        debug!(dataset = %dataset.name, "dataset defined");
        datasets.push(id);
    }
    Ok(datasets)
}

fn dataset_backed(config: &WorkspaceConfig, partition_table: &str) -> bool {
    config
        .datasets
        .iter()
        .any(|dataset| dataset.name == partition_table && dataset.partition_columns.is_some())
}

fn apply_relation_policy(
    mart: &mut Mart,
    dataset: SchemaId,
    policy: &RelationPolicy,
) -> Result<(), CliError> {
    let relation = relation(mart, &policy.relation)?;
    let table = policy.table.as_str();
    if policy.masked {
        mart.set_relation_masked(dataset, table, relation, true)?;
    }
    if policy.forced {
        mart.set_relation_forced(dataset, table, relation, true)?;
    }
    if policy.merged {
        mart.set_relation_merged(dataset, table, relation, true)?;
    }
    if policy.subclass {
        mart.set_relation_subclass(dataset, table, relation, true)?;
    }
    if policy.alternative_join {
        mart.set_relation_alternative_join(dataset, table, relation, true)?;
    }
    if let Some(compound) = &policy.compound {
        mart.set_relation_compound(dataset, table, relation, Some(compound.clone()))?;
    }
    if let Some(loopback) = &policy.loopback {
        mart.set_relation_loopback(dataset, table, relation, Some(loopback.clone()))?;
    }
    if let Some(unroll) = &policy.unroll {
        mart.set_relation_unrolled(dataset, table, relation, Some(unroll.clone()))?;
    }
    if let Some(restriction) = &policy.restriction {
        mart.set_relation_restriction(
            dataset,
            table,
            relation,
            policy.restriction_iteration,
            Some(restriction.clone()),
        )?;
    }
    Ok(())
}

fn apply_partition(
    mart: &mut Mart,
    dataset: SchemaId,
    application: &PartitionApplicationConfig,
) -> Result<(), CliError> {
    let target = match &application.table {
        Some(table) => ApplicationTarget::DatasetTable {
            dataset,
            table: table.clone(),
        },
        None => ApplicationTarget::Dataset { dataset },
    };
    mart.apply_partition_table(PartitionApplication {
        partition_table: application.partition_table.clone(),
        target,
        rows: application.rows.clone(),
    })?;
    Ok(())
}

/// Dataset partition tables and the policies that address generated tables
/// and columns.
fn shape(mart: &mut Mart, config: &WorkspaceConfig, datasets: &[SchemaId]) -> Result<(), CliError> {
    for (dataset, id) in config.datasets.iter().zip(datasets) {
        if let Some(columns) = &dataset.partition_columns {
            let schema = dataset.materialized_schema.clone().ok_or_else(|| {
                CliError::InvalidConfig(format!(
                    "dataset '{}' needs materialized_schema to become a partition table",
                    dataset.name
                ))
            })?;
            mart.convert_dataset_to_partition_table(*id, columns.clone(), schema)?;
        }
    }
    for (dataset, id) in config.datasets.iter().zip(datasets) {
        for application in dataset
            .partitions
            .iter()
            .filter(|application| dataset_backed(config, &application.partition_table))
        {
            apply_partition(mart, *id, application)?;
        }
        shape_generated(mart, *id, dataset)?;
    }
    Ok(())
}

fn shape_generated(mart: &mut Mart, dataset: SchemaId, config: &DatasetConfig) -> Result<(), CliError> {
    for policy in &config.columns {
        let table = generated_table(mart, dataset, &policy.table)?;
        let column = generated_column(mart, table, &policy.column)?;
        if policy.masked {
            mart.set_column_masked(dataset, column, true)?;
        }
        if policy.indexed {
            mart.set_column_indexed(dataset, column, true)?;
        }
        if let Some(rename) = &policy.rename {
            mart.rename_column(dataset, column, Some(rename.clone()))?;
        }
    }
    for policy in &config.dimensions {
        let table = generated_table(mart, dataset, &policy.table)?;
        if policy.masked {
            mart.set_dimension_masked(dataset, table, true)?;
        }
        if let Some(start) = &policy.transform_start {
            let start = source_table(mart, &config.source, start)?;
            mart.set_transform_start(dataset, table, Some(start))?;
        }
    }
    Ok(())
}

/// Where the rows of each partition table come from, for the run summary.
pub fn partition_sources(mart: &Mart) -> BTreeMap<String, String> {
    mart.partitions
        .tables()
        .map(|partition| {
            let (schema, table) = partition.source().location(mart);
            let kind = match partition.source() {
                PartitionSource::SourceTable { .. } => "source",
                PartitionSource::Dataset { .. } => "dataset",
            };
            (partition.name().to_string(), format!("{kind}:{schema}.{table}"))
        })
        .collect()
}
