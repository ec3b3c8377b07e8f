//! Resynchronization after a batch of changes: dirty sources are
//! synchronized, partition rows loaded, dirty datasets regenerated.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use martforge_core::{Mart, PartitionSource, Result, SchemaId};
use martforge_introspect::{RowSource, SourceIntrospector};
use martforge_sync::{OrphanConfirmation, SyncReport, synchronize};

use crate::compiler::{GenerationReport, generate};
use crate::partition::load_partition_rows;

/// Collaborators a resync talks to.
pub struct ResyncContext<'a> {
    pub source: &'a dyn SourceIntrospector,
    pub rows: &'a dyn RowSource,
    pub confirmation: &'a dyn OrphanConfirmation,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncReport {
    /// Per source schema name.
    pub synchronized: BTreeMap<String, SyncReport>,
    /// Per dataset name.
    pub generated: BTreeMap<String, GenerationReport>,
    pub partitions_loaded: Vec<String>,
    /// True when a transaction was still open and nothing ran.
    pub deferred: bool,
}

/// Bring every dirty schema up to date. Does nothing while a transaction is
/// open; the caller resyncs again once the outermost one has ended.
pub async fn resync(mart: &mut Mart, context: &ResyncContext<'_>) -> Result<ResyncReport> {
    let mut report = ResyncReport::default();
    if mart.in_transaction() {
        debug!("resync deferred until the transaction ends");
        report.deferred = true;
        return Ok(report);
    }

    for schema in mart.dirty_sources() {
        let name = mart.schema(schema).name().to_string();
        let mut progress = |percent: u8| debug!(schema = %name, percent, "synchronizing");
        let synced = synchronize(mart, schema, context.source, context.confirmation, &mut progress).await?;
        if !synced.is_unchanged() {
            invalidate_source_partitions(mart, schema);
        }
        report.synchronized.insert(name.clone(), synced);
    }

    let datasets = mart.dirty_datasets();
    let mut needed = BTreeSet::new();
    for dataset in &datasets {
        needed.extend(
            mart.partitions
                .applications_for(*dataset)
                .map(|application| application.partition_table.clone()),
        );
        needed.extend(
            mart.dataset(*dataset)?
                .pending_applications
                .iter()
                .map(|application| application.partition_table.clone()),
        );
    }
    for name in needed {
        let cached = mart
            .partitions
            .table(&name)
            .is_some_and(|partition| partition.is_loaded());
        load_partition_rows(mart, &name, context.rows).await?;
        if !cached {
            report.partitions_loaded.push(name);
        }
    }

    for dataset in datasets {
        let generated = generate(mart, dataset)?;
        report.generated.insert(generated.dataset.clone(), generated);
    }
    info!(
        sources = report.synchronized.len(),
        datasets = report.generated.len(),
        partitions = report.partitions_loaded.len(),
        "resync finished"
    );
    Ok(report)
}

/// Drop cached rows of partition tables read from `schema`.
fn invalidate_source_partitions(mart: &mut Mart, schema: SchemaId) {
    let stale: Vec<String> = mart
        .partitions
        .tables()
        .filter(|partition| partition.is_loaded())
        .filter(|partition| match partition.source() {
            PartitionSource::SourceTable {
                database_schema,
                table,
            } => mart
                .find_source_table(database_schema, table)
                .is_none_or(|found| mart.table(found).schema() == schema),
            PartitionSource::Dataset { .. } => false,
        })
        .map(|partition| partition.name().to_string())
        .collect();
    for name in stale {
        if let Some(partition) = mart.partitions.table_mut(&name) {
            partition.invalidate_rows();
            debug!(partition = %name, "cached partition rows invalidated");
        }
    }
}
