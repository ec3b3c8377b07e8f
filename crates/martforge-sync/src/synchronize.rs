use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use martforge_core::{
    ColumnId, ComponentStatus, Error, KeyId, KeyKind, Mart, Result, SchemaId, SourceSettings,
    TableId,
};
use martforge_introspect::{SchemaScope, SourceIntrospector};

use crate::guess::{GuessingKeyInference, guess_primary_key};
use crate::keys::{InferenceContext, KeyInference};
use crate::metadata::MetadataKeyInference;
use crate::orphans::{OrphanConfirmation, OrphanDecision, OrphanEntry, OrphanReport};
use crate::report::SyncReport;

/// A table as the source reports it, merged across partitions.
#[derive(Debug, Default)]
struct ObservedTable {
    columns: Vec<String>,
    column_partitions: BTreeMap<String, BTreeSet<String>>,
    partitions: BTreeSet<String>,
    primary_key: Vec<String>,
}

/// Bring one source schema in line with the database.
///
/// The source is read completely before the model changes. Keys that
/// reference vanished columns are reported to `confirmation` first; an abort
/// leaves the model untouched. `progress` receives 0 at the start, one
/// update per table in each of the column and primary-key passes, and 100
/// at the end.
pub async fn synchronize(
    mart: &mut Mart,
    schema: SchemaId,
    source: &dyn SourceIntrospector,
    confirmation: &dyn OrphanConfirmation,
    progress: &mut dyn FnMut(u8),
) -> Result<SyncReport> {
    let settings = mart.source_settings(schema)?.clone();
    let schema_name = mart.schema(schema).name().to_string();
    info!(schema = %schema_name, engine = source.engine(), "synchronization started");
    progress(0);

    let observed = snapshot(source, &settings).await?;
    debug!(schema = %schema_name, tables = observed.len(), "source snapshot taken");

    let mut report = SyncReport::default();
    let orphans = find_orphans(mart, schema, &observed);
    if !orphans.is_empty() {
        match confirmation.confirm(&orphans) {
            OrphanDecision::Abort => {
                warn!(schema = %schema_name, orphans = orphans.entries.len(), "synchronization aborted");
                return Err(Error::Aborted(format!(
                    "{} key column(s) of '{schema_name}' no longer exist in the source",
                    orphans.entries.len()
                )));
            }
            OrphanDecision::Proceed => delete_orphans(mart, schema, &observed, &mut report),
        }
    }
    report.orphans = orphans;

    let existing: Vec<(String, TableId)> = mart
        .schema(schema)
        .tables()
        .map(|table| (mart.table(table).name().to_string(), table))
        .collect();
    for (name, table) in existing {
        if !observed.contains_key(&name) {
            mart.remove_table(table);
            report.tables_removed.push(name);
        }
    }

    let total = observed.len() * 2;
    let mut done = 0;
    for (name, table) in &observed {
        sync_columns(mart, schema, name, table, &mut report)?;
        done += 1;
        progress(percent(done, total));
    }
    for (name, table) in &observed {
        sync_primary_key(mart, schema, name, table, settings.key_guessing, &mut report)?;
        done += 1;
        progress(percent(done, total));
    }

    let inference: Box<dyn KeyInference> = if settings.key_guessing {
        Box::new(GuessingKeyInference)
    } else {
        Box::new(MetadataKeyInference)
    };
    debug!(schema = %schema_name, strategy = inference.name(), "inferring foreign keys");
    let mut ctx = InferenceContext::new(mart, schema, source, &mut report);
    inference.infer(&mut ctx).await?;

    mart.clear_dirty(schema);
    mart.mark_datasets_dirty();
    progress(100);
    info!(
        schema = %schema_name,
        tables_added = report.tables_added.len(),
        tables_removed = report.tables_removed.len(),
        columns_added = report.columns_added.len(),
        columns_removed = report.columns_removed.len(),
        keys_created = report.keys_created,
        keys_removed = report.keys_removed,
        relations_created = report.relations_created,
        relations_removed = report.relations_removed,
        "synchronization finished"
    );
    Ok(report)
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    // Never report completion before key inference has run.
    ((done * 99) / total).min(99) as u8
}

async fn snapshot(
    source: &dyn SourceIntrospector,
    settings: &SourceSettings,
) -> Result<BTreeMap<String, ObservedTable>> {
    let mut observed: BTreeMap<String, ObservedTable> = BTreeMap::new();
    for (database_schema, prefix) in settings.database_schemas() {
        let scope = SchemaScope::new(database_schema).with_catalog(settings.catalog.clone());
        for table in source.list_tables(&scope).await? {
            let columns = source.list_columns(&scope, &table).await?;
            let primary_key = source.list_primary_key(&scope, &table).await?;

            let entry = observed.entry(table).or_default();
            if let Some(prefix) = &prefix {
                entry.partitions.insert(prefix.clone());
            }
            for column in columns {
                if let Some(prefix) = &prefix {
                    entry
                        .column_partitions
                        .entry(column.clone())
                        .or_default()
                        .insert(prefix.clone());
                }
                if !entry.columns.contains(&column) {
                    entry.columns.push(column);
                }
            }
            if entry.primary_key.is_empty() {
                entry.primary_key = primary_key;
            }
        }
    }
    Ok(observed)
}

/// Keys of surviving tables that use a column the source no longer has.
fn orphaned_keys(
    mart: &Mart,
    schema: SchemaId,
    observed: &BTreeMap<String, ObservedTable>,
) -> Vec<(KeyId, ColumnId)> {
    let mut orphans = Vec::new();
    for table in mart.schema(schema).tables() {
        let Some(seen) = observed.get(mart.table(table).name()) else {
            continue;
        };
        for key in mart.table(table).keys() {
            let missing = mart
                .key(key)
                .columns()
                .iter()
                .find(|column| !seen.columns.iter().any(|name| name == mart.column(**column).name()));
            if let Some(column) = missing {
                orphans.push((key, *column));
            }
        }
    }
    orphans
}

fn find_orphans(
    mart: &Mart,
    schema: SchemaId,
    observed: &BTreeMap<String, ObservedTable>,
) -> OrphanReport {
    let entries = orphaned_keys(mart, schema, observed)
        .into_iter()
        .map(|(key, column)| OrphanEntry {
            table: mart.qualified_table_name(mart.key(key).table()),
            key: mart.key_label(key),
            column: mart.column(column).name().to_string(),
            relations: mart
                .key(key)
                .relations()
                .map(|relation| mart.relation_name(relation))
                .collect(),
        })
        .collect();
    OrphanReport { entries }
}

fn delete_orphans(
    mart: &mut Mart,
    schema: SchemaId,
    observed: &BTreeMap<String, ObservedTable>,
    report: &mut SyncReport,
) {
    for (key, _) in orphaned_keys(mart, schema, observed) {
        report.relations_removed += mart.key(key).relations().count();
        debug!(key = %mart.key_label(key), "orphaned key removed");
        mart.remove_key(key);
        report.keys_removed += 1;
    }
}

fn sync_columns(
    mart: &mut Mart,
    schema: SchemaId,
    name: &str,
    observed: &ObservedTable,
    report: &mut SyncReport,
) -> Result<()> {
    let table = match mart.find_table(schema, name) {
        Some(table) => table,
        None => {
            report.tables_added.push(name.to_string());
            mart.add_table(schema, name)?
        }
    };
    mart.table_mut(table).in_partitions = observed.partitions.clone();

    let existing: Vec<(String, ColumnId)> = mart
        .table(table)
        .columns()
        .map(|column| (mart.column(column).name().to_string(), column))
        .collect();
    for (column_name, column) in existing {
        if !observed.columns.contains(&column_name) {
            mart.remove_column(column);
            report.columns_removed.push(format!("{name}.{column_name}"));
        }
    }

    for column_name in &observed.columns {
        let column = match mart.find_column(table, column_name) {
            Some(column) => column,
            None => {
                report.columns_added.push(format!("{name}.{column_name}"));
                mart.add_column(table, column_name.as_str())?
            }
        };
        mart.column_mut(column).in_partitions = observed
            .column_partitions
            .get(column_name)
            .cloned()
            .unwrap_or_default();
    }
    Ok(())
}

fn sync_primary_key(
    mart: &mut Mart,
    schema: SchemaId,
    name: &str,
    observed: &ObservedTable,
    key_guessing: bool,
    report: &mut SyncReport,
) -> Result<()> {
    let table = mart
        .find_table(schema, name)
        .ok_or_else(|| Error::invariant(format!("table '{name}' vanished during synchronization")))?;

    let mut names: Vec<&str> = observed.primary_key.iter().map(String::as_str).collect();
    if names.is_empty() && key_guessing {
        names.extend(guess_primary_key(name, &observed.columns));
    }
    let columns: Option<Vec<ColumnId>> = if names.is_empty() {
        None
    } else {
        let resolved = names
            .iter()
            .map(|column| mart.find_column(table, column))
            .collect::<Option<Vec<_>>>();
        Some(resolved.ok_or_else(|| {
            Error::data_model(format!("primary key of '{name}' names an unknown column"))
        })?)
    };

    match (mart.table(table).primary_key(), columns) {
        (None, None) => {}
        (Some(key), None) => {
            if !mart.key(key).status.is_handmade() {
                report.relations_removed += mart.key(key).relations().count();
                mart.remove_key(key);
                report.keys_removed += 1;
            }
        }
        (None, Some(columns)) => {
            mart.add_key(table, KeyKind::Primary, columns, ComponentStatus::Inferred)?;
            report.keys_created += 1;
        }
        (Some(key), Some(columns)) => {
            let status = mart.key(key).status;
            let equal = mart.key(key).same_columns(&columns);
            match (status, equal) {
                (ComponentStatus::Handmade, true) => {
                    mart.set_key_status(key, ComponentStatus::Inferred)
                }
                (ComponentStatus::Handmade, false) | (_, true) => {}
                (_, false) => {
                    debug!(key = %mart.key_label(key), "primary key replaced");
                    report.relations_removed += mart.key(key).relations().count();
                    mart.remove_key(key);
                    report.keys_removed += 1;
                    mart.add_key(table, KeyKind::Primary, columns, ComponentStatus::Inferred)?;
                    report.keys_created += 1;
                }
            }
        }
    }
    Ok(())
}
