//! Partition rows: loading and caching.

use tracing::{debug, info};

use martforge_core::{Error, Mart, PartitionRow, PartitionSource, Result};
use martforge_introspect::{RowSource, SchemaScope};

/// Fill the row cache of partition table `name` and return its row count.
///
/// Source-table partitions read the distinct combinations of their selected
/// columns; dataset partitions read the first rows of the materialized main
/// table. Rows already cached are kept as they are.
pub async fn load_partition_rows(mart: &mut Mart, name: &str, rows: &dyn RowSource) -> Result<usize> {
    let partition = mart
        .partitions
        .table(name)
        .ok_or_else(|| Error::partition(format!("unknown partition table '{name}'")))?;
    if let Some(cached) = partition.rows() {
        return Ok(cached.len());
    }

    let (database_schema, table) = partition.source().location(mart);
    let scope = SchemaScope::new(database_schema);
    let table = table.to_string();
    let selected = partition.selected_columns().to_vec();
    let limit = partition.row_limit;
    let distinct = matches!(partition.source(), PartitionSource::SourceTable { .. });
    debug!(partition = %name, schema = %scope.schema, table = %table, distinct, "loading partition rows");

    let fetched = if distinct {
        rows.distinct_values(&scope, &table, &selected, limit).await
    } else {
        rows.first_rows(&scope, &table, &selected, limit).await
    }
    .map_err(|err| Error::partition(format!("partition table '{name}' produced no rows: {err}")))?;

    let loaded: Vec<PartitionRow> = fetched
        .into_iter()
        .map(|values| PartitionRow::new(selected.iter().cloned().zip(values)))
        .collect();
    let partition = mart
        .partitions
        .table_mut(name)
        .ok_or_else(|| Error::invariant(format!("partition table '{name}' vanished while loading")))?;
    partition.set_rows(loaded);
    let count = partition.rows().map_or(0, <[PartitionRow]>::len);
    info!(partition = %name, rows = count, "partition rows loaded");
    Ok(count)
}
