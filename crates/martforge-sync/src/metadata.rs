use async_trait::async_trait;
use tracing::debug;

use martforge_core::{Result, TableId};
use martforge_introspect::{ExportedKey, SchemaScope};

use crate::keys::{InferenceContext, KeyInference, key_column_names};

/// Foreign keys as declared by source metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataKeyInference;

#[async_trait]
impl KeyInference for MetadataKeyInference {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn infer(&self, ctx: &mut InferenceContext<'_>) -> Result<()> {
        let settings = ctx.mart.source_settings(ctx.schema)?.clone();
        let tables: Vec<TableId> = ctx.mart.schema(ctx.schema).tables().collect();

        for table in tables {
            let Some(pk) = ctx.mart.table(table).primary_key() else {
                continue;
            };
            if ctx.mart.key(pk).status.is_incorrect() {
                continue;
            }
            let pk_columns = key_column_names(ctx.mart, pk);
            let table_name = ctx.mart.table(table).name().to_string();

            let mut groups = Vec::new();
            for (database_schema, prefix) in settings.database_schemas() {
                let present = prefix
                    .as_deref()
                    .is_none_or(|prefix| ctx.mart.table(table).in_partition(prefix));
                if !present {
                    continue;
                }
                let scope = SchemaScope::new(database_schema).with_catalog(settings.catalog.clone());
                let rows = ctx.source.list_exported_keys(&scope, &table_name).await?;
                groups.extend(group_exported_keys(rows));
            }

            for group in groups {
                let Some(fk_table) = ctx
                    .mart
                    .find_source_table(&group[0].fk_schema, &group[0].fk_table)
                else {
                    debug!(
                        schema = %group[0].fk_schema,
                        table = %group[0].fk_table,
                        "referencing table is not modelled"
                    );
                    continue;
                };
                if fk_table == table || group.len() != pk_columns.len() {
                    continue;
                }
                let fk_columns: Option<Vec<_>> = pk_columns
                    .iter()
                    .map(|pk_column| {
                        let row = group.iter().find(|row| row.pk_column == *pk_column)?;
                        ctx.mart.find_column(fk_table, &row.fk_column)
                    })
                    .collect();
                if let Some(fk_columns) = fk_columns {
                    ctx.confirm_foreign_key(pk, fk_table, fk_columns)?;
                }
            }
        }

        ctx.remove_unconfirmed();
        Ok(())
    }
}

/// Split exported-key rows into one group per foreign key. A key sequence
/// of 1, or a change of referencing table, starts a new key.
pub fn group_exported_keys(rows: Vec<ExportedKey>) -> Vec<Vec<ExportedKey>> {
    let mut groups: Vec<Vec<ExportedKey>> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group)
                if row.key_seq > 1
                    && group[0].fk_schema == row.fk_schema
                    && group[0].fk_table == row.fk_table =>
            {
                group.push(row)
            }
            _ => groups.push(vec![row]),
        }
    }
    groups
}
