use async_trait::async_trait;

use martforge_core::{ColumnId, Result, TableId};

use crate::keys::{InferenceContext, KeyInference, key_column_names};

/// Foreign keys derived from column naming conventions, for sources
/// without declared constraints.
///
/// A table whose first primary-key column is `id`, `<table>` or
/// `<table>_id` is referenced by every other table of the schema that has a
/// matching column for each of its primary-key columns. A column `c` is
/// matched by `c` itself (unless it is `id`), `c_key` or `<table>_c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuessingKeyInference;

#[async_trait]
impl KeyInference for GuessingKeyInference {
    fn name(&self) -> &'static str {
        "guessing"
    }

    async fn infer(&self, ctx: &mut InferenceContext<'_>) -> Result<()> {
        let tables: Vec<TableId> = ctx.mart.schema(ctx.schema).tables().collect();

        for &origin in &tables {
            let Some(pk) = ctx.mart.table(origin).primary_key() else {
                continue;
            };
            if ctx.mart.key(pk).status.is_incorrect() {
                continue;
            }
            // A primary key that is also a foreign key was borrowed from elsewhere.
            let pk_columns = ctx.mart.key(pk).columns().to_vec();
            let borrowed = ctx
                .mart
                .table(origin)
                .foreign_keys()
                .any(|fk| ctx.mart.key(fk).same_columns(&pk_columns));
            if borrowed {
                continue;
            }

            let origin_name = ctx.mart.table(origin).name().to_string();
            let names = key_column_names(ctx.mart, pk);
            if !identifies(&origin_name, &names[0]) {
                continue;
            }

            for &candidate in &tables {
                if candidate == origin {
                    continue;
                }
                let matched: Option<Vec<ColumnId>> = names
                    .iter()
                    .map(|name| {
                        candidate_names(&origin_name, name)
                            .iter()
                            .find_map(|option| ctx.mart.find_column(candidate, option))
                    })
                    .collect();
                if let Some(fk_columns) = matched {
                    ctx.confirm_foreign_key(pk, candidate, fk_columns)?;
                }
            }
        }

        ctx.remove_unconfirmed();
        Ok(())
    }
}

fn identifies(table: &str, column: &str) -> bool {
    column == "id" || column == table || column == format!("{table}_id")
}

fn candidate_names(table: &str, column: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(3);
    if column != "id" {
        names.push(column.to_string());
    }
    names.push(format!("{column}_key"));
    names.push(format!("{table}_{column}"));
    names
}

/// Primary-key column guessed for a table that declares none.
pub fn guess_primary_key<'a>(table: &str, columns: &'a [String]) -> Option<&'a str> {
    columns
        .iter()
        .find(|column| column.as_str() == table || **column == format!("{table}_id"))
        .map(String::as_str)
}
