use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::model::Mart;

/// Validate internal consistency of the entity graph.
///
/// This checks:
/// - keys are non-empty and only use columns of their own table
/// - relations join keys of equal arity on distinct tables
/// - generated table names are unique within their dataset
/// - visible column names are unique within each generated table
pub fn validate_mart(mart: &Mart) -> Result<()> {
    for schema in mart.schemas() {
        let mut table_names = BTreeSet::new();
        for table_id in schema.tables() {
            let table = mart.table(table_id);
            if !table_names.insert(table.name()) || table.schema() != schema.id() {
                return Err(Error::data_model(format!(
                    "duplicate or misplaced table: {}",
                    mart.qualified_table_name(table_id)
                )));
            }

            for key_id in table.keys() {
                let key = mart.key(key_id);
                if key.columns().is_empty() {
                    return Err(Error::data_model(format!(
                        "empty key {} on {}",
                        key_id,
                        mart.qualified_table_name(table_id)
                    )));
                }
                if key
                    .columns()
                    .iter()
                    .any(|column| mart.get_column(*column).is_none_or(|c| c.table() != table_id))
                {
                    return Err(Error::data_model(format!(
                        "key {} uses a column outside its table",
                        mart.key_label(key_id)
                    )));
                }
            }

            if table.is_generated() {
                let mut visible = BTreeSet::new();
                for column in table.columns() {
                    let name = mart.column(column).modified_name();
                    if !visible.insert(name) {
                        return Err(Error::data_model(format!(
                            "duplicate column name: {}.{name}",
                            mart.qualified_table_name(table_id)
                        )));
                    }
                }
            }
        }
    }

    for relation in mart.relations() {
        let first = mart.key(relation.first_key());
        let second = mart.key(relation.second_key());
        if first.table() == second.table() {
            return Err(Error::data_model(format!(
                "relation {} joins a table to itself",
                mart.relation_name(relation.id())
            )));
        }
        if first.columns().len() != second.columns().len() {
            return Err(Error::data_model(format!(
                "relation {} joins keys of different arity",
                mart.relation_name(relation.id())
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetColumn, DatasetColumnKind, SourceSettings};

    #[test]
    fn clashing_visible_names_are_rejected() {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("src", SourceSettings::new("public"))
            .unwrap();
        let gene = mart.add_table(schema, "gene").unwrap();
        let name = mart.add_column(gene, "name").unwrap();
        assert!(validate_mart(&mart).is_ok());

        let dataset = mart.add_dataset("genes", gene).unwrap();
        let table = mart.add_table(dataset, "genes").unwrap();
        mart.table_mut(table).generated = Some(crate::model::DatasetTableInfo::new(
            crate::status::DatasetTableType::Main,
            gene,
        ));
        for internal in ["a__name", "b__name"] {
            let column = mart.add_column(table, internal).unwrap();
            mart.column_mut(column).generated = Some(DatasetColumn::new(
                DatasetColumnKind::Wrapped { source: name },
                "name",
            ));
        }

        let err = validate_mart(&mart).unwrap_err();
        assert!(matches!(err, Error::DataModel(_)));
    }
}
