//! Foreign-key inference strategies and the reconciliation they share.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use martforge_core::{
    Cardinality, ColumnId, ComponentStatus, KeyId, KeyKind, Mart, RelationId, Result, SchemaId,
    TableId,
};
use martforge_introspect::SourceIntrospector;

use crate::report::SyncReport;

/// Working state of one inference pass over a source schema.
pub struct InferenceContext<'a> {
    pub mart: &'a mut Mart,
    pub schema: SchemaId,
    pub source: &'a dyn SourceIntrospector,
    pub report: &'a mut SyncReport,
    seen_keys: BTreeSet<KeyId>,
    seen_relations: BTreeSet<RelationId>,
}

impl<'a> InferenceContext<'a> {
    pub fn new(
        mart: &'a mut Mart,
        schema: SchemaId,
        source: &'a dyn SourceIntrospector,
        report: &'a mut SyncReport,
    ) -> Self {
        Self {
            mart,
            schema,
            source,
            report,
            seen_keys: BTreeSet::new(),
            seen_relations: BTreeSet::new(),
        }
    }

    /// Record that `fk_columns` on `fk_table` reference primary key `pk`.
    ///
    /// Reuses an equal foreign key or creates one, then reconciles the
    /// relation: a matching cardinality confirms it as `Inferred`, a
    /// mismatch keeps the model's cardinality and marks it `Modified`.
    /// Relations marked incorrect are left alone.
    pub fn confirm_foreign_key(
        &mut self,
        pk: KeyId,
        fk_table: TableId,
        fk_columns: Vec<ColumnId>,
    ) -> Result<()> {
        let fk = match self.mart.find_foreign_key(fk_table, &fk_columns) {
            Some(existing) => {
                if self.mart.key(existing).status.is_handmade() {
                    self.mart.set_key_status(existing, ComponentStatus::Inferred);
                }
                existing
            }
            None => {
                self.report.keys_created += 1;
                self.mart.add_key(
                    fk_table,
                    KeyKind::Foreign,
                    fk_columns.clone(),
                    ComponentStatus::Inferred,
                )?
            }
        };
        self.seen_keys.insert(fk);

        let unique = self
            .mart
            .table(fk_table)
            .primary_key()
            .is_some_and(|own| self.mart.key(own).same_columns(&fk_columns));
        let observed = if unique {
            Cardinality::One
        } else {
            Cardinality::Many
        };

        match self.mart.find_relation(pk, fk) {
            Some(id) => {
                self.seen_relations.insert(id);
                let relation = self.mart.relation_mut(id);
                match relation.status {
                    ComponentStatus::InferredIncorrect => {}
                    ComponentStatus::Handmade => {
                        if relation.cardinality == observed {
                            relation.status = ComponentStatus::Inferred;
                        }
                    }
                    ComponentStatus::Inferred | ComponentStatus::Modified => {
                        if relation.cardinality == observed {
                            relation.status = ComponentStatus::Inferred;
                            relation.original_cardinality = None;
                        } else {
                            relation.status = ComponentStatus::Modified;
                            relation.original_cardinality = Some(observed);
                        }
                    }
                }
            }
            None => {
                let id = self
                    .mart
                    .add_relation(pk, fk, observed, ComponentStatus::Inferred)?;
                debug!(relation = %self.mart.relation_name(id), cardinality = %observed, "relation inferred");
                self.seen_relations.insert(id);
                self.report.relations_created += 1;
            }
        }
        Ok(())
    }

    /// Drop relations anchored on this schema's primary keys, then foreign
    /// keys of this schema, that the pass did not confirm. Handmade and
    /// incorrect ones stay.
    pub fn remove_unconfirmed(&mut self) {
        let keep = |status: ComponentStatus| status.is_handmade() || status.is_incorrect();

        let stale_relations: Vec<RelationId> = self
            .mart
            .relations()
            .filter(|relation| !self.seen_relations.contains(&relation.id()))
            .filter(|relation| !keep(relation.status))
            .filter(|relation| {
                let anchor = self.mart.key(relation.first_key()).table();
                self.mart.table(anchor).schema() == self.schema
            })
            .map(|relation| relation.id())
            .collect();
        for relation in stale_relations {
            debug!(relation = %self.mart.relation_name(relation), "relation no longer reported");
            self.mart.remove_relation(relation);
            self.report.relations_removed += 1;
        }

        let stale_keys: Vec<KeyId> = self
            .mart
            .schema(self.schema)
            .tables()
            .flat_map(|table| self.mart.table(table).foreign_keys())
            .filter(|key| !self.seen_keys.contains(key))
            .filter(|key| {
                let key = self.mart.key(*key);
                !keep(key.status) && key.relations().next().is_none()
            })
            .collect();
        for key in stale_keys {
            debug!(key = %self.mart.key_label(key), "foreign key no longer reported");
            self.mart.remove_key(key);
            self.report.keys_removed += 1;
        }
    }
}

/// A strategy that (re)derives foreign keys and relations for one source
/// schema whose tables, columns and primary keys are already synchronized.
#[async_trait]
pub trait KeyInference: Send + Sync {
    fn name(&self) -> &'static str;

    async fn infer(&self, ctx: &mut InferenceContext<'_>) -> Result<()>;
}

/// Column names of a key, in key order.
pub(crate) fn key_column_names(mart: &Mart, key: KeyId) -> Vec<String> {
    mart.key(key)
        .columns()
        .iter()
        .map(|column| mart.column(*column).name().to_string())
        .collect()
}
