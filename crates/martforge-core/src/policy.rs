//! Typed access to dataset policy stored in [`Mods`], and the validated
//! setters that are the only way callers change it.
//!
//! Relation policy is filed under the generated table being built when the
//! relation is met, falling back to [`DATASET_WIDE`]. Column policy is filed
//! under the owning generated table, keyed by internal column name.

use crate::definitions::{
    CompoundDefinition, ExpressionDefinition, LoopbackDefinition, RelationRestriction,
    TableRestriction, UnrollDefinition,
};
use crate::error::{Error, Result};
use crate::model::{ColumnId, Mart, PendingExpression, RelationId, SchemaId, TableId};
use crate::mods::{DATASET_WIDE, ModProperty, ModValue, Mods, TABLE_ENTITY};
use crate::status::{Cardinality, DatasetTableType};

/// Entity name of a per-iteration relation restriction.
pub fn restriction_entity(relation: &str, iteration: usize) -> String {
    format!("{relation}#{iteration}")
}

impl Mods {
    fn lookup(&self, table: &str, property: ModProperty, entity: &str) -> Option<&Option<ModValue>> {
        self.get(table, property)
            .and_then(|entities| entities.get(entity))
            .or_else(|| {
                self.get(DATASET_WIDE, property)
                    .and_then(|entities| entities.get(entity))
            })
    }

    /// Whether a flag-style entry exists for the table or dataset-wide.
    pub fn flag(&self, table: &str, property: ModProperty, entity: &str) -> bool {
        self.lookup(table, property, entity).is_some()
    }

    fn payload(&self, table: &str, property: ModProperty, entity: &str) -> Option<&ModValue> {
        self.lookup(table, property, entity)?.as_ref()
    }

    pub fn is_relation_masked(&self, table: &str, relation: &str) -> bool {
        self.flag(table, ModProperty::RelationMasked, relation)
    }

    pub fn is_relation_forced(&self, table: &str, relation: &str) -> bool {
        self.flag(table, ModProperty::RelationForced, relation)
    }

    pub fn is_relation_merged(&self, table: &str, relation: &str) -> bool {
        self.flag(table, ModProperty::RelationMerged, relation)
    }

    pub fn is_relation_subclass(&self, table: &str, relation: &str) -> bool {
        self.flag(table, ModProperty::RelationSubclass, relation)
    }

    pub fn is_alternative_join(&self, table: &str, relation: &str) -> bool {
        self.flag(table, ModProperty::RelationAlternativeJoin, relation)
    }

    pub fn compound(&self, table: &str, relation: &str) -> Option<&CompoundDefinition> {
        match self.payload(table, ModProperty::RelationCompound, relation)? {
            ModValue::Compound(definition) => Some(definition),
            _ => None,
        }
    }

    pub fn loopback(&self, table: &str, relation: &str) -> Option<LoopbackDefinition> {
        match self.lookup(table, ModProperty::RelationLoopback, relation)? {
            Some(ModValue::Loopback(definition)) => Some(definition.clone()),
            Some(_) | None => Some(LoopbackDefinition::default()),
        }
    }

    pub fn unroll(&self, table: &str, relation: &str) -> Option<&UnrollDefinition> {
        match self.payload(table, ModProperty::RelationUnrolled, relation)? {
            ModValue::Unroll(definition) => Some(definition),
            _ => None,
        }
    }

    pub fn relation_restriction(
        &self,
        table: &str,
        relation: &str,
        iteration: usize,
    ) -> Option<&RelationRestriction> {
        let entity = restriction_entity(relation, iteration);
        match self.payload(table, ModProperty::RelationRestriction, &entity)? {
            ModValue::RelationRestriction(restriction) => Some(restriction),
            _ => None,
        }
    }

    /// Row filter on a source table (by qualified name) when read into
    /// `table`.
    pub fn table_restriction(&self, table: &str, source_table: &str) -> Option<&TableRestriction> {
        match self.payload(table, ModProperty::TableRestriction, source_table)? {
            ModValue::TableRestriction(restriction) => Some(restriction),
            _ => None,
        }
    }

    pub fn is_column_masked(&self, table: &str, column: &str) -> bool {
        self.get(table, ModProperty::ColumnMasked)
            .is_some_and(|entities| entities.contains_key(column))
    }

    pub fn column_rename(&self, table: &str, column: &str) -> Option<&str> {
        self.value(table, ModProperty::ColumnRenamed, column)?
            .as_text()
    }

    pub fn is_column_indexed(&self, table: &str, column: &str) -> bool {
        self.get(table, ModProperty::ColumnIndexed)
            .is_some_and(|entities| entities.contains_key(column))
    }

    pub fn is_dimension_masked(&self, table: &str) -> bool {
        self.contains(table, ModProperty::DimensionMasked, TABLE_ENTITY)
    }

    /// Qualified name of the source table a dimension walks from instead of
    /// its focus table.
    pub fn transform_start(&self, table: &str) -> Option<&str> {
        self.value(table, ModProperty::TransformStart, TABLE_ENTITY)?
            .as_text()
    }

    /// Expression columns declared on a table, by column name.
    pub fn expression_columns(&self, table: &str) -> Vec<(&str, &ExpressionDefinition)> {
        let Some(entities) = self.get(table, ModProperty::ExpressionColumn) else {
            return Vec::new();
        };
        entities
            .iter()
            .filter_map(|(name, value)| match value {
                Some(ModValue::Expression(definition)) => Some((name.as_str(), definition)),
                _ => None,
            })
            .collect()
    }
}

impl Mart {
    /// Owning-table name for relation policy: the dataset-wide key or a
    /// generated table of the dataset. Ungenerated datasets accept any name.
    fn policy_owner(&self, dataset: SchemaId, table: &str) -> Result<()> {
        self.dataset(dataset)?;
        let schema = self.schema(dataset);
        if table == DATASET_WIDE || schema.table_count() == 0 || schema.table_id(table).is_some() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "dataset '{}' has no table '{table}'",
                schema.name()
            )))
        }
    }

    fn checked_relation(&self, relation: RelationId) -> Result<String> {
        self.get_relation(relation)
            .ok_or_else(|| Error::validation(format!("unknown relation {relation}")))?;
        Ok(self.relation_name(relation))
    }

    fn require_to_many(&self, relation: RelationId, what: &str) -> Result<()> {
        if self.relation(relation).cardinality == Cardinality::One {
            return Err(Error::validation(format!(
                "cannot {what} 1:1 relation {}",
                self.relation_name(relation)
            )));
        }
        Ok(())
    }

    fn set_relation_entry(
        &mut self,
        dataset: SchemaId,
        table: &str,
        property: ModProperty,
        entity: &str,
        value: Option<Option<ModValue>>,
    ) -> Result<()> {
        let mods = &mut self.dataset_mut(dataset)?.mods;
        match value {
            Some(payload) => mods.set(table, property, entity, payload),
            None => {
                mods.remove(table, property, entity);
            }
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    fn set_relation_flag(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        property: ModProperty,
        enabled: bool,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        let name = self.checked_relation(relation)?;
        self.set_relation_entry(dataset, table, property, &name, enabled.then_some(None))
    }

    pub fn set_relation_masked(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        masked: bool,
    ) -> Result<()> {
        self.set_relation_flag(dataset, table, relation, ModProperty::RelationMasked, masked)
    }

    pub fn set_relation_forced(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        forced: bool,
    ) -> Result<()> {
        self.set_relation_flag(dataset, table, relation, ModProperty::RelationForced, forced)
    }

    pub fn set_relation_merged(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        merged: bool,
    ) -> Result<()> {
        if merged {
            self.checked_relation(relation)?;
            self.require_to_many(relation, "merge")?;
        }
        self.set_relation_flag(dataset, table, relation, ModProperty::RelationMerged, merged)
    }

    pub fn set_relation_subclass(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        subclass: bool,
    ) -> Result<()> {
        if subclass {
            self.checked_relation(relation)?;
            self.require_to_many(relation, "subclass")?;
        }
        self.set_relation_flag(dataset, table, relation, ModProperty::RelationSubclass, subclass)
    }

    pub fn set_relation_alternative_join(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        enabled: bool,
    ) -> Result<()> {
        self.set_relation_flag(
            dataset,
            table,
            relation,
            ModProperty::RelationAlternativeJoin,
            enabled,
        )
    }

    pub fn set_relation_compound(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        compound: Option<CompoundDefinition>,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        let name = self.checked_relation(relation)?;
        if compound.as_ref().is_some_and(|definition| definition.count == 0) {
            return Err(Error::validation(format!(
                "compound count of {name} must be at least 1"
            )));
        }
        let value = compound.map(|definition| Some(ModValue::Compound(definition)));
        self.set_relation_entry(dataset, table, ModProperty::RelationCompound, &name, value)
    }

    pub fn set_relation_loopback(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        loopback: Option<LoopbackDefinition>,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        let name = self.checked_relation(relation)?;
        if let Some(differentiator) = loopback
            .as_ref()
            .and_then(|definition| definition.differentiator.as_deref())
        {
            let many_end = self.key(self.relation(relation).second_key()).table();
            if self.find_column(many_end, differentiator).is_none() {
                return Err(Error::validation(format!(
                    "loopback differentiator '{differentiator}' is not a column of {}",
                    self.qualified_table_name(many_end)
                )));
            }
        }
        let value = loopback.map(|definition| Some(ModValue::Loopback(definition)));
        self.set_relation_entry(dataset, table, ModProperty::RelationLoopback, &name, value)
    }

    pub fn set_relation_unrolled(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        unroll: Option<UnrollDefinition>,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        let name = self.checked_relation(relation)?;
        if let Some(definition) = &unroll {
            self.require_to_many(relation, "unroll")?;
            let one_end = self.key(self.relation(relation).first_key()).table();
            if self.find_column(one_end, &definition.name_column).is_none() {
                return Err(Error::validation(format!(
                    "unroll name column '{}' is not a column of {}",
                    definition.name_column,
                    self.qualified_table_name(one_end)
                )));
            }
        }
        let value = unroll.map(|definition| Some(ModValue::Unroll(definition)));
        self.set_relation_entry(dataset, table, ModProperty::RelationUnrolled, &name, value)
    }

    pub fn set_relation_restriction(
        &mut self,
        dataset: SchemaId,
        table: &str,
        relation: RelationId,
        iteration: usize,
        restriction: Option<RelationRestriction>,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        let name = self.checked_relation(relation)?;
        if let Some(restriction) = &restriction {
            let first = self.key(self.relation(relation).first_key()).table();
            let second = self.key(self.relation(relation).second_key()).table();
            self.check_aliases(first, restriction.left_aliases.values())?;
            self.check_aliases(second, restriction.right_aliases.values())?;
        }
        let value = restriction.map(|restriction| Some(ModValue::RelationRestriction(restriction)));
        let entity = restriction_entity(&name, iteration);
        self.set_relation_entry(dataset, table, ModProperty::RelationRestriction, &entity, value)
    }

    pub fn set_table_restriction(
        &mut self,
        dataset: SchemaId,
        table: &str,
        source_table: TableId,
        restriction: Option<TableRestriction>,
    ) -> Result<()> {
        self.policy_owner(dataset, table)?;
        if self.get_table(source_table).is_none_or(|source| source.is_generated()) {
            return Err(Error::validation(format!(
                "table restriction needs a source table, got {source_table}"
            )));
        }
        if let Some(restriction) = &restriction {
            self.check_aliases(source_table, restriction.aliases.values())?;
        }
        let entity = self.qualified_table_name(source_table);
        let value = restriction.map(|restriction| Some(ModValue::TableRestriction(restriction)));
        self.set_relation_entry(dataset, table, ModProperty::TableRestriction, &entity, value)
    }

    fn check_aliases<'a>(
        &self,
        table: TableId,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> Result<()> {
        for column in columns {
            if self.find_column(table, column).is_none() {
                return Err(Error::validation(format!(
                    "restriction alias names unknown column '{column}' of {}",
                    self.qualified_table_name(table)
                )));
            }
        }
        Ok(())
    }

    /// Generated column of `dataset` with its owning table name.
    fn dataset_column(&self, dataset: SchemaId, column: ColumnId) -> Result<(TableId, String)> {
        self.dataset(dataset)?;
        let owner = self
            .get_column(column)
            .filter(|candidate| candidate.generated.is_some())
            .map(|candidate| candidate.table())
            .filter(|table| self.table(*table).schema() == dataset)
            .ok_or_else(|| {
                Error::validation(format!("{column} is not a column of this dataset"))
            })?;
        Ok((owner, self.table(owner).name().to_string()))
    }

    pub fn set_column_masked(&mut self, dataset: SchemaId, column: ColumnId, masked: bool) -> Result<()> {
        let (_, table) = self.dataset_column(dataset, column)?;
        let current = self.column(column);
        let name = current.name().to_string();
        if masked {
            let required = current
                .generated
                .as_ref()
                .is_some_and(|generated| generated.is_required());
            if required {
                return Err(Error::validation(format!(
                    "column '{}' is used by a key or expression and cannot be masked",
                    current.modified_name()
                )));
            }
        }

        let mods = &mut self.dataset_mut(dataset)?.mods;
        if masked {
            mods.set(&table, ModProperty::ColumnMasked, &name, None);
        } else {
            mods.remove(&table, ModProperty::ColumnMasked, &name);
        }
        if let Some(generated) = self.column_mut(column).generated.as_mut() {
            generated.masked = masked;
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    /// Set or clear the visible name of a generated column.
    pub fn rename_column(
        &mut self,
        dataset: SchemaId,
        column: ColumnId,
        new_name: Option<String>,
    ) -> Result<()> {
        let (owner, table) = self.dataset_column(dataset, column)?;
        let name = self.column(column).name().to_string();
        if let Some(new_name) = &new_name {
            if new_name.trim().is_empty() {
                return Err(Error::validation("column name must not be empty"));
            }
            let clash = self
                .table(owner)
                .columns()
                .filter(|other| *other != column)
                .any(|other| self.column(other).modified_name() == new_name);
            if clash {
                return Err(Error::validation(format!(
                    "'{table}' already has a column named '{new_name}'"
                )));
            }
        }

        let mods = &mut self.dataset_mut(dataset)?.mods;
        match &new_name {
            Some(new_name) => mods.set(
                &table,
                ModProperty::ColumnRenamed,
                &name,
                Some(ModValue::text(new_name.clone())),
            ),
            None => {
                mods.remove(&table, ModProperty::ColumnRenamed, &name);
            }
        }
        if let (Some(new_name), Some(generated)) =
            (new_name, self.column_mut(column).generated.as_mut())
        {
            generated.modified_name = new_name;
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    pub fn set_column_indexed(&mut self, dataset: SchemaId, column: ColumnId, indexed: bool) -> Result<()> {
        let (_, table) = self.dataset_column(dataset, column)?;
        let name = self.column(column).name().to_string();
        let mods = &mut self.dataset_mut(dataset)?.mods;
        if indexed {
            mods.set(&table, ModProperty::ColumnIndexed, &name, None);
        } else {
            mods.remove(&table, ModProperty::ColumnIndexed, &name);
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    fn dimension_name(&self, dataset: SchemaId, table: TableId) -> Result<String> {
        self.dataset(dataset)?;
        let candidate = self
            .get_table(table)
            .filter(|candidate| candidate.schema() == dataset)
            .ok_or_else(|| Error::validation(format!("{table} is not a table of this dataset")))?;
        if candidate.table_type() != Some(DatasetTableType::Dimension) {
            return Err(Error::validation(format!(
                "'{}' is not a dimension table",
                candidate.name()
            )));
        }
        Ok(candidate.name().to_string())
    }

    pub fn set_dimension_masked(&mut self, dataset: SchemaId, table: TableId, masked: bool) -> Result<()> {
        let name = self.dimension_name(dataset, table)?;
        let mods = &mut self.dataset_mut(dataset)?.mods;
        if masked {
            mods.set(&name, ModProperty::DimensionMasked, TABLE_ENTITY, None);
        } else {
            mods.remove(&name, ModProperty::DimensionMasked, TABLE_ENTITY);
        }
        self.table_mut(table).masked = masked;
        self.mark_dirty(dataset);
        Ok(())
    }

    /// Make a dimension walk from `start` instead of its focus table.
    pub fn set_transform_start(
        &mut self,
        dataset: SchemaId,
        table: TableId,
        start: Option<TableId>,
    ) -> Result<()> {
        let name = self.dimension_name(dataset, table)?;
        let start = match start {
            Some(start) => {
                if self.get_table(start).is_none_or(|source| source.is_generated()) {
                    return Err(Error::validation(format!(
                        "transform start must be a source table, got {start}"
                    )));
                }
                Some(self.qualified_table_name(start))
            }
            None => None,
        };
        let mods = &mut self.dataset_mut(dataset)?.mods;
        match start {
            Some(start) => mods.set(
                &name,
                ModProperty::TransformStart,
                TABLE_ENTITY,
                Some(ModValue::text(start)),
            ),
            None => {
                mods.remove(&name, ModProperty::TransformStart, TABLE_ENTITY);
            }
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    /// Declare an expression column. On a dataset that was never generated
    /// the column is queued and realized by the first generation.
    pub fn add_expression_column(
        &mut self,
        dataset: SchemaId,
        table: &str,
        name: impl Into<String>,
        definition: ExpressionDefinition,
    ) -> Result<()> {
        let name = name.into();
        self.dataset(dataset)?;
        if name.trim().is_empty() || definition.expression.trim().is_empty() {
            return Err(Error::validation("expression column needs a name and an expression"));
        }
        if definition.aliases.values().any(|target| *target == name) {
            return Err(Error::validation(format!(
                "expression column '{name}' refers to itself"
            )));
        }

        let generated = self.schema(dataset).table_count() > 0;
        if !generated {
            self.dataset_mut(dataset)?
                .pending_expressions
                .push(PendingExpression {
                    table: table.to_string(),
                    column: name,
                    definition,
                });
            self.mark_dirty(dataset);
            return Ok(());
        }

        let owner = self.find_table(dataset, table).ok_or_else(|| {
            Error::validation(format!("dataset has no table '{table}'"))
        })?;
        let declared = self.dataset(dataset)?.mods.expression_columns(table);
        let existing = |candidate: &str| {
            self.table(owner)
                .columns()
                .any(|column| {
                    let column = self.column(column);
                    column.name() == candidate || column.modified_name() == candidate
                })
                || declared.iter().any(|(declared, _)| *declared == candidate)
        };
        if existing(&name) {
            return Err(Error::validation(format!(
                "'{table}' already has a column named '{name}'"
            )));
        }
        if let Some(unknown) = definition
            .aliases
            .values()
            .find(|target| !existing(target.as_str()))
        {
            return Err(Error::validation(format!(
                "expression alias names unknown column '{unknown}' of '{table}'"
            )));
        }

        self.dataset_mut(dataset)?.mods.set(
            table,
            ModProperty::ExpressionColumn,
            &name,
            Some(ModValue::Expression(definition)),
        );
        self.mark_dirty(dataset);
        Ok(())
    }

    pub fn remove_expression_column(&mut self, dataset: SchemaId, table: &str, name: &str) -> Result<()> {
        let info = self.dataset_mut(dataset)?;
        let queued = info.pending_expressions.len();
        info.pending_expressions
            .retain(|pending| !(pending.table == table && pending.column == name));
        let removed = info.mods.remove(table, ModProperty::ExpressionColumn, name)
            || info.pending_expressions.len() != queued;
        if !removed {
            return Err(Error::validation(format!(
                "'{table}' has no expression column '{name}'"
            )));
        }
        self.mark_dirty(dataset);
        Ok(())
    }

    /// Put queued expression columns and partition applications into effect
    /// and clear the queues. Returns how many entries were realized.
    pub fn realize_pending(&mut self, dataset: SchemaId) -> Result<usize> {
        let info = self.dataset_mut(dataset)?;
        let expressions = std::mem::take(&mut info.pending_expressions);
        let applications = std::mem::take(&mut info.pending_applications);
        let realized = expressions.len() + applications.len();
        for pending in expressions {
            info.mods.set(
                &pending.table,
                ModProperty::ExpressionColumn,
                &pending.column,
                Some(ModValue::Expression(pending.definition)),
            );
        }
        for application in applications {
            self.partitions.insert_application(application);
        }
        Ok(realized)
    }

    /// Toggle whether the compiler creates dimension tables for a dataset.
    pub fn set_make_dimensions(&mut self, dataset: SchemaId, enabled: bool) -> Result<()> {
        self.dataset_mut(dataset)?.make_dimensions = enabled;
        self.mark_dirty(dataset);
        Ok(())
    }
}
