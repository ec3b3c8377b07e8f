use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::mods::remap_prefix;
use crate::partition::{PartitionApplication, PartitionRegistry};
use crate::status::{Cardinality, ComponentStatus, KeyKind};

use super::{
    Column, ColumnId, Dataset, Key, KeyId, PendingExpression, Relation, RelationId, Schema,
    SchemaId, SchemaKind, SourceSettings, Table, TableId,
};

/// Separator between a dataset name and the rest of a generated table name.
pub const NAME_SEPARATOR: &str = "__";

/// Top-level workspace: every source schema and dataset, and all of their
/// tables, columns, keys and relations.
///
/// Entities live in flat maps keyed by handle; membership (table -> columns,
/// key -> relations, ...) is stored as explicit index sets. Accessors taking a
/// handle panic when the handle is stale, like indexing a slice; the `get_*`
/// variants return `Option` instead.
#[derive(Debug, Clone, Default)]
pub struct Mart {
    schemas: BTreeMap<SchemaId, Schema>,
    tables: BTreeMap<TableId, Table>,
    columns: BTreeMap<ColumnId, Column>,
    keys: BTreeMap<KeyId, Key>,
    relations: BTreeMap<RelationId, Relation>,
    next_id: u32,
    next_unique_id: u32,
    transaction_depth: u32,
    pub partitions: PartitionRegistry,
}

impl Mart {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn allocate_unique(&mut self) -> u32 {
        self.next_unique_id += 1;
        self.next_unique_id
    }

    // Schemas

    pub fn schema(&self, id: SchemaId) -> &Schema {
        &self.schemas[&id]
    }

    pub fn schema_mut(&mut self, id: SchemaId) -> &mut Schema {
        self.schemas
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale schema handle {id}"))
    }

    pub fn get_schema(&self, id: SchemaId) -> Option<&Schema> {
        self.schemas.get(&id)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn schema_by_name(&self, name: &str) -> Option<SchemaId> {
        self.schemas
            .values()
            .find(|schema| schema.name == name)
            .map(|schema| schema.id)
    }

    pub fn source_schemas(&self) -> Vec<SchemaId> {
        self.schemas
            .values()
            .filter(|schema| !schema.is_dataset())
            .map(|schema| schema.id)
            .collect()
    }

    pub fn datasets(&self) -> Vec<SchemaId> {
        self.schemas
            .values()
            .filter(|schema| schema.is_dataset())
            .map(|schema| schema.id)
            .collect()
    }

    pub fn dataset(&self, id: SchemaId) -> Result<&Dataset> {
        let schema = self
            .get_schema(id)
            .ok_or_else(|| Error::validation(format!("unknown schema {id}")))?;
        schema
            .as_dataset()
            .ok_or_else(|| Error::validation(format!("'{}' is not a dataset", schema.name)))
    }

    pub fn dataset_mut(&mut self, id: SchemaId) -> Result<&mut Dataset> {
        let schema = self
            .schemas
            .get_mut(&id)
            .ok_or_else(|| Error::validation(format!("unknown schema {id}")))?;
        let name = schema.name.clone();
        schema
            .as_dataset_mut()
            .ok_or_else(|| Error::validation(format!("'{name}' is not a dataset")))
    }

    /// Central table of a dataset, or `DataModel` when synchronization has
    /// dropped it from its source.
    pub fn central_table(&self, dataset: SchemaId) -> Result<TableId> {
        let central = self.dataset(dataset)?.central_table();
        if self.get_table(central).is_none() {
            return Err(Error::data_model(format!(
                "central table of dataset '{}' no longer exists",
                self.schema(dataset).name
            )));
        }
        Ok(central)
    }

    pub fn source_settings(&self, id: SchemaId) -> Result<&SourceSettings> {
        let schema = self
            .get_schema(id)
            .ok_or_else(|| Error::validation(format!("unknown schema {id}")))?;
        schema
            .as_source()
            .ok_or_else(|| Error::validation(format!("'{}' is not a source schema", schema.name)))
    }

    pub fn source_settings_mut(&mut self, id: SchemaId) -> Result<&mut SourceSettings> {
        let schema = self
            .schemas
            .get_mut(&id)
            .ok_or_else(|| Error::validation(format!("unknown schema {id}")))?;
        match &mut schema.kind {
            SchemaKind::Source(settings) => {
                schema.dirty = true;
                Ok(settings)
            }
            SchemaKind::Dataset(_) => Err(Error::validation(format!(
                "'{}' is not a source schema",
                schema.name
            ))),
        }
    }

    fn ensure_schema_name_free(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::validation("schema name must not be empty"));
        }
        if self.schema_by_name(name).is_some() {
            return Err(Error::validation(format!("schema '{name}' already exists")));
        }
        Ok(())
    }

    pub fn add_source_schema(
        &mut self,
        name: impl Into<String>,
        settings: SourceSettings,
    ) -> Result<SchemaId> {
        let name = name.into();
        self.ensure_schema_name_free(&name)?;
        let id = SchemaId(self.allocate());
        let unique_id = self.allocate_unique();
        self.schemas.insert(
            id,
            Schema {
                id,
                name,
                unique_id,
                tables: BTreeMap::new(),
                masked: false,
                kind: SchemaKind::Source(settings),
                dirty: true,
            },
        );
        Ok(id)
    }

    /// Create an empty dataset rooted at a source table. Nothing is generated
    /// until the dataset is compiled.
    pub fn add_dataset(&mut self, name: impl Into<String>, central_table: TableId) -> Result<SchemaId> {
        let name = name.into();
        self.ensure_schema_name_free(&name)?;
        if name.contains(NAME_SEPARATOR) {
            return Err(Error::validation(format!(
                "dataset name '{name}' must not contain '{NAME_SEPARATOR}'"
            )));
        }
        let table = self
            .get_table(central_table)
            .ok_or_else(|| Error::validation(format!("unknown table {central_table}")))?;
        if table.is_generated() {
            return Err(Error::validation(format!(
                "dataset '{name}' must be rooted at a source table"
            )));
        }

        let id = SchemaId(self.allocate());
        let unique_id = self.allocate_unique();
        self.schemas.insert(
            id,
            Schema {
                id,
                name,
                unique_id,
                tables: BTreeMap::new(),
                masked: false,
                kind: SchemaKind::Dataset(Dataset::new(central_table)),
                dirty: true,
            },
        );
        Ok(id)
    }

    /// Remove a schema and everything it owns. Removing a source schema also
    /// removes datasets rooted in it.
    pub fn remove_schema(&mut self, id: SchemaId) -> Result<()> {
        let schema = self
            .get_schema(id)
            .ok_or_else(|| Error::validation(format!("unknown schema {id}")))?;
        if schema.is_dataset() {
            return self.remove_dataset(id);
        }

        let dependents: Vec<SchemaId> = self
            .schemas
            .values()
            .filter_map(|candidate| {
                let dataset = candidate.as_dataset()?;
                let central = self.get_table(dataset.central_table)?;
                (central.schema == id).then_some(candidate.id)
            })
            .collect();
        for dataset in dependents {
            self.remove_dataset(dataset)?;
        }

        let tables: Vec<TableId> = self.schema(id).tables().collect();
        for table in tables {
            self.remove_table(table);
        }
        self.schemas.remove(&id);
        self.mark_datasets_dirty();
        Ok(())
    }

    /// Remove a dataset, its generated tables, and every partition table or
    /// application registered against it.
    pub fn remove_dataset(&mut self, id: SchemaId) -> Result<()> {
        self.dataset(id)?;
        let tables: Vec<TableId> = self.schema(id).tables().collect();
        for table in tables {
            self.remove_table(table);
        }
        self.partitions.forget_dataset(id);
        self.schemas.remove(&id);
        Ok(())
    }

    /// Copy a dataset's policy under a new name. Generated tables are not
    /// copied; the replica is built on its next generation.
    pub fn replicate_dataset(&mut self, dataset: SchemaId, new_name: impl Into<String>) -> Result<SchemaId> {
        let new_name = new_name.into();
        let original = self.dataset(dataset)?.clone();
        let old_name = self.schema(dataset).name.clone();
        let id = self.add_dataset(new_name.clone(), original.central_table)?;

        let remap = |table: &str| remap_prefix(table, &old_name, &new_name, NAME_SEPARATOR);
        let copy = self.dataset_mut(id)?;
        copy.mods = original.mods.replicate(&old_name, &new_name, NAME_SEPARATOR);
        copy.optimiser = original.optimiser;
        copy.invisible = original.invisible;
        copy.make_dimensions = original.make_dimensions;
        copy.pending_expressions = original
            .pending_expressions
            .iter()
            .map(|pending| PendingExpression {
                table: remap(&pending.table),
                ..pending.clone()
            })
            .collect();
        copy.pending_applications = original
            .pending_applications
            .iter()
            .map(|application| application.retarget(id, &remap))
            .collect();

        let applied: Vec<PartitionApplication> = self
            .partitions
            .applications_for(dataset)
            .map(|application| application.retarget(id, &remap))
            .collect();
        for application in applied {
            self.partitions.insert_application(application);
        }
        debug!(from = %old_name, to = %new_name, "dataset replicated");
        Ok(id)
    }

    // Tables

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[&id]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        self.tables
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale table handle {id}"))
    }

    pub fn get_table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id)
    }

    pub fn find_table(&self, schema: SchemaId, name: &str) -> Option<TableId> {
        self.get_schema(schema)?.table_id(name)
    }

    /// Look up `schema.table`.
    pub fn find_table_by_qualified_name(&self, qualified: &str) -> Option<TableId> {
        let (schema, table) = qualified.split_once('.')?;
        self.find_table(self.schema_by_name(schema)?, table)
    }

    /// Find a source table by the database schema it was introspected from.
    pub fn find_source_table(&self, database_schema: &str, table: &str) -> Option<TableId> {
        self.schemas.values().find_map(|schema| {
            let settings = schema.as_source()?;
            let matches = settings.database_schema == database_schema
                || settings.partitions.contains_key(database_schema);
            if matches {
                schema.table_id(table)
            } else {
                None
            }
        })
    }

    pub fn add_table(&mut self, schema: SchemaId, name: impl Into<String>) -> Result<TableId> {
        let name = name.into();
        let owner = self
            .get_schema(schema)
            .ok_or_else(|| Error::validation(format!("unknown schema {schema}")))?;
        if owner.tables.contains_key(&name) {
            return Err(Error::validation(format!(
                "table '{}.{name}' already exists",
                owner.name
            )));
        }

        let id = TableId(self.allocate());
        let unique_id = self.allocate_unique();
        self.tables
            .insert(id, Table::new(id, schema, name.clone(), unique_id));
        self.schema_mut(schema).tables.insert(name, id);
        self.touch_schema(schema);
        Ok(id)
    }

    /// Drop a table: relations are unlinked from both ends, then keys, then
    /// columns.
    pub fn remove_table(&mut self, id: TableId) {
        let Some(table) = self.tables.get(&id) else {
            return;
        };
        let keys: Vec<KeyId> = table.keys().collect();
        for key in keys {
            self.remove_key(key);
        }
        if let Some(table) = self.tables.remove(&id) {
            for column in table.columns.values() {
                self.columns.remove(column);
            }
            if let Some(schema) = self.schemas.get_mut(&table.schema) {
                schema.tables.remove(&table.name);
            }
            self.touch_schema(table.schema);
            debug!(table = %table.name, "table removed");
        }
    }

    // Columns

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[&id]
    }

    pub fn column_mut(&mut self, id: ColumnId) -> &mut Column {
        self.columns
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale column handle {id}"))
    }

    pub fn get_column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(&id)
    }

    pub fn find_column(&self, table: TableId, name: &str) -> Option<ColumnId> {
        self.get_table(table)?.column_id(name)
    }

    pub fn add_column(&mut self, table: TableId, name: impl Into<String>) -> Result<ColumnId> {
        let name = name.into();
        let owner = self
            .get_table(table)
            .ok_or_else(|| Error::validation(format!("unknown table {table}")))?;
        if owner.columns.contains_key(&name) {
            return Err(Error::validation(format!(
                "column '{}.{name}' already exists",
                owner.name
            )));
        }

        let id = ColumnId(self.allocate());
        self.columns.insert(
            id,
            Column {
                id,
                table,
                name: name.clone(),
                status: ComponentStatus::Inferred,
                in_partitions: BTreeSet::new(),
                generated: None,
            },
        );
        self.table_mut(table).columns.insert(name, id);
        self.touch_table(table);
        Ok(id)
    }

    /// Drop a column together with every key that contains it.
    pub fn remove_column(&mut self, id: ColumnId) {
        let Some(column) = self.columns.get(&id) else {
            return;
        };
        let table = column.table;
        let keys: Vec<KeyId> = self
            .table(table)
            .keys()
            .filter(|key| self.key(*key).contains(id))
            .collect();
        for key in keys {
            self.remove_key(key);
        }
        if let Some(column) = self.columns.remove(&id) {
            self.table_mut(table).columns.shift_remove(&column.name);
        }
        self.touch_table(table);
    }

    // Keys

    pub fn key(&self, id: KeyId) -> &Key {
        &self.keys[&id]
    }

    pub fn get_key(&self, id: KeyId) -> Option<&Key> {
        self.keys.get(&id)
    }

    pub fn add_key(
        &mut self,
        table: TableId,
        kind: KeyKind,
        columns: Vec<ColumnId>,
        status: ComponentStatus,
    ) -> Result<KeyId> {
        let owner = self
            .get_table(table)
            .ok_or_else(|| Error::validation(format!("unknown table {table}")))?;
        if columns.is_empty() {
            return Err(Error::validation(format!(
                "key on '{}' must have at least one column",
                owner.name
            )));
        }
        let mut seen = BTreeSet::new();
        for column in &columns {
            let belongs = self
                .get_column(*column)
                .is_some_and(|candidate| candidate.table == table);
            if !belongs {
                return Err(Error::validation(format!(
                    "column {column} does not belong to '{}'",
                    owner.name
                )));
            }
            if !seen.insert(*column) {
                return Err(Error::validation(format!(
                    "key on '{}' repeats column {column}",
                    owner.name
                )));
            }
        }
        if kind == KeyKind::Primary && owner.primary_key.is_some() {
            return Err(Error::validation(format!(
                "'{}' already has a primary key",
                owner.name
            )));
        }

        let id = KeyId(self.allocate());
        self.keys.insert(
            id,
            Key {
                id,
                table,
                kind,
                columns,
                status,
                relations: BTreeSet::new(),
            },
        );
        let owner = self.table_mut(table);
        match kind {
            KeyKind::Primary => owner.primary_key = Some(id),
            KeyKind::Foreign => {
                owner.foreign_keys.insert(id);
            }
        }
        self.touch_table(table);
        Ok(id)
    }

    /// Drop a key after unlinking all of its relations.
    pub fn remove_key(&mut self, id: KeyId) {
        let Some(key) = self.keys.get(&id) else {
            return;
        };
        let relations: Vec<RelationId> = key.relations().collect();
        for relation in relations {
            self.remove_relation(relation);
        }
        if let Some(key) = self.keys.remove(&id) {
            if let Some(table) = self.tables.get_mut(&key.table) {
                if table.primary_key == Some(id) {
                    table.primary_key = None;
                }
                table.foreign_keys.remove(&id);
            }
            self.touch_table(key.table);
        }
    }

    pub fn set_key_status(&mut self, id: KeyId, status: ComponentStatus) {
        let key = self
            .keys
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale key handle {id}"));
        key.status = status;
        let table = key.table;
        self.touch_table(table);
    }

    /// Foreign key on `table` with exactly these columns, in order.
    pub fn find_foreign_key(&self, table: TableId, columns: &[ColumnId]) -> Option<KeyId> {
        self.get_table(table)?
            .foreign_keys()
            .find(|key| self.key(*key).same_columns(columns))
    }

    /// Every column that takes part in any key of the table.
    pub fn key_columns(&self, table: TableId) -> BTreeSet<ColumnId> {
        self.table(table)
            .keys()
            .flat_map(|key| self.key(key).columns.iter().copied())
            .collect()
    }

    // Relations

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[&id]
    }

    pub fn relation_mut(&mut self, id: RelationId) -> &mut Relation {
        self.relations
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale relation handle {id}"))
    }

    pub fn get_relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(&id)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn add_relation(
        &mut self,
        first: KeyId,
        second: KeyId,
        cardinality: Cardinality,
        status: ComponentStatus,
    ) -> Result<RelationId> {
        let first_key = self
            .get_key(first)
            .ok_or_else(|| Error::validation(format!("unknown key {first}")))?;
        let second_key = self
            .get_key(second)
            .ok_or_else(|| Error::validation(format!("unknown key {second}")))?;
        if first_key.table == second_key.table {
            return Err(Error::validation(format!(
                "relation between {} and {} must join distinct tables",
                self.key_label(first),
                self.key_label(second)
            )));
        }
        if first_key.columns.len() != second_key.columns.len() {
            return Err(Error::validation(format!(
                "relation between {} and {} joins keys of different arity",
                self.key_label(first),
                self.key_label(second)
            )));
        }
        if self.find_relation(first, second).is_some() {
            return Err(Error::validation(format!(
                "relation between {} and {} already exists",
                self.key_label(first),
                self.key_label(second)
            )));
        }

        let id = RelationId(self.allocate());
        self.relations.insert(
            id,
            Relation {
                id,
                first_key: first,
                second_key: second,
                cardinality,
                original_cardinality: None,
                status,
            },
        );
        let tables = [self.key(first).table, self.key(second).table];
        for key in [first, second] {
            if let Some(key) = self.keys.get_mut(&key) {
                key.relations.insert(id);
            }
        }
        for table in tables {
            self.touch_table(table);
        }
        Ok(id)
    }

    /// Unlink a relation from both of its keys and drop it.
    pub fn remove_relation(&mut self, id: RelationId) -> Option<Relation> {
        let relation = self.relations.remove(&id)?;
        for key in [relation.first_key, relation.second_key] {
            if let Some(key) = self.keys.get_mut(&key) {
                key.relations.remove(&id);
                let table = key.table;
                self.touch_table(table);
            }
        }
        Some(relation)
    }

    /// Relation joining exactly these two keys, in either order.
    pub fn find_relation(&self, first: KeyId, second: KeyId) -> Option<RelationId> {
        self.get_key(first)?.relations().find(|relation| {
            let relation = self.relation(*relation);
            relation.involves(second)
        })
    }

    pub fn find_relation_by_name(&self, name: &str) -> Option<RelationId> {
        self.relations
            .keys()
            .copied()
            .find(|relation| self.relation_name(*relation) == name)
    }

    /// All relations touching any key of the table, ordered by handle.
    pub fn relations_of_table(&self, table: TableId) -> Vec<RelationId> {
        let relations: BTreeSet<RelationId> = self
            .table(table)
            .keys()
            .flat_map(|key| self.key(key).relations())
            .collect();
        relations.into_iter().collect()
    }

    /// The relation's key that belongs to `table`.
    pub fn relation_key_on(&self, relation: RelationId, table: TableId) -> Option<KeyId> {
        let relation = self.get_relation(relation)?;
        [relation.first_key, relation.second_key]
            .into_iter()
            .find(|key| self.key(*key).table == table)
    }

    pub fn set_relation_status(&mut self, id: RelationId, status: ComponentStatus) {
        self.relation_mut(id).status = status;
        self.touch_relation(id);
    }

    /// User edit of a relation's cardinality. An inferred relation becomes
    /// `Modified` and remembers what the source said; setting it back
    /// restores `Inferred`.
    pub fn set_relation_cardinality(&mut self, id: RelationId, cardinality: Cardinality) {
        let relation = self.relation_mut(id);
        if relation.cardinality == cardinality {
            return;
        }
        match relation.status {
            ComponentStatus::Inferred => {
                relation.original_cardinality = Some(relation.cardinality);
                relation.status = ComponentStatus::Modified;
            }
            ComponentStatus::Modified if relation.original_cardinality == Some(cardinality) => {
                relation.original_cardinality = None;
                relation.status = ComponentStatus::Inferred;
            }
            _ => {}
        }
        relation.cardinality = cardinality;
        self.touch_relation(id);
    }

    pub fn set_table_masked(&mut self, table: TableId, masked: bool) {
        self.table_mut(table).masked = masked;
        self.touch_table(table);
    }

    pub fn set_schema_masked(&mut self, schema: SchemaId, masked: bool) {
        self.schema_mut(schema).masked = masked;
        self.mark_datasets_dirty();
    }

    // Naming

    /// `schema.table`, the stable identifier of a table.
    pub fn qualified_table_name(&self, table: TableId) -> String {
        let table = self.table(table);
        format!("{}.{}", self.schema(table.schema).name, table.name)
    }

    /// `schema.table(col_a,col_b)`.
    pub fn key_label(&self, key: KeyId) -> String {
        let key = self.key(key);
        let columns: Vec<&str> = key
            .columns
            .iter()
            .map(|column| self.column(*column).name.as_str())
            .collect();
        format!(
            "{}({})",
            self.qualified_table_name(key.table),
            columns.join(",")
        )
    }

    /// Stable identifier of a relation, used as a Modification Store key.
    pub fn relation_name(&self, relation: RelationId) -> String {
        let relation = self.relation(relation);
        format!(
            "{}->{}",
            self.key_label(relation.first_key),
            self.key_label(relation.second_key)
        )
    }

    // Dirty tracking

    fn touch_schema(&mut self, schema: SchemaId) {
        let is_dataset = match self.schemas.get_mut(&schema) {
            Some(owner) if owner.is_dataset() => {
                owner.dirty = true;
                true
            }
            Some(_) => false,
            None => return,
        };
        if !is_dataset {
            self.mark_datasets_dirty();
        }
    }

    fn touch_table(&mut self, table: TableId) {
        if let Some(schema) = self.tables.get(&table).map(|table| table.schema) {
            self.touch_schema(schema);
        }
    }

    fn touch_relation(&mut self, relation: RelationId) {
        let Some(relation) = self.relations.get(&relation) else {
            return;
        };
        let tables: Vec<TableId> = [relation.first_key, relation.second_key]
            .iter()
            .filter_map(|key| self.keys.get(key).map(|key| key.table))
            .collect();
        for table in tables {
            self.touch_table(table);
        }
    }

    /// Flag a schema for resynchronization (source) or regeneration (dataset).
    pub fn mark_dirty(&mut self, schema: SchemaId) {
        if let Some(schema) = self.schemas.get_mut(&schema) {
            schema.dirty = true;
        }
    }

    pub fn mark_datasets_dirty(&mut self) {
        for schema in self.schemas.values_mut() {
            if schema.is_dataset() {
                schema.dirty = true;
            }
        }
    }

    pub fn clear_dirty(&mut self, schema: SchemaId) {
        if let Some(schema) = self.schemas.get_mut(&schema) {
            schema.dirty = false;
        }
    }

    pub fn dirty_sources(&self) -> Vec<SchemaId> {
        self.schemas
            .values()
            .filter(|schema| schema.dirty && !schema.is_dataset())
            .map(|schema| schema.id)
            .collect()
    }

    pub fn dirty_datasets(&self) -> Vec<SchemaId> {
        self.schemas
            .values()
            .filter(|schema| schema.dirty && schema.is_dataset())
            .map(|schema| schema.id)
            .collect()
    }

    pub fn needs_resync(&self) -> bool {
        self.schemas.values().any(|schema| schema.dirty)
    }

    // Transactions

    /// Start a batch of mutations. Batches nest; resync is deferred until
    /// the outermost one ends.
    pub fn begin_transaction(&mut self) {
        self.transaction_depth += 1;
    }

    /// End a batch. Returns true when this closed the outermost batch and
    /// something is waiting for a resync.
    pub fn end_transaction(&mut self) -> bool {
        self.transaction_depth = self.transaction_depth.saturating_sub(1);
        self.transaction_depth == 0 && self.needs_resync()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }
}
