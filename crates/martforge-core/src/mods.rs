//! Sparse per-dataset policy overrides.
//!
//! Layout: owning generated-table name -> property -> entity name -> payload.
//! Policy that applies to the whole dataset is filed under [`DATASET_WIDE`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definitions::{
    CompoundDefinition, ExpressionDefinition, LoopbackDefinition, RelationRestriction,
    TableRestriction, UnrollDefinition,
};

/// Owning-table key for dataset-wide entries.
pub const DATASET_WIDE: &str = "__dataset_wide__";

/// Entity key for properties of the owning table itself, such as a masked
/// dimension. Keeps them valid when the owning table is renamed or
/// replicated.
pub const TABLE_ENTITY: &str = "__table__";

/// Property names understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModProperty {
    ColumnMasked,
    ColumnRenamed,
    ColumnIndexed,
    DimensionMasked,
    TableRestriction,
    TransformStart,
    ExpressionColumn,
    RelationMasked,
    RelationForced,
    RelationMerged,
    RelationSubclass,
    RelationCompound,
    RelationLoopback,
    RelationUnrolled,
    RelationRestriction,
    RelationAlternativeJoin,
}

impl ModProperty {
    pub fn as_str(self) -> &'static str {
        match self {
            ModProperty::ColumnMasked => "column_masked",
            ModProperty::ColumnRenamed => "column_renamed",
            ModProperty::ColumnIndexed => "column_indexed",
            ModProperty::DimensionMasked => "dimension_masked",
            ModProperty::TableRestriction => "table_restriction",
            ModProperty::TransformStart => "transform_start",
            ModProperty::ExpressionColumn => "expression_column",
            ModProperty::RelationMasked => "relation_masked",
            ModProperty::RelationForced => "relation_forced",
            ModProperty::RelationMerged => "relation_merged",
            ModProperty::RelationSubclass => "relation_subclass",
            ModProperty::RelationCompound => "relation_compound",
            ModProperty::RelationLoopback => "relation_loopback",
            ModProperty::RelationUnrolled => "relation_unrolled",
            ModProperty::RelationRestriction => "relation_restriction",
            ModProperty::RelationAlternativeJoin => "relation_alternative_join",
        }
    }
}

impl fmt::Display for ModProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional payload carried by a mod entry. Flag-style properties store no
/// payload at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModValue {
    Text { value: String },
    Compound(CompoundDefinition),
    Loopback(LoopbackDefinition),
    Unroll(UnrollDefinition),
    RelationRestriction(RelationRestriction),
    TableRestriction(TableRestriction),
    Expression(ExpressionDefinition),
}

impl ModValue {
    pub fn text(value: impl Into<String>) -> Self {
        ModValue::Text {
            value: value.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModValue::Text { value } => Some(value),
            _ => None,
        }
    }
}

type EntityMap = BTreeMap<String, Option<ModValue>>;

/// The Modification Store for one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mods {
    entries: BTreeMap<String, BTreeMap<ModProperty, EntityMap>>,
}

impl Mods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entity map for a table/property pair, if any entry was ever set.
    pub fn get(&self, table: &str, property: ModProperty) -> Option<&EntityMap> {
        self.entries.get(table)?.get(&property)
    }

    /// Entity map for a table/property pair, creating intermediate levels.
    pub fn get_mut(&mut self, table: &str, property: ModProperty) -> &mut EntityMap {
        self.entries
            .entry(table.to_string())
            .or_default()
            .entry(property)
            .or_default()
    }

    pub fn contains(&self, table: &str, property: ModProperty, entity: &str) -> bool {
        self.get(table, property)
            .is_some_and(|entities| entities.contains_key(entity))
    }

    pub fn value(&self, table: &str, property: ModProperty, entity: &str) -> Option<&ModValue> {
        self.get(table, property)?.get(entity)?.as_ref()
    }

    pub fn set(
        &mut self,
        table: &str,
        property: ModProperty,
        entity: &str,
        value: Option<ModValue>,
    ) {
        self.get_mut(table, property)
            .insert(entity.to_string(), value);
    }

    /// Remove one entry, dropping levels left empty. Returns whether an entry
    /// existed.
    pub fn remove(&mut self, table: &str, property: ModProperty, entity: &str) -> bool {
        let Some(properties) = self.entries.get_mut(table) else {
            return false;
        };
        let Some(entities) = properties.get_mut(&property) else {
            return false;
        };
        let removed = entities.remove(entity).is_some();
        if entities.is_empty() {
            properties.remove(&property);
        }
        if properties.is_empty() {
            self.entries.remove(table);
        }
        removed
    }

    pub fn remove_table(&mut self, table: &str) {
        self.entries.remove(table);
    }

    /// Drop every entry filed under `table` whose entity is `entity`.
    pub fn remove_entity(&mut self, table: &str, entity: &str) -> usize {
        let Some(properties) = self.entries.get_mut(table) else {
            return 0;
        };
        let mut removed = 0;
        for entities in properties.values_mut() {
            if entities.remove(entity).is_some() {
                removed += 1;
            }
        }
        properties.retain(|_, entities| !entities.is_empty());
        if properties.is_empty() {
            self.entries.remove(table);
        }
        removed
    }

    /// Drop every entry, in any table, whose entity is `entity`.
    pub fn remove_entity_everywhere(&mut self, entity: &str) -> usize {
        let tables: Vec<String> = self.entries.keys().cloned().collect();
        tables
            .iter()
            .map(|table| self.remove_entity(table, entity))
            .sum()
    }

    /// Move all entries of one owning table to a new name.
    pub fn rename_table(&mut self, from: &str, to: &str) {
        if let Some(properties) = self.entries.remove(from) {
            self.entries.insert(to.to_string(), properties);
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Deep copy for a replicated dataset: owning-table names equal to
    /// `from_prefix` or starting with `from_prefix` + separator are remapped
    /// to `to_prefix`.
    pub fn replicate(&self, from_prefix: &str, to_prefix: &str, separator: &str) -> Mods {
        let mut entries = BTreeMap::new();
        for (table, properties) in &self.entries {
            let renamed = remap_prefix(table, from_prefix, to_prefix, separator);
            entries.insert(renamed, properties.clone());
        }
        Mods { entries }
    }
}

pub(crate) fn remap_prefix(name: &str, from: &str, to: &str, separator: &str) -> String {
    if name == from {
        return to.to_string();
    }
    match name.strip_prefix(from) {
        Some(rest) if rest.starts_with(separator) => format!("{to}{rest}"),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_mut_creates_levels_lazily() {
        let mut mods = Mods::new();
        assert!(mods.get("gene", ModProperty::RelationMasked).is_none());
        mods.get_mut("gene", ModProperty::RelationMasked)
            .insert("rel".to_string(), None);
        assert!(mods.contains("gene", ModProperty::RelationMasked, "rel"));
        assert!(!mods.contains("gene", ModProperty::RelationForced, "rel"));
    }

    #[test]
    fn remove_drops_empty_levels() {
        let mut mods = Mods::new();
        mods.set("gene", ModProperty::ColumnMasked, "name", None);
        assert!(mods.remove("gene", ModProperty::ColumnMasked, "name"));
        assert!(mods.is_empty());
        assert!(!mods.remove("gene", ModProperty::ColumnMasked, "name"));
    }

    #[test]
    fn remove_entity_clears_every_property() {
        let mut mods = Mods::new();
        mods.set("gene", ModProperty::ColumnMasked, "c1", None);
        mods.set("gene", ModProperty::ColumnRenamed, "c1", Some(ModValue::text("x")));
        mods.set("gene", ModProperty::ColumnRenamed, "c2", Some(ModValue::text("y")));
        assert_eq!(mods.remove_entity("gene", "c1"), 2);
        assert_eq!(
            mods.value("gene", ModProperty::ColumnRenamed, "c2")
                .and_then(ModValue::as_text),
            Some("y")
        );
    }

    #[test]
    fn renamed_tables_keep_their_own_properties() {
        let mut mods = Mods::new();
        mods.set("gene__xref__dm", ModProperty::DimensionMasked, TABLE_ENTITY, None);
        mods.rename_table("gene__xref__dm", "gene__xref_1__dm");
        assert!(mods.is_dimension_masked("gene__xref_1__dm"));
    }

    #[test]
    fn replicate_remaps_table_prefixes_and_copies_definitions() {
        let mut mods = Mods::new();
        mods.set(
            DATASET_WIDE,
            ModProperty::RelationCompound,
            "rel",
            Some(ModValue::Compound(CompoundDefinition::new(3))),
        );
        mods.set("gene", ModProperty::ColumnMasked, "c", None);
        mods.set("gene__transcript__dm", ModProperty::DimensionMasked, TABLE_ENTITY, None);
        mods.set(
            "gene__transcript__dm",
            ModProperty::TransformStart,
            TABLE_ENTITY,
            Some(ModValue::text("ens.translation")),
        );
        mods.set("genes_other", ModProperty::ColumnMasked, "c", None);

        let copy = mods.replicate("gene", "gene2", "__");
        assert!(copy.contains("gene2", ModProperty::ColumnMasked, "c"));
        assert!(copy.is_dimension_masked("gene2__transcript__dm"));
        assert!(!copy.is_dimension_masked("gene__transcript__dm"));
        assert_eq!(copy.transform_start("gene2__transcript__dm"), Some("ens.translation"));
        assert!(copy.contains("genes_other", ModProperty::ColumnMasked, "c"));
        assert_eq!(
            copy.value(DATASET_WIDE, ModProperty::RelationCompound, "rel"),
            Some(&ModValue::Compound(CompoundDefinition::new(3)))
        );
    }
}
