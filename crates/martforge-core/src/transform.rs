//! Transformation unit chains: how every column of a generated table is
//! derived from source columns.
//!
//! A chain is read backwards. Each unit maps the columns it introduced (keyed
//! by the column of its input table) to generated columns; resolution walks
//! from the last unit towards the first, translating across join keys.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;

use crate::definitions::{
    ExpressionDefinition, RelationRestriction, TableRestriction, UnrollDefinition,
};
use crate::model::{ColumnId, DatasetColumnKind, Mart, RelationId, TableId};

/// First unit of a chain: rows of a source table, or of the parent generated
/// table for inheriting tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectFromTable {
    pub table: TableId,
    pub new_columns: IndexMap<ColumnId, ColumnId>,
    pub restriction: Option<TableRestriction>,
}

/// Partition row bound to a compounded branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionBinding {
    pub partition_table: String,
    pub column: String,
    pub value: Option<String>,
}

/// Join of `table` onto the rows built so far.
///
/// `source_columns` are the columns of the previous input that drive the
/// join, `target_columns` the matching key columns of `table`, position by
/// position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: TableId,
    pub relation: Option<RelationId>,
    pub source_columns: Vec<ColumnId>,
    pub target_columns: Vec<ColumnId>,
    pub iteration: usize,
    pub new_columns: IndexMap<ColumnId, ColumnId>,
    pub relation_restriction: Option<RelationRestriction>,
    pub table_restriction: Option<TableRestriction>,
    /// Column of `table` distinguishing loopback rows.
    pub loopback_differentiator: Option<ColumnId>,
    pub alternative_join: bool,
    pub partition: Option<PartitionBinding>,
}

impl JoinTable {
    pub fn new(
        table: TableId,
        relation: Option<RelationId>,
        source_columns: Vec<ColumnId>,
        target_columns: Vec<ColumnId>,
        iteration: usize,
    ) -> Self {
        Self {
            table,
            relation,
            source_columns,
            target_columns,
            iteration,
            new_columns: IndexMap::new(),
            relation_restriction: None,
            table_restriction: None,
            loopback_differentiator: None,
            alternative_join: false,
            partition: None,
        }
    }
}

/// Synthesized id/name pair replacing a recursive relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrollTable {
    pub relation: RelationId,
    pub definition: UnrollDefinition,
    /// Generated key columns the hierarchy hangs from.
    pub source_columns: Vec<ColumnId>,
    pub id_column: ColumnId,
    pub name_column: ColumnId,
}

/// Computed columns of the table, always the last unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionUnit {
    pub columns: Vec<ColumnId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformationUnit {
    SelectFromTable(SelectFromTable),
    JoinTable(JoinTable),
    /// A join recorded for display only, never executed.
    SkipTable(JoinTable),
    UnrollTable(UnrollTable),
    Expression(ExpressionUnit),
}

enum Step {
    Found(ColumnId),
    Translate(ColumnId),
    Defer,
}

impl TransformationUnit {
    pub fn label(&self) -> &'static str {
        match self {
            TransformationUnit::SelectFromTable(_) => "select",
            TransformationUnit::JoinTable(_) => "join",
            TransformationUnit::SkipTable(_) => "skip",
            TransformationUnit::UnrollTable(_) => "unroll",
            TransformationUnit::Expression(_) => "expression",
        }
    }

    /// Table read by the unit, if any.
    pub fn table(&self) -> Option<TableId> {
        match self {
            TransformationUnit::SelectFromTable(unit) => Some(unit.table),
            TransformationUnit::JoinTable(unit) | TransformationUnit::SkipTable(unit) => {
                Some(unit.table)
            }
            TransformationUnit::UnrollTable(_) | TransformationUnit::Expression(_) => None,
        }
    }

    /// Generated columns introduced by this unit.
    pub fn new_columns(&self) -> Vec<ColumnId> {
        match self {
            TransformationUnit::SelectFromTable(unit) => unit.new_columns.values().copied().collect(),
            TransformationUnit::JoinTable(unit) => unit.new_columns.values().copied().collect(),
            TransformationUnit::SkipTable(_) => Vec::new(),
            TransformationUnit::UnrollTable(unit) => vec![unit.id_column, unit.name_column],
            TransformationUnit::Expression(unit) => unit.columns.clone(),
        }
    }

    fn resolve_step(&self, column: ColumnId) -> Step {
        match self {
            TransformationUnit::SelectFromTable(unit) => match unit.new_columns.get(&column) {
                Some(generated) => Step::Found(*generated),
                None => Step::Defer,
            },
            TransformationUnit::JoinTable(unit) => {
                if let Some(generated) = unit.new_columns.get(&column) {
                    return Step::Found(*generated);
                }
                match unit.target_columns.iter().position(|key| *key == column) {
                    Some(index) => Step::Translate(unit.source_columns[index]),
                    None => Step::Defer,
                }
            }
            TransformationUnit::SkipTable(_)
            | TransformationUnit::UnrollTable(_)
            | TransformationUnit::Expression(_) => Step::Defer,
        }
    }
}

/// Ordered units of one generated table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformationChain {
    units: Vec<TransformationUnit>,
}

impl TransformationChain {
    pub fn units(&self) -> &[TransformationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Append a unit and return its index.
    pub fn push(&mut self, unit: TransformationUnit) -> usize {
        self.units.push(unit);
        self.units.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TransformationUnit> {
        self.units.get_mut(index)
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// Generated column currently standing for `column`.
    pub fn resolve(&self, column: ColumnId) -> Option<ColumnId> {
        self.resolve_before(self.units.len(), column)
    }

    /// Like [`resolve`](Self::resolve), looking only at units before `end`.
    pub fn resolve_before(&self, end: usize, column: ColumnId) -> Option<ColumnId> {
        let end = end.min(self.units.len());
        let mut current = column;
        for unit in self.units[..end].iter().rev() {
            match unit.resolve_step(current) {
                Step::Found(generated) => return Some(generated),
                Step::Translate(source) => current = source,
                Step::Defer => {}
            }
        }
        None
    }

    /// Every generated column introduced by some unit.
    pub fn introduced_columns(&self) -> BTreeSet<ColumnId> {
        self.units
            .iter()
            .flat_map(TransformationUnit::new_columns)
            .collect()
    }

    /// Tables actually joined or selected, skip placeholders excluded.
    pub fn visited_tables(&self) -> BTreeSet<TableId> {
        self.units
            .iter()
            .filter(|unit| !matches!(unit, TransformationUnit::SkipTable(_)))
            .filter_map(TransformationUnit::table)
            .collect()
    }

    /// Move unroll units behind every other join, keeping their order.
    pub fn relocate_unrolls(&mut self) {
        let (unrolls, mut rest): (Vec<_>, Vec<_>) = self
            .units
            .drain(..)
            .partition(|unit| matches!(unit, TransformationUnit::UnrollTable(_)));
        rest.extend(unrolls);
        self.units = rest;
    }

    /// Whether the unit at `index`, and every unit before it, reads only
    /// tables present in partition `prefix`.
    pub fn applies_to_partition(&self, index: usize, prefix: &str, mart: &Mart) -> bool {
        self.units
            .iter()
            .take(index + 1)
            .filter_map(TransformationUnit::table)
            .all(|table| mart.get_table(table).is_none_or(|table| table.in_partition(prefix)))
    }

    pub fn expression_unit(&self) -> Option<&ExpressionUnit> {
        self.units.iter().find_map(|unit| match unit {
            TransformationUnit::Expression(unit) => Some(unit),
            _ => None,
        })
    }

    pub fn skipped_relations(&self) -> Vec<RelationId> {
        self.units
            .iter()
            .filter_map(|unit| match unit {
                TransformationUnit::SkipTable(join) => join.relation,
                _ => None,
            })
            .collect()
    }
}

impl ExpressionUnit {
    /// Expression columns in evaluation groups: a column aliasing another
    /// expression column lands in a later group, and group-by columns never
    /// share a group with plain ones.
    pub fn ordered_groups(&self, mart: &Mart) -> Vec<Vec<ColumnId>> {
        let by_name: BTreeMap<&str, ColumnId> = self
            .columns
            .iter()
            .map(|column| (mart.column(*column).name(), *column))
            .collect();
        let mut depths = BTreeMap::new();
        let mut groups: BTreeMap<(usize, bool), Vec<ColumnId>> = BTreeMap::new();
        for column in &self.columns {
            let depth = expression_depth(*column, mart, &by_name, &mut depths, &mut BTreeSet::new());
            let group_by = expression_definition(mart, *column).is_some_and(|definition| definition.group_by);
            groups.entry((depth, group_by)).or_default().push(*column);
        }
        groups.into_values().collect()
    }
}

fn expression_definition(mart: &Mart, column: ColumnId) -> Option<&ExpressionDefinition> {
    match &mart.column(column).generated.as_ref()?.kind {
        DatasetColumnKind::Expression(definition) => Some(definition),
        _ => None,
    }
}

fn expression_depth(
    column: ColumnId,
    mart: &Mart,
    by_name: &BTreeMap<&str, ColumnId>,
    depths: &mut BTreeMap<ColumnId, usize>,
    visiting: &mut BTreeSet<ColumnId>,
) -> usize {
    if let Some(depth) = depths.get(&column) {
        return *depth;
    }
    if !visiting.insert(column) {
        return 0;
    }
    let depth = expression_definition(mart, column)
        .map(|definition| {
            definition
                .aliases
                .values()
                .filter_map(|name| by_name.get(name.as_str()).copied())
                .filter(|dependency| *dependency != column)
                .map(|dependency| expression_depth(dependency, mart, by_name, depths, visiting) + 1)
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);
    visiting.remove(&column);
    depths.insert(column, depth);
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetColumn, SourceSettings};

    fn join(table: u32, sources: &[u32], targets: &[u32], columns: &[(u32, u32)]) -> JoinTable {
        let mut unit = JoinTable::new(
            TableId(table),
            None,
            sources.iter().map(|id| ColumnId(*id)).collect(),
            targets.iter().map(|id| ColumnId(*id)).collect(),
            0,
        );
        unit.new_columns = columns
            .iter()
            .map(|(source, generated)| (ColumnId(*source), ColumnId(*generated)))
            .collect();
        unit
    }

    #[test]
    fn resolve_translates_across_join_keys() {
        let mut chain = TransformationChain::default();
        chain.push(TransformationUnit::SelectFromTable(SelectFromTable {
            table: TableId(1),
            new_columns: [(ColumnId(10), ColumnId(100))].into_iter().collect(),
            restriction: None,
        }));
        chain.push(TransformationUnit::JoinTable(join(2, &[10], &[20], &[(21, 101)])));
        chain.push(TransformationUnit::Expression(ExpressionUnit::default()));

        assert_eq!(chain.resolve(ColumnId(21)), Some(ColumnId(101)));
        assert_eq!(chain.resolve(ColumnId(20)), Some(ColumnId(100)));
        assert_eq!(chain.resolve(ColumnId(10)), Some(ColumnId(100)));
        assert_eq!(chain.resolve(ColumnId(99)), None);
        assert_eq!(chain.resolve_before(1, ColumnId(21)), None);
    }

    #[test]
    fn skip_units_never_resolve() {
        let mut chain = TransformationChain::default();
        chain.push(TransformationUnit::SkipTable(join(2, &[10], &[20], &[(21, 101)])));
        assert_eq!(chain.resolve(ColumnId(21)), None);
        assert!(chain.introduced_columns().is_empty());
    }

    #[test]
    fn unrolls_move_behind_joins() {
        let mut chain = TransformationChain::default();
        chain.push(TransformationUnit::SelectFromTable(SelectFromTable {
            table: TableId(1),
            new_columns: IndexMap::new(),
            restriction: None,
        }));
        chain.push(TransformationUnit::UnrollTable(UnrollTable {
            relation: RelationId(5),
            definition: UnrollDefinition {
                name_column: "name".into(),
                reversed: false,
            },
            source_columns: vec![ColumnId(100)],
            id_column: ColumnId(200),
            name_column: ColumnId(201),
        }));
        chain.push(TransformationUnit::JoinTable(join(2, &[10], &[20], &[])));
        chain.relocate_unrolls();

        let labels: Vec<&str> = chain.units().iter().map(TransformationUnit::label).collect();
        assert_eq!(labels, ["select", "join", "unroll"]);
    }

    #[test]
    fn applicability_follows_predecessors() {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("src", SourceSettings::new("public"))
            .unwrap();
        let gene = mart.add_table(schema, "gene").unwrap();
        let extra = mart.add_table(schema, "extra").unwrap();
        mart.table_mut(extra).in_partitions.insert("hs".into());

        let mut chain = TransformationChain::default();
        chain.push(TransformationUnit::SelectFromTable(SelectFromTable {
            table: gene,
            new_columns: IndexMap::new(),
            restriction: None,
        }));
        chain.push(TransformationUnit::JoinTable(JoinTable::new(
            extra,
            None,
            Vec::new(),
            Vec::new(),
            0,
        )));
        chain.push(TransformationUnit::Expression(ExpressionUnit::default()));

        assert!(chain.applies_to_partition(0, "mm", &mart));
        assert!(!chain.applies_to_partition(2, "mm", &mart));
        assert!(chain.applies_to_partition(2, "hs", &mart));
    }

    #[test]
    fn expression_groups_respect_dependencies() {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("src", SourceSettings::new("public"))
            .unwrap();
        let table = mart.add_table(schema, "gene").unwrap();
        let mut add = |name: &str, definition: ExpressionDefinition| {
            let column = mart.add_column(table, name).unwrap();
            mart.column_mut(column).generated = Some(DatasetColumn::new(
                DatasetColumnKind::Expression(definition),
                name,
            ));
            column
        };
        let length = add("length", ExpressionDefinition::new("end - start"));
        let total = add("total", ExpressionDefinition::new("sum(x)").grouped());
        let kb = add(
            "length_kb",
            ExpressionDefinition::new("l / 1000").with_alias("l", "length"),
        );

        let unit = ExpressionUnit {
            columns: vec![kb, total, length],
        };
        assert_eq!(
            unit.ordered_groups(&mart),
            vec![vec![length], vec![total], vec![kb]]
        );
    }
}
