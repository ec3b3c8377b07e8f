use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use martforge_core::{
    Cardinality, ColumnId, ComponentStatus, DatasetColumnKind, DatasetTableType,
    ExpressionDefinition, ExpressionUnit, KeyId, KeyKind, Result, TableId, TransformationUnit,
};

use super::naming::{CLASH_SUFFIX, KEY_SUFFIX, unique_name};
use super::{Compiler, ParentContext, TableBuild};

impl Compiler<'_> {
    /// Settle a walked build into its generated table: expression columns,
    /// keys, pruning, visible names and the stored chain.
    pub(super) fn finish_table(&mut self, mut build: TableBuild) -> Result<ParentContext> {
        build.chain.relocate_unrolls();
        self.add_expressions(&mut build)?;
        self.settle_keys(&build)?;
        self.prune(&build)?;
        self.assign_names(&build);

        let table = build.table;
        if build.table_type == DatasetTableType::Dimension {
            self.mart.table_mut(table).masked = self.mods.is_dimension_masked(&build.name);
        }

        self.report.tables += 1;
        self.report.columns += build.columns.len();
        self.report.units += build.chain.len();
        self.report.skipped_relations += build.chain.skipped_relations().len();
        debug!(
            table = %build.name,
            kind = %build.table_type,
            columns = build.columns.len(),
            units = build.chain.len(),
            "generated table finished"
        );

        if let Some(info) = self.mart.table_mut(table).generated.as_mut() {
            info.chain = build.chain;
        }
        Ok(ParentContext {
            table,
            name: build.name,
            visits: build.visits,
            subclass_counts: build.subclass_counts,
        })
    }

    /// Column of the build an expression alias names: by internal name or by
    /// visible name.
    fn aliased_column(&self, build: &TableBuild, target: &str) -> Option<ColumnId> {
        build
            .columns
            .iter()
            .find(|(column, base)| {
                let column = self.mart.column(**column);
                column.name() == target || base.as_str() == target || column.modified_name() == target
            })
            .map(|(column, _)| *column)
    }

    fn add_expressions(&mut self, build: &mut TableBuild) -> Result<()> {
        let declared: Vec<(String, ExpressionDefinition)> = self
            .mods
            .expression_columns(&build.name)
            .into_iter()
            .map(|(name, definition)| (name.to_string(), definition.clone()))
            .collect();
        if declared.is_empty() {
            return Ok(());
        }
        let names: BTreeSet<&str> = declared.iter().map(|(name, _)| name.as_str()).collect();

        let mut columns = Vec::new();
        for (name, definition) in &declared {
            let mut dependencies = Vec::new();
            let mut missing = None;
            for target in definition.aliases.values() {
                if names.contains(target.as_str()) {
                    continue;
                }
                match self.aliased_column(build, target) {
                    Some(column) => dependencies.push(column),
                    None => {
                        missing = Some(target.clone());
                        break;
                    }
                }
            }
            if let Some(target) = missing {
                warn!(table = %build.name, column = %name, alias = %target, "expression column dropped, alias names no column");
                continue;
            }
            for dependency in dependencies {
                if let Some(generated) = self.mart.column_mut(dependency).generated.as_mut() {
                    generated.expression_dependency = true;
                }
            }
            columns.push(self.place_column(
                build,
                name.clone(),
                name.clone(),
                DatasetColumnKind::Expression(definition.clone()),
                false,
            )?);
        }
        if !columns.is_empty() {
            build
                .chain
                .push(TransformationUnit::Expression(ExpressionUnit { columns }));
        }
        Ok(())
    }

    /// Primary key from the folded source key, one foreign key to the
    /// parent, nothing else.
    fn settle_keys(&mut self, build: &TableBuild) -> Result<()> {
        let table = build.table;
        let existing = self.mart.table(table).primary_key();
        let unchanged = existing.is_some_and(|key| {
            build
                .primary_key
                .as_deref()
                .is_some_and(|columns| self.mart.key(key).same_columns(columns))
        });
        if !unchanged {
            if let Some(key) = existing {
                self.mart.remove_key(key);
            }
            if let Some(columns) = &build.primary_key {
                self.mart
                    .add_key(table, KeyKind::Primary, columns.clone(), ComponentStatus::Inferred)?;
            }
        }

        let kept = match build.parent {
            Some(parent) => self.link_parent(build, parent)?,
            None => None,
        };
        let stale: Vec<KeyId> = self
            .mart
            .table(table)
            .foreign_keys()
            .filter(|key| Some(*key) != kept)
            .collect();
        for key in stale {
            self.mart.remove_key(key);
        }

        for column in self.mart.key_columns(table) {
            if let Some(generated) = self.mart.column_mut(column).generated.as_mut() {
                generated.key_dependency = true;
            }
        }
        Ok(())
    }

    fn link_parent(
        &mut self,
        build: &TableBuild,
        parent: TableId,
    ) -> Result<Option<KeyId>> {
        let Some(parent_key) = self.mart.table(parent).primary_key() else {
            return Ok(None);
        };
        if build.parent_link.is_empty()
            || build.parent_link.len() != self.mart.key(parent_key).columns().len()
        {
            return Ok(None);
        }
        let foreign = match self.mart.find_foreign_key(build.table, &build.parent_link) {
            Some(key) => key,
            None => self.mart.add_key(
                build.table,
                KeyKind::Foreign,
                build.parent_link.clone(),
                ComponentStatus::Inferred,
            )?,
        };
        if self.mart.find_relation(parent_key, foreign).is_none() {
            self.mart
                .add_relation(parent_key, foreign, Cardinality::Many, ComponentStatus::Inferred)?;
        }
        Ok(Some(foreign))
    }

    /// Drop columns this run did not place, with their mods.
    fn prune(&mut self, build: &TableBuild) -> Result<()> {
        let unplaced: Vec<(ColumnId, String)> = self
            .mart
            .table(build.table)
            .columns()
            .filter(|column| !build.contains(*column))
            .map(|column| (column, self.mart.column(column).name().to_string()))
            .collect();
        for (column, internal) in unplaced {
            self.mart.remove_column(column);
            let removed = self
                .mart
                .dataset_mut(self.dataset)?
                .mods
                .remove_entity(&build.name, &internal);
            debug!(table = %build.name, column = %internal, mods = removed, "column pruned");
        }
        Ok(())
    }

    /// Visible names: renames first, then new columns, then inherited ones.
    /// Key columns carry the key suffix; an inherited name already taken by
    /// a new column gets the clash suffix.
    fn assign_names(&mut self, build: &TableBuild) {
        let key_columns = self.mart.key_columns(build.table);
        let mut taken = BTreeSet::new();
        let mut names: BTreeMap<ColumnId, String> = BTreeMap::new();

        for column in build.columns.keys() {
            let internal = self.mart.column(*column).name();
            if let Some(renamed) = self.mods.column_rename(&build.name, internal) {
                if taken.insert(renamed.to_string()) {
                    names.insert(*column, renamed.to_string());
                }
            }
        }

        let inherited = |column: &ColumnId| {
            self.mart
                .column(*column)
                .generated
                .as_ref()
                .is_some_and(|generated| generated.kind.is_inherited())
        };
        let candidate = |column: &ColumnId, base: &str| {
            if key_columns.contains(column) {
                format!("{base}{KEY_SUFFIX}")
            } else {
                base.to_string()
            }
        };
        for (column, base) in build.columns.iter().filter(|(column, _)| !inherited(column)) {
            if names.contains_key(column) {
                continue;
            }
            let name = unique_name(candidate(column, base), &taken);
            taken.insert(name.clone());
            names.insert(*column, name);
        }
        for (column, base) in build.columns.iter().filter(|(column, _)| inherited(column)) {
            if names.contains_key(column) {
                continue;
            }
            let mut name = candidate(column, base);
            if taken.contains(&name) {
                name = unique_name(format!("{name}{CLASH_SUFFIX}"), &taken);
            }
            taken.insert(name.clone());
            names.insert(*column, name);
        }

        for (column, name) in names {
            let masked = self.mods.is_column_masked(&build.name, self.mart.column(column).name());
            if let Some(generated) = self.mart.column_mut(column).generated.as_mut() {
                generated.masked = masked && !generated.is_required();
                generated.modified_name = name;
            }
        }
    }
}
