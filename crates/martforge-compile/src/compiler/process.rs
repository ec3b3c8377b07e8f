use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use martforge_core::{
    Cardinality, ColumnId, DatasetColumnKind, DatasetTableType, JoinTable, KeyId,
    PartitionBinding, RelationId, Result, SelectFromTable, TableId, TableRestriction,
    TransformationUnit, UnrollDefinition, UnrollTable, UnrolledRole,
};

use super::naming::{internal_column_name, visible_column_name};
use super::{Arrival, Branch, Compiler, Step, TableBuild};

/// One pass over a relation: its number, the name segments it adds and the
/// partition row it is bound to.
struct Iteration {
    number: usize,
    prefix: String,
    suffix: String,
    partition: Option<PartitionBinding>,
}

/// The relation being considered from the current step, seen from its side.
struct Candidate {
    relation: RelationId,
    name: String,
    own_key: KeyId,
    other_key: KeyId,
    other_table: TableId,
    returning: bool,
}

impl Compiler<'_> {
    /// Read one source table into the build and push the steps it leads to.
    pub(super) fn process_table(
        &mut self,
        build: &mut TableBuild,
        step: Step,
        stack: &mut Vec<Step>,
    ) -> Result<()> {
        if step.arrival.as_ref().is_some_and(|arrival| arrival.merged) {
            build.merge_table = step.table;
        }
        let visit = {
            let count = build.visits.entry(step.table).or_default();
            let visit = *count;
            *count += 1;
            visit
        };

        let qualified = self.mart.qualified_table_name(step.table);
        let table_restriction = self.mods.table_restriction(&build.name, &qualified).cloned();
        let unit = match &step.arrival {
            None => TransformationUnit::SelectFromTable(SelectFromTable {
                table: step.table,
                new_columns: IndexMap::new(),
                restriction: table_restriction,
            }),
            Some(arrival) => {
                TransformationUnit::JoinTable(self.join_unit(step.table, arrival, table_restriction))
            }
        };
        let unit_index = build.chain.push(unit);

        let introduced = self.wrap_columns(build, &step, visit)?;
        match build.chain.get_mut(unit_index) {
            Some(TransformationUnit::SelectFromTable(unit)) => unit.new_columns = introduced,
            Some(TransformationUnit::JoinTable(unit)) => unit.new_columns = introduced,
            _ => {}
        }
        self.fold_primary_key(build, &step);

        let mut relations: Vec<(String, RelationId)> = self
            .mart
            .relations_of_table(step.table)
            .into_iter()
            .map(|relation| (self.mart.relation_name(relation), relation))
            .collect();
        relations.sort();

        let mut children = Vec::new();
        for (name, relation) in relations {
            if let Some(candidate) = self.candidate(&step, relation, name) {
                self.consider(build, &step, visit, candidate, &mut children)?;
            }
        }
        stack.extend(children.into_iter().rev());
        Ok(())
    }

    fn join_unit(
        &self,
        table: TableId,
        arrival: &Arrival,
        table_restriction: Option<TableRestriction>,
    ) -> JoinTable {
        let relation_name = self.mart.relation_name(arrival.relation);
        let owner = arrival.policy_owner.as_str();
        let mut join = JoinTable::new(
            table,
            Some(arrival.relation),
            arrival.source_columns.clone(),
            self.mart.key(arrival.to_key).columns().to_vec(),
            arrival.iteration,
        );
        join.relation_restriction = self
            .mods
            .relation_restriction(owner, &relation_name, arrival.iteration)
            .cloned();
        join.table_restriction = table_restriction;
        join.alternative_join = self.mods.is_alternative_join(owner, &relation_name);
        join.loopback_differentiator = self
            .mods
            .loopback(owner, &relation_name)
            .and_then(|loopback| loopback.differentiator)
            .and_then(|column| self.mart.find_column(table, &column));
        join.partition = arrival.partition.clone();
        join
    }

    /// Wrap every column of the step's table except the key it was joined
    /// on, which the previous input already provides.
    fn wrap_columns(
        &mut self,
        build: &mut TableBuild,
        step: &Step,
        visit: usize,
    ) -> Result<IndexMap<ColumnId, ColumnId>> {
        let arrived_on: BTreeSet<ColumnId> = step
            .arrival
            .as_ref()
            .map(|arrival| self.mart.key(arrival.to_key).columns().iter().copied().collect())
            .unwrap_or_default();
        let key_columns = self.mart.key_columns(step.table);
        let table = self.mart.table(step.table);
        let schema_uid = self.mart.schema(table.schema()).unique_id();
        let table_uid = table.unique_id();
        let sources: Vec<(ColumnId, String)> = table
            .columns()
            .filter(|column| !arrived_on.contains(column))
            .map(|column| (column, self.mart.column(column).name().to_string()))
            .collect();

        let mut introduced = IndexMap::new();
        for (source, name) in sources {
            let internal = internal_column_name(&step.prefix, schema_uid, table_uid, visit, &name);
            let base = visible_column_name(&step.prefix, &name, &step.suffix);
            let generated = self.place_column(
                build,
                internal,
                base,
                DatasetColumnKind::Wrapped { source },
                key_columns.contains(&source),
            )?;
            let partitions = self.mart.column(source).in_partitions.clone();
            self.mart.column_mut(generated).in_partitions = partitions;
            introduced.insert(source, generated);
        }
        Ok(introduced)
    }

    /// The first table of a non-dimension build lends it its primary key.
    fn fold_primary_key(&self, build: &mut TableBuild, step: &Step) {
        if step.depth > 0
            || build.table_type == DatasetTableType::Dimension
            || build.primary_key.is_some()
        {
            return;
        }
        let Some(key) = self.mart.table(step.table).primary_key() else {
            return;
        };
        let key = self.mart.key(key);
        if key.status.is_incorrect() {
            return;
        }
        build.primary_key = key
            .columns()
            .iter()
            .map(|column| build.chain.resolve(*column))
            .collect();
    }

    /// The relation seen from the step's table, or `None` when it must not
    /// be walked at all.
    fn candidate(&self, step: &Step, relation: RelationId, name: String) -> Option<Candidate> {
        let own_key = self.mart.relation_key_on(relation, step.table)?;
        let found = self.mart.relation(relation);
        let other_key = found.other_key(own_key)?;
        if found.status.is_incorrect()
            || self.mart.key(own_key).status.is_incorrect()
            || self.mart.key(other_key).status.is_incorrect()
        {
            debug!(relation = %name, "incorrect relation not followed");
            return None;
        }
        let other_table = self.mart.key(other_key).table();
        let target = self.mart.table(other_table);
        if target.is_generated() || target.masked || self.mart.schema(target.schema()).masked {
            debug!(relation = %name, "relation leads to a masked table");
            return None;
        }
        let returning = step
            .arrival
            .as_ref()
            .is_some_and(|arrival| arrival.relation == relation)
            || step.path.contains(&other_table);
        Some(Candidate {
            relation,
            name,
            own_key,
            other_key,
            other_table,
            returning,
        })
    }

    fn consider(
        &mut self,
        build: &mut TableBuild,
        step: &Step,
        visit: usize,
        candidate: Candidate,
        children: &mut Vec<Step>,
    ) -> Result<()> {
        let owner = build.name.clone();
        let name = candidate.name.as_str();
        let loopback = self.mods.loopback(&owner, name).is_some();
        if candidate.returning && (!loopback || step.looped.contains(&candidate.relation)) {
            return Ok(());
        }

        if self.mods.is_relation_masked(&owner, name) {
            let placeholder = JoinTable::new(
                candidate.other_table,
                Some(candidate.relation),
                self.mart.key(candidate.own_key).columns().to_vec(),
                self.mart.key(candidate.other_key).columns().to_vec(),
                0,
            );
            build.chain.push(TransformationUnit::SkipTable(placeholder));
            debug!(table = %owner, relation = %name, "masked relation kept as a skip unit");
            return Ok(());
        }

        if candidate.returning {
            debug!(table = %owner, relation = %name, "loopback relation walked back");
            self.follow(build, step, &candidate, None, false, false, children);
            return Ok(());
        }

        if let Some(definition) = self.mods.unroll(&owner, name).cloned() {
            return self.unroll(build, step, visit, &candidate, definition);
        }

        let relation = self.mart.relation(candidate.relation);
        let own_is_first = relation.first_key() == candidate.own_key;
        let to_many = relation.cardinality == Cardinality::ManyToMany
            || (own_is_first && relation.cardinality == Cardinality::Many);
        let compound = self.mods.compound(&owner, name).map(|definition| definition.count);

        if to_many {
            if self.mods.is_relation_subclass(&owner, name) {
                let taken = build.subclass_counts.get(&candidate.relation).copied().unwrap_or(0);
                if build.table_type.is_main()
                    && build.merge_table == step.table
                    && taken < compound.unwrap_or(1)
                {
                    build.queue.push(self.branch(
                        DatasetTableType::MainSubclass,
                        &candidate,
                        step.prefix.clone(),
                        step.suffix.clone(),
                        0,
                        None,
                    ));
                } else {
                    debug!(table = %owner, relation = %name, "subclass relation not taken here");
                }
                return Ok(());
            }

            let merged = self.mods.is_relation_merged(&owner, name);
            if !merged && !self.mods.is_relation_forced(&owner, name) {
                if self.make_dimensions
                    && build.table_type.is_main()
                    && !self.skip.contains(&candidate.other_table)
                {
                    for iteration in self.iterations(build, step, name, compound, loopback) {
                        build.queue.push(self.branch(
                            DatasetTableType::Dimension,
                            &candidate,
                            iteration.prefix,
                            step.suffix.clone(),
                            iteration.number,
                            iteration.partition,
                        ));
                    }
                } else {
                    debug!(table = %owner, relation = %name, "to-many relation not followed");
                }
                return Ok(());
            }
            self.follow(build, step, &candidate, compound, loopback, merged, children);
            return Ok(());
        }

        self.follow(build, step, &candidate, compound, loopback, false, children);
        Ok(())
    }

    fn branch(
        &self,
        table_type: DatasetTableType,
        candidate: &Candidate,
        prefix: String,
        suffix: String,
        iteration: usize,
        partition: Option<PartitionBinding>,
    ) -> Branch {
        Branch {
            table_type,
            focus_table: candidate.other_table,
            relation: candidate.relation,
            from_key: candidate.own_key,
            to_key: candidate.other_key,
            iteration,
            prefix,
            suffix,
            partition,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn follow(
        &self,
        build: &TableBuild,
        step: &Step,
        candidate: &Candidate,
        compound: Option<usize>,
        loopback: bool,
        merged: bool,
        children: &mut Vec<Step>,
    ) {
        let source_columns = self.mart.key(candidate.own_key).columns().to_vec();
        let mut path = step.path.clone();
        path.push(step.table);
        let mut looped = step.looped.clone();
        if candidate.returning {
            looped.insert(candidate.relation);
        }
        for iteration in self.iterations(build, step, &candidate.name, compound, loopback) {
            children.push(Step {
                table: candidate.other_table,
                arrival: Some(Arrival {
                    relation: candidate.relation,
                    to_key: candidate.other_key,
                    source_columns: source_columns.clone(),
                    iteration: iteration.number,
                    partition: iteration.partition,
                    merged,
                    policy_owner: build.name.clone(),
                }),
                depth: step.depth + 1,
                prefix: iteration.prefix,
                suffix: iteration.suffix,
                path: path.clone(),
                looped: looped.clone(),
            });
        }
    }

    /// Passes over a relation. At the first level of a build a partition
    /// application row for the relation decides them; otherwise the compound
    /// count does, plus one for loopback relations.
    fn iterations(
        &self,
        build: &TableBuild,
        step: &Step,
        relation: &str,
        compound: Option<usize>,
        loopback: bool,
    ) -> Vec<Iteration> {
        if step.depth == 0 {
            if let Some((application, rows)) = &build.application {
                if let Some(row) = application.row_for_relation(relation) {
                    let take = match row.compound {
                        0 => rows.len(),
                        count => count.min(rows.len()),
                    };
                    return rows
                        .iter()
                        .take(take)
                        .enumerate()
                        .map(|(index, values)| {
                            let number = index + 1;
                            let segment = values
                                .value_for(&row.name_column)
                                .map(str::to_string)
                                .unwrap_or_else(|| number.to_string());
                            Iteration {
                                number,
                                prefix: format!("{}{segment}_", step.prefix),
                                suffix: step.suffix.clone(),
                                partition: Some(PartitionBinding {
                                    partition_table: application.partition_table.clone(),
                                    column: row.partition_column.clone(),
                                    value: values.value_for(&row.partition_column).map(str::to_string),
                                }),
                            }
                        })
                        .collect();
                }
            }
        }

        let count = compound.unwrap_or(1) + usize::from(loopback);
        if count <= 1 {
            return vec![Iteration {
                number: 0,
                prefix: step.prefix.clone(),
                suffix: step.suffix.clone(),
                partition: None,
            }];
        }
        (1..=count)
            .map(|number| Iteration {
                number,
                prefix: step.prefix.clone(),
                suffix: format!("{}_{number}", step.suffix),
                partition: None,
            })
            .collect()
    }

    /// Replace a recursive relation with a synthesized id/name pair.
    fn unroll(
        &mut self,
        build: &mut TableBuild,
        step: &Step,
        visit: usize,
        candidate: &Candidate,
        definition: UnrollDefinition,
    ) -> Result<()> {
        let source_columns: Option<Vec<ColumnId>> = self
            .mart
            .key(candidate.own_key)
            .columns()
            .iter()
            .map(|column| build.chain.resolve(*column))
            .collect();
        let Some(source_columns) = source_columns else {
            warn!(table = %build.name, relation = %candidate.name, "unroll key is not available, relation skipped");
            return Ok(());
        };

        // Named after the many end's key so that several unrolled relations
        // into one table stay apart.
        let many_key = self.mart.key(self.mart.relation(candidate.relation).second_key());
        let many_table = self.mart.table(many_key.table());
        let schema_uid = self.mart.schema(many_table.schema()).unique_id();
        let table_uid = many_table.unique_id();
        let key_columns: Vec<&str> = many_key
            .columns()
            .iter()
            .map(|column| self.mart.column(*column).name())
            .collect();
        let key_label = key_columns.join("_");
        let visible_label = key_label
            .strip_suffix("_id")
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&key_label)
            .to_string();

        let mut placed = Vec::with_capacity(2);
        for (role, label) in [(UnrolledRole::Id, "unrolled_id"), (UnrolledRole::Name, "unrolled_name")] {
            let internal = internal_column_name(
                &step.prefix,
                schema_uid,
                table_uid,
                visit,
                &format!("{key_label}_{label}"),
            );
            let base = visible_column_name(&step.prefix, &format!("{visible_label}_{label}"), &step.suffix);
            placed.push(self.place_column(
                build,
                internal,
                base,
                DatasetColumnKind::Unrolled {
                    relation: candidate.relation,
                    role,
                },
                false,
            )?);
        }
        build.chain.push(TransformationUnit::UnrollTable(UnrollTable {
            relation: candidate.relation,
            definition,
            source_columns,
            id_column: placed[0],
            name_column: placed[1],
        }));
        debug!(table = %build.name, relation = %candidate.name, "relation unrolled");
        Ok(())
    }
}
