//! Dataset compiler: walks the relation graph from a dataset's root table and
//! materializes its generated tables.
//!
//! The main table is named after the dataset. Subclass and dimension tables
//! are queued while their parent is walked and built once the parent has
//! been finished, so every child sees its parent's final columns and key.

mod finish;
pub mod naming;
mod process;

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use martforge_core::{
    ColumnId, DatasetColumn, DatasetColumnKind, DatasetTableInfo, DatasetTableType, Error, JoinTable,
    KeyId, Mart, Mods, PartitionApplication, PartitionBinding, PartitionRow, RelationId, Result,
    SchemaId, SelectFromTable, TableId, TransformationChain, TransformationUnit,
};

use naming::{dimension_table_name, strip_key_suffix, subclass_table_name, unique_name};

/// Outcome of one [`generate`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub dataset: String,
    pub tables: usize,
    pub columns: usize,
    pub units: usize,
    pub skipped_relations: usize,
    /// Generated tables from a previous run that no longer have a branch.
    pub tables_removed: Vec<String>,
    /// Queued expression columns and partition applications put into effect.
    pub realized_pending: usize,
}

/// Regenerate every table of `dataset` from its root table and its mods.
///
/// Tables that already exist under the same name, focus relation and
/// iteration keep their identity; their transformation chains are rebuilt
/// from scratch. Partition applications in effect must have their rows
/// loaded beforehand.
pub fn generate(mart: &mut Mart, dataset: SchemaId) -> Result<GenerationReport> {
    let central = mart.central_table(dataset)?;
    let realized = mart.realize_pending(dataset)?;
    let info = mart.dataset(dataset)?;
    let mods = info.mods.clone();
    let make_dimensions = info.make_dimensions;
    let name = mart.schema(dataset).name().to_string();
    info!(dataset = %name, "generation started");

    let mut compiler = Compiler {
        mart,
        dataset,
        name: name.clone(),
        mods,
        make_dimensions,
        skip: BTreeSet::new(),
        built: BTreeSet::new(),
        claimed: BTreeSet::new(),
        report: GenerationReport {
            dataset: name,
            realized_pending: realized,
            ..GenerationReport::default()
        },
    };
    let root = compiler.real_root(central);
    compiler.seed_skip_set(root);
    compiler.build_main(root)?;
    compiler.remove_stale_tables();
    compiler.mart.clear_dirty(dataset);

    let report = compiler.report;
    info!(
        dataset = %report.dataset,
        tables = report.tables,
        columns = report.columns,
        units = report.units,
        skipped = report.skipped_relations,
        removed = report.tables_removed.len(),
        "generation finished"
    );
    Ok(report)
}

pub(crate) struct Compiler<'m> {
    mart: &'m mut Mart,
    dataset: SchemaId,
    name: String,
    /// Snapshot of the dataset's mods taken before the run.
    mods: Mods,
    make_dimensions: bool,
    /// Tables never entered as fresh dimensions.
    skip: BTreeSet<TableId>,
    built: BTreeSet<TableId>,
    claimed: BTreeSet<String>,
    report: GenerationReport,
}

/// State of the generated table currently being walked.
#[derive(Debug, Clone)]
pub(crate) struct TableBuild {
    table: TableId,
    name: String,
    table_type: DatasetTableType,
    parent: Option<TableId>,
    chain: TransformationChain,
    /// Columns placed by this run, in placement order, with their visible
    /// name before disambiguation.
    columns: IndexMap<ColumnId, String>,
    primary_key: Option<Vec<ColumnId>>,
    /// Inherited columns standing for the parent's primary key.
    parent_link: Vec<ColumnId>,
    /// Source table whose subclass relations may be taken.
    merge_table: TableId,
    visits: BTreeMap<TableId, usize>,
    subclass_counts: BTreeMap<RelationId, usize>,
    application: Option<(PartitionApplication, Vec<PartitionRow>)>,
    queue: Vec<Branch>,
}

impl TableBuild {
    fn new(table: TableId, name: String, table_type: DatasetTableType, focus: TableId) -> Self {
        Self {
            table,
            name,
            table_type,
            parent: None,
            chain: TransformationChain::default(),
            columns: IndexMap::new(),
            primary_key: None,
            parent_link: Vec::new(),
            merge_table: focus,
            visits: BTreeMap::new(),
            subclass_counts: BTreeMap::new(),
            application: None,
            queue: Vec::new(),
        }
    }

    fn contains(&self, column: ColumnId) -> bool {
        self.columns.contains_key(&column)
    }
}

/// What a finished table hands to the branches queued under it.
pub(crate) struct ParentContext {
    table: TableId,
    name: String,
    visits: BTreeMap<TableId, usize>,
    subclass_counts: BTreeMap<RelationId, usize>,
}

/// One source table to read into the current build.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    table: TableId,
    arrival: Option<Arrival>,
    /// Zero for the table a build starts from.
    depth: usize,
    prefix: String,
    suffix: String,
    /// Source tables between the start and this step.
    path: Vec<TableId>,
    looped: BTreeSet<RelationId>,
}

impl Step {
    fn start(table: TableId, prefix: String, suffix: String, path: Vec<TableId>) -> Self {
        Self {
            table,
            arrival: None,
            depth: 0,
            prefix,
            suffix,
            path,
            looped: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Arrival {
    relation: RelationId,
    /// Key of the step's table the join lands on.
    to_key: KeyId,
    source_columns: Vec<ColumnId>,
    iteration: usize,
    partition: Option<PartitionBinding>,
    merged: bool,
    /// Generated table under which the relation's policy is filed.
    policy_owner: String,
}

/// A subclass or dimension table queued under the current build.
#[derive(Debug, Clone)]
pub(crate) struct Branch {
    table_type: DatasetTableType,
    focus_table: TableId,
    relation: RelationId,
    /// Key on the parent-side source table.
    from_key: KeyId,
    /// Key on the focus table.
    to_key: KeyId,
    iteration: usize,
    prefix: String,
    suffix: String,
    partition: Option<PartitionBinding>,
}

impl Compiler<'_> {
    /// Climb subclass relations upwards from the central table.
    fn real_root(&self, central: TableId) -> TableId {
        let mut root = central;
        let mut visited = BTreeSet::from([central]);
        'climb: loop {
            for key in self.mart.table(root).foreign_keys() {
                for relation in self.mart.key(key).relations() {
                    let candidate = self.mart.relation(relation);
                    if candidate.status.is_incorrect() || candidate.second_key() != key {
                        continue;
                    }
                    let name = self.mart.relation_name(relation);
                    if !self.mods.is_relation_subclass(&self.name, &name) {
                        continue;
                    }
                    let parent = self.mart.key(candidate.first_key()).table();
                    if visited.insert(parent) {
                        debug!(from = %self.mart.qualified_table_name(root), to = %self.mart.qualified_table_name(parent), "root climbs subclass relation");
                        root = parent;
                        continue 'climb;
                    }
                }
            }
            return root;
        }
    }

    /// Root plus every table reachable from it through subclass relations.
    fn seed_skip_set(&mut self, root: TableId) {
        let mut pending = vec![(root, self.name.clone())];
        self.skip.insert(root);
        while let Some((table, owner)) = pending.pop() {
            let Some(primary) = self.mart.table(table).primary_key() else {
                continue;
            };
            for relation in self.mart.key(primary).relations() {
                let candidate = self.mart.relation(relation);
                if candidate.first_key() != primary || candidate.status.is_incorrect() {
                    continue;
                }
                let name = self.mart.relation_name(relation);
                if !self.mods.is_relation_subclass(&owner, &name) {
                    continue;
                }
                let child = self.mart.key(candidate.second_key()).table();
                if self.skip.insert(child) {
                    let child_name = self.mart.table(child).name();
                    pending.push((child, subclass_table_name(&owner, child_name, 0)));
                }
            }
        }
    }

    /// Reuse the generated table called `name` when it still describes the
    /// same branch, otherwise replace it.
    fn open_table(
        &mut self,
        name: &str,
        table_type: DatasetTableType,
        focus: TableId,
        focus_relation: Option<RelationId>,
        iteration: usize,
        parent: Option<TableId>,
    ) -> Result<TableId> {
        let existing = self.mart.find_table(self.dataset, name);
        let reusable = existing.filter(|table| {
            self.mart.table(*table).generated.as_ref().is_some_and(|info| {
                info.table_type == table_type
                    && info.focus_relation == focus_relation
                    && info.focus_iteration == iteration
            })
        });
        let table = match (reusable, existing) {
            (Some(table), _) => {
                debug!(table = %name, "reusing generated table");
                table
            }
            (None, Some(stale)) => {
                debug!(table = %name, "replacing generated table");
                self.mart.remove_table(stale);
                self.mart.add_table(self.dataset, name)?
            }
            (None, None) => self.mart.add_table(self.dataset, name)?,
        };

        let mut info = DatasetTableInfo::new(table_type, focus);
        info.parent = parent;
        info.focus_relation = focus_relation;
        info.focus_iteration = iteration;
        self.mart.table_mut(table).generated = Some(info);
        self.built.insert(table);
        Ok(table)
    }

    fn claim_name(&mut self, candidate: String) -> String {
        let name = unique_name(candidate, &self.claimed);
        self.claimed.insert(name.clone());
        name
    }

    /// Partition application in effect for a generated table, with its rows.
    fn application_rows(
        &self,
        table: TableId,
    ) -> Result<Option<(PartitionApplication, Vec<PartitionRow>)>> {
        let Some(application) = self.mart.application_for_table(self.dataset, table) else {
            return Ok(None);
        };
        let rows = self
            .mart
            .partitions
            .table(&application.partition_table)
            .and_then(|partition| partition.rows())
            .ok_or_else(|| {
                Error::partition(format!(
                    "rows of partition table '{}' are not loaded",
                    application.partition_table
                ))
            })?;
        Ok(Some((application.clone(), rows.to_vec())))
    }

    /// Place a generated column on the build, reusing the one with the same
    /// internal name from a previous run.
    fn place_column(
        &mut self,
        build: &mut TableBuild,
        internal: String,
        base: String,
        kind: DatasetColumnKind,
        key_dependency: bool,
    ) -> Result<ColumnId> {
        let column = match self.mart.find_column(build.table, &internal) {
            Some(column) if build.contains(column) => {
                return Err(Error::invariant(format!(
                    "column '{internal}' placed twice on '{}'",
                    build.name
                )));
            }
            Some(column) => column,
            None => self.mart.add_column(build.table, internal)?,
        };
        let mut generated = DatasetColumn::new(kind, base.clone());
        generated.key_dependency = key_dependency;
        self.mart.column_mut(column).generated = Some(generated);
        build.columns.insert(column, base);
        Ok(column)
    }

    fn walk(&mut self, build: &mut TableBuild, start: Step) -> Result<()> {
        let mut stack = vec![start];
        while let Some(step) = stack.pop() {
            self.process_table(build, step, &mut stack)?;
        }
        Ok(())
    }

    fn build_main(&mut self, root: TableId) -> Result<()> {
        let name = self.claim_name(self.name.clone());
        let table = self.open_table(&name, DatasetTableType::Main, root, None, 0, None)?;
        let mut build = TableBuild::new(table, name, DatasetTableType::Main, root);
        build.application = self.application_rows(table)?;
        self.walk(
            &mut build,
            Step::start(root, String::new(), String::new(), Vec::new()),
        )?;
        self.complete(build)
    }

    /// Finish a build, then build the branches it queued.
    fn complete(&mut self, mut build: TableBuild) -> Result<()> {
        let queue = std::mem::take(&mut build.queue);
        let parent = self.finish_table(build)?;
        if queue.is_empty() {
            return Ok(());
        }
        if self.mart.table(parent.table).primary_key().is_none() {
            debug!(table = %parent.name, branches = queue.len(), "no primary key, branches dropped");
            return Ok(());
        }
        for branch in queue {
            self.build_branch(&parent, branch)?;
        }
        Ok(())
    }

    fn parent_columns(&self, parent: TableId, sources: &[ColumnId]) -> Option<Vec<ColumnId>> {
        let chain = &self.mart.table(parent).generated.as_ref()?.chain;
        sources.iter().map(|column| chain.resolve(*column)).collect()
    }

    fn build_branch(&mut self, parent: &ParentContext, branch: Branch) -> Result<()> {
        let from_table = self.mart.key(branch.from_key).table();
        let from_columns = self.mart.key(branch.from_key).columns().to_vec();
        let Some(parent_sources) = self.parent_columns(parent.table, &from_columns) else {
            warn!(
                table = %parent.name,
                relation = %self.mart.relation_name(branch.relation),
                "branch key is not available on the parent, branch dropped"
            );
            return Ok(());
        };

        let focus_name = self.mart.table(branch.focus_table).name().to_string();
        let candidate = match branch.table_type {
            DatasetTableType::Dimension => {
                dimension_table_name(&parent.name, &focus_name, branch.iteration)
            }
            _ => subclass_table_name(&parent.name, &focus_name, branch.iteration),
        };
        let name = self.claim_name(candidate);
        let table = self.open_table(
            &name,
            branch.table_type,
            branch.focus_table,
            Some(branch.relation),
            branch.iteration,
            Some(parent.table),
        )?;
        debug!(table = %name, kind = %branch.table_type, parent = %parent.name, "building branch");

        let mut build = TableBuild::new(table, name, branch.table_type, branch.focus_table);
        build.parent = Some(parent.table);
        build.visits = parent.visits.clone();
        build.subclass_counts = parent.subclass_counts.clone();
        if branch.table_type == DatasetTableType::MainSubclass {
            *build.subclass_counts.entry(branch.relation).or_default() += 1;
        }
        build.application = self.application_rows(table)?;

        let parent_key = self
            .mart
            .table(parent.table)
            .primary_key()
            .map(|key| self.mart.key(key).columns().to_vec())
            .unwrap_or_default();

        if branch.table_type == DatasetTableType::Dimension {
            if let Some(start) = self.alternate_start(&build, branch.focus_table) {
                let initial = build.clone();
                if self.walk_from_alternate_start(
                    &mut build,
                    parent,
                    &branch,
                    start,
                    from_table,
                    &parent_sources,
                    &parent_key,
                )? {
                    return self.complete(build);
                }
                warn!(
                    table = %build.name,
                    start = %self.mart.qualified_table_name(start),
                    "alternate start never reaches the focus table, using the focus table"
                );
                build = initial;
            }
        }

        let inherited = self.inherited_columns(parent, &branch, from_table, &parent_sources, &parent_key);
        let mut new_columns = IndexMap::new();
        for parent_column in inherited {
            let generated = self.inherit_column(&mut build, parent_column)?;
            new_columns.insert(parent_column, generated);
        }
        build.parent_link = parent_key
            .iter()
            .filter_map(|column| new_columns.get(column).copied())
            .collect();
        build.chain.push(TransformationUnit::SelectFromTable(SelectFromTable {
            table: parent.table,
            new_columns,
            restriction: None,
        }));

        let focus = Step {
            arrival: Some(Arrival {
                relation: branch.relation,
                to_key: branch.to_key,
                source_columns: parent_sources,
                iteration: branch.iteration,
                partition: branch.partition.clone(),
                merged: false,
                policy_owner: parent.name.clone(),
            }),
            ..Step::start(
                branch.focus_table,
                branch.prefix.clone(),
                branch.suffix.clone(),
                vec![from_table],
            )
        };
        self.walk(&mut build, focus)?;
        self.complete(build)
    }

    /// Parent columns a branch inherits: all of them for subclasses; the
    /// primary key, the join columns and any restriction columns for
    /// dimensions.
    fn inherited_columns(
        &self,
        parent: &ParentContext,
        branch: &Branch,
        from_table: TableId,
        parent_sources: &[ColumnId],
        parent_key: &[ColumnId],
    ) -> Vec<ColumnId> {
        if branch.table_type == DatasetTableType::MainSubclass {
            return self.mart.table(parent.table).columns().collect();
        }
        let mut columns: Vec<ColumnId> = Vec::new();
        let mut add = |column: ColumnId| {
            if !columns.contains(&column) {
                columns.push(column);
            }
        };
        parent_key.iter().copied().for_each(&mut add);
        parent_sources.iter().copied().for_each(&mut add);

        let relation = self.mart.relation(branch.relation);
        let first_table = self.mart.key(relation.first_key()).table();
        let relation_name = self.mart.relation_name(branch.relation);
        if first_table == from_table {
            if let Some(restriction) =
                self.mods
                    .relation_restriction(&parent.name, &relation_name, branch.iteration)
            {
                let sources: Vec<ColumnId> = restriction
                    .left_aliases
                    .values()
                    .filter_map(|name| self.mart.find_column(from_table, name))
                    .collect();
                if let Some(resolved) = self.parent_columns(parent.table, &sources) {
                    resolved.into_iter().for_each(&mut add);
                }
            }
        }
        columns
    }

    fn inherit_column(&mut self, build: &mut TableBuild, parent_column: ColumnId) -> Result<ColumnId> {
        let column = self.mart.column(parent_column);
        let internal = column.name().to_string();
        let base = strip_key_suffix(column.modified_name()).to_string();
        self.place_column(
            build,
            internal,
            base,
            DatasetColumnKind::Inherited {
                parent: parent_column,
            },
            false,
        )
    }

    fn alternate_start(&self, build: &TableBuild, focus: TableId) -> Option<TableId> {
        let qualified = self.mods.transform_start(&build.name)?;
        self.mart
            .find_table_by_qualified_name(qualified)
            .filter(|start| *start != focus)
    }

    /// Walk a dimension from its alternate start and join the parent last.
    /// Returns false, leaving the build to be reset, when the walk never
    /// reaches the focus table.
    #[allow(clippy::too_many_arguments)]
    fn walk_from_alternate_start(
        &mut self,
        build: &mut TableBuild,
        parent: &ParentContext,
        branch: &Branch,
        start: TableId,
        from_table: TableId,
        parent_sources: &[ColumnId],
        parent_key: &[ColumnId],
    ) -> Result<bool> {
        self.walk(
            build,
            Step::start(
                start,
                branch.prefix.clone(),
                branch.suffix.clone(),
                vec![from_table],
            ),
        )?;
        if !build.chain.visited_tables().contains(&branch.focus_table) {
            return Ok(false);
        }

        let mut join = JoinTable::new(
            parent.table,
            Some(branch.relation),
            self.mart.key(branch.to_key).columns().to_vec(),
            parent_sources.to_vec(),
            branch.iteration,
        );
        for parent_column in parent_key {
            let generated = self.inherit_column(build, *parent_column)?;
            join.new_columns.insert(*parent_column, generated);
        }
        build.parent_link = join.new_columns.values().copied().collect();
        build.chain.push(TransformationUnit::JoinTable(join));
        debug!(table = %build.name, "dimension stitched to its parent from an alternate start");
        Ok(true)
    }

    fn remove_stale_tables(&mut self) {
        let stale: Vec<TableId> = self
            .mart
            .schema(self.dataset)
            .tables()
            .filter(|table| !self.built.contains(table))
            .collect();
        for table in stale {
            let name = self.mart.table(table).name().to_string();
            self.mart.remove_table(table);
            debug!(table = %name, "stale generated table removed");
            self.report.tables_removed.push(name);
        }
    }
}
