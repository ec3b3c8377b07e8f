use std::collections::BTreeSet;

use pretty_assertions::assert_eq;

use martforge_compile::{DatasetSummary, SUMMARY_VERSION, generate, summarize_dataset};
use martforge_core::{
    Cardinality, ColumnId, ComponentStatus, CompoundDefinition, DatasetColumnKind, DatasetTableType,
    Error, ExpressionDefinition, KeyKind, LoopbackDefinition, Mart, RelationId, Result, SchemaId,
    SourceSettings, TableId, TransformationUnit, UnrollDefinition, validate_mart,
};

struct Source {
    mart: Mart,
    schema: SchemaId,
}

impl Source {
    fn new() -> Self {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("ens", SourceSettings::new("public"))
            .unwrap();
        Self { mart, schema }
    }

    fn table(&mut self, name: &str, columns: &[&str], primary: &[&str]) -> TableId {
        let table = self.mart.add_table(self.schema, name).unwrap();
        for column in columns {
            self.mart.add_column(table, *column).unwrap();
        }
        if !primary.is_empty() {
            let key = self.columns(table, primary);
            self.mart
                .add_key(table, KeyKind::Primary, key, ComponentStatus::Inferred)
                .unwrap();
        }
        table
    }

    fn columns(&self, table: TableId, names: &[&str]) -> Vec<ColumnId> {
        names
            .iter()
            .map(|name| self.mart.find_column(table, name).unwrap())
            .collect()
    }

    /// Foreign key `columns` on `many` referencing the primary key of `one`.
    fn relate(&mut self, one: TableId, many: TableId, columns: &[&str]) -> RelationId {
        let primary = self.mart.table(one).primary_key().unwrap();
        let columns = self.columns(many, columns);
        let foreign = self
            .mart
            .add_key(many, KeyKind::Foreign, columns, ComponentStatus::Inferred)
            .unwrap();
        self.mart
            .add_relation(primary, foreign, Cardinality::Many, ComponentStatus::Inferred)
            .unwrap()
    }
}

fn table_names(mart: &Mart, dataset: SchemaId) -> Vec<String> {
    mart.schema(dataset)
        .tables()
        .map(|table| mart.table(table).name().to_string())
        .collect()
}

fn generated(mart: &Mart, dataset: SchemaId, name: &str) -> TableId {
    mart.find_table(dataset, name)
        .unwrap_or_else(|| panic!("no generated table '{name}'"))
}

fn visible(mart: &Mart, table: TableId) -> Vec<String> {
    mart.table(table)
        .columns()
        .map(|column| mart.column(column).modified_name().to_string())
        .collect()
}

fn primary_key(mart: &Mart, table: TableId) -> Vec<String> {
    mart.table(table)
        .primary_key()
        .map(|key| {
            mart.key(key)
                .columns()
                .iter()
                .map(|column| mart.column(*column).modified_name().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn unit_labels(mart: &Mart, table: TableId) -> Vec<&'static str> {
    mart.table(table)
        .generated
        .as_ref()
        .unwrap()
        .chain
        .units()
        .iter()
        .map(TransformationUnit::label)
        .collect()
}

fn gene_transcript() -> (Source, TableId, TableId, RelationId) {
    let mut source = Source::new();
    let gene = source.table("gene", &["gene_id", "name"], &["gene_id"]);
    let transcript = source.table(
        "transcript",
        &["transcript_id", "gene_id", "biotype"],
        &["transcript_id"],
    );
    let relation = source.relate(gene, transcript, &["gene_id"]);
    (source, gene, transcript, relation)
}

#[test]
fn subclass_relation_yields_main_and_subclass_tables() -> Result<()> {
    let (mut source, gene, _, relation) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_subclass(dataset, "gene", relation, true)?;

    let report = generate(mart, dataset)?;
    assert_eq!(report.tables, 2);
    assert_eq!(table_names(mart, dataset), vec!["gene", "gene__transcript"]);

    let main = generated(mart, dataset, "gene");
    assert_eq!(mart.table(main).table_type(), Some(DatasetTableType::Main));
    assert_eq!(visible(mart, main), vec!["gene_id_key", "name"]);
    assert_eq!(primary_key(mart, main), vec!["gene_id_key"]);

    let subclass = generated(mart, dataset, "gene__transcript");
    assert_eq!(
        mart.table(subclass).table_type(),
        Some(DatasetTableType::MainSubclass)
    );
    assert_eq!(
        visible(mart, subclass),
        vec!["gene_id_key", "name", "transcript_id_key", "biotype"]
    );
    assert_eq!(primary_key(mart, subclass), vec!["transcript_id_key"]);

    let foreign: Vec<_> = mart.table(subclass).foreign_keys().collect();
    assert_eq!(foreign.len(), 1);
    let link = mart.key(foreign[0]).relations().next().unwrap();
    assert_eq!(
        mart.relation(link).first_key(),
        mart.table(main).primary_key().unwrap()
    );

    let main_key = mart.table(main).columns().next().unwrap();
    let inherited = mart
        .find_column(subclass, mart.column(main_key).name())
        .unwrap();
    assert_eq!(
        mart.column(inherited).generated.as_ref().unwrap().kind,
        DatasetColumnKind::Inherited { parent: main_key }
    );
    assert_eq!(unit_labels(mart, subclass), vec!["select", "join"]);
    assert!(!mart.schema(dataset).is_dirty());
    validate_mart(mart)?;
    Ok(())
}

#[test]
fn one_to_many_relations_become_dimensions() -> Result<()> {
    let (mut source, gene, _, _) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;

    generate(mart, dataset)?;
    assert_eq!(
        table_names(mart, dataset),
        vec!["gene", "gene__transcript__dm"]
    );
    let dimension = generated(mart, dataset, "gene__transcript__dm");
    assert_eq!(
        mart.table(dimension).table_type(),
        Some(DatasetTableType::Dimension)
    );
    assert_eq!(
        visible(mart, dimension),
        vec!["gene_id_key", "transcript_id", "biotype"]
    );
    assert!(primary_key(mart, dimension).is_empty());

    mart.set_make_dimensions(dataset, false)?;
    generate(mart, dataset)?;
    assert_eq!(table_names(mart, dataset), vec!["gene"]);
    Ok(())
}

#[test]
fn masking_a_relation_collapses_the_branch_and_unmasking_restores_it() -> Result<()> {
    let (mut source, gene, _, relation) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_subclass(dataset, "gene", relation, true)?;
    generate(mart, dataset)?;
    let before = summarize_dataset(mart, dataset)?;

    mart.set_relation_masked(dataset, "gene", relation, true)?;
    let report = generate(mart, dataset)?;
    assert_eq!(report.tables_removed, vec!["gene__transcript"]);
    assert_eq!(report.skipped_relations, 1);
    assert_eq!(table_names(mart, dataset), vec!["gene"]);
    let main = generated(mart, dataset, "gene");
    assert_eq!(unit_labels(mart, main), vec!["select", "skip"]);

    mart.set_relation_masked(dataset, "gene", relation, false)?;
    generate(mart, dataset)?;
    assert_eq!(summarize_dataset(mart, dataset)?, before);
    Ok(())
}

#[test]
fn regeneration_is_idempotent_and_keeps_table_identity() -> Result<()> {
    let (mut source, gene, _, relation) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_subclass(dataset, "gene", relation, true)?;

    generate(mart, dataset)?;
    let first = summarize_dataset(mart, dataset)?;
    let ids: Vec<TableId> = mart.schema(dataset).tables().collect();

    let report = generate(mart, dataset)?;
    assert!(report.tables_removed.is_empty());
    assert_eq!(summarize_dataset(mart, dataset)?, first);
    assert_eq!(mart.schema(dataset).tables().collect::<Vec<_>>(), ids);
    Ok(())
}

#[test]
fn generation_fails_cleanly_once_the_central_table_is_gone() -> Result<()> {
    let (mut source, gene, _, _) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    generate(mart, dataset)?;

    mart.remove_table(gene);
    let err = generate(mart, dataset).unwrap_err();
    assert!(matches!(err, Error::DataModel(_)));
    assert!(matches!(mart.central_table(dataset), Err(Error::DataModel(_))));
    Ok(())
}

#[test]
fn summary_serializes_for_ddl_generators() -> Result<()> {
    let (mut source, gene, _, relation) = gene_transcript();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_subclass(dataset, "gene", relation, true)?;
    generate(mart, dataset)?;

    let summary = summarize_dataset(mart, dataset)?;
    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["summary_version"], SUMMARY_VERSION);
    assert_eq!(value["central_table"], "ens.gene");
    assert_eq!(value["tables"][1]["name"], "gene__transcript");
    assert_eq!(value["tables"][1]["table_type"], "main_subclass");
    assert_eq!(value["tables"][1]["columns"][0]["kind"], "inherited");

    let restored: DatasetSummary = serde_json::from_value(value).unwrap();
    assert_eq!(restored, summary);
    Ok(())
}

fn gene_xref() -> (Source, TableId, RelationId) {
    let mut source = Source::new();
    let xref = source.table("xref", &["xref_id", "label"], &["xref_id"]);
    let gene = source.table("gene", &["gene_id", "name", "xref_id"], &["gene_id"]);
    let relation = source.relate(xref, gene, &["xref_id"]);
    (source, gene, relation)
}

#[test]
fn compound_relations_fan_out_into_numbered_branches() -> Result<()> {
    let (mut source, gene, relation) = gene_xref();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_compound(dataset, "gene", relation, Some(CompoundDefinition::new(2)))?;

    generate(mart, dataset)?;
    let main = generated(mart, dataset, "gene");
    assert_eq!(
        visible(mart, main),
        vec!["gene_id_key", "name", "xref_id", "label_1", "label_2"]
    );

    let joins: Vec<_> = mart.table(main).generated.as_ref().unwrap().chain.units()
        .iter()
        .filter_map(|unit| match unit {
            TransformationUnit::JoinTable(join) => Some(join),
            _ => None,
        })
        .collect();
    assert_eq!(joins.len(), 2);
    assert_eq!(
        joins.iter().map(|join| join.iteration).collect::<Vec<_>>(),
        vec![1, 2]
    );
    let internal: Vec<String> = joins
        .iter()
        .map(|join| mart.column(join.new_columns[0]).name().to_string())
        .collect();
    assert_ne!(internal[0], internal[1]);
    assert_eq!(
        internal[0].replace("_0__", "_1__"),
        internal[1],
        "sibling branches differ only by their visit number"
    );
    Ok(())
}

#[test]
fn pruning_drops_unreached_columns_and_their_mods() -> Result<()> {
    let (mut source, gene, relation) = gene_xref();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    generate(mart, dataset)?;

    let main = generated(mart, dataset, "gene");
    let label = mart
        .table(main)
        .columns()
        .find(|column| mart.column(*column).modified_name() == "label")
        .unwrap();
    let internal = mart.column(label).name().to_string();
    mart.rename_column(dataset, label, Some("xref_label".into()))?;
    generate(mart, dataset)?;
    assert!(visible(mart, main).contains(&"xref_label".to_string()));

    mart.set_relation_masked(dataset, "gene", relation, true)?;
    generate(mart, dataset)?;
    assert_eq!(visible(mart, main), vec!["gene_id_key", "name", "xref_id"]);
    assert_eq!(
        mart.dataset(dataset)?.mods.column_rename("gene", &internal),
        None
    );

    let chain = &mart.table(main).generated.as_ref().unwrap().chain;
    let columns: BTreeSet<_> = mart.table(main).columns().collect();
    assert_eq!(chain.introduced_columns(), columns);
    Ok(())
}

#[test]
fn visible_names_stay_unique() -> Result<()> {
    let mut source = Source::new();
    let xref = source.table("xref", &["xref_id", "name"], &["xref_id"]);
    let gene = source.table("gene", &["gene_id", "name", "xref_id"], &["gene_id"]);
    source.relate(xref, gene, &["xref_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;

    generate(mart, dataset)?;
    let names = visible(mart, generated(mart, dataset, "gene"));
    assert_eq!(names, vec!["gene_id_key", "name", "xref_id", "name_2"]);
    let unique: BTreeSet<_> = names.iter().collect();
    assert_eq!(unique.len(), names.len());
    validate_mart(mart)?;
    Ok(())
}

#[test]
fn loopback_walks_back_to_the_ancestor() -> Result<()> {
    let mut source = Source::new();
    let gene = source.table("gene", &["gene_id", "name"], &["gene_id"]);
    let homology = source.table(
        "homology",
        &["homology_id", "gene_id", "kind"],
        &["homology_id"],
    );
    let relation = source.relate(gene, homology, &["gene_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_relation_forced(dataset, "gene", relation, true)?;
    mart.set_relation_loopback(
        dataset,
        "gene",
        relation,
        Some(LoopbackDefinition {
            differentiator: Some("kind".into()),
        }),
    )?;

    generate(mart, dataset)?;
    let main = generated(mart, dataset, "gene");
    let chain = &mart.table(main).generated.as_ref().unwrap().chain;
    let joined: Vec<(TableId, Option<String>)> = chain
        .units()
        .iter()
        .filter_map(|unit| match unit {
            TransformationUnit::JoinTable(join) => Some((
                join.table,
                join.loopback_differentiator
                    .map(|column| mart.column(column).name().to_string()),
            )),
            _ => None,
        })
        .collect();
    assert_eq!(
        joined,
        vec![
            (homology, Some("kind".to_string())),
            (gene, None),
            (homology, Some("kind".to_string())),
            (gene, None),
        ]
    );
    assert_eq!(table_names(mart, dataset), vec!["gene"]);
    let names = visible(mart, main);
    assert!(names.contains(&"name_1".to_string()));
    assert!(names.contains(&"name_2".to_string()));
    Ok(())
}

#[test]
fn unrolled_relations_synthesize_an_id_name_pair() -> Result<()> {
    let mut source = Source::new();
    let term = source.table("term", &["term_id", "name"], &["term_id"]);
    let closure = source.table(
        "term_closure",
        &["closure_id", "parent_term_id", "distance"],
        &["closure_id"],
    );
    let relation = source.relate(term, closure, &["parent_term_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("term", term)?;
    mart.set_relation_unrolled(
        dataset,
        "term",
        relation,
        Some(UnrollDefinition {
            name_column: "name".into(),
            reversed: false,
        }),
    )?;

    generate(mart, dataset)?;
    assert_eq!(table_names(mart, dataset), vec!["term"]);
    let main = generated(mart, dataset, "term");
    assert_eq!(unit_labels(mart, main), vec!["select", "unroll"]);
    assert_eq!(
        visible(mart, main),
        vec![
            "term_id_key",
            "name",
            "parent_term_unrolled_id",
            "parent_term_unrolled_name"
        ]
    );
    Ok(())
}

#[test]
fn closure_tables_unroll_both_directions() -> Result<()> {
    let mut source = Source::new();
    let term = source.table("term", &["term_id", "name"], &["term_id"]);
    let closure = source.table(
        "term_closure",
        &["closure_id", "parent_term_id", "child_term_id"],
        &["closure_id"],
    );
    let parent = source.relate(term, closure, &["parent_term_id"]);
    let child = source.relate(term, closure, &["child_term_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("term", term)?;
    for relation in [parent, child] {
        mart.set_relation_unrolled(
            dataset,
            "term",
            relation,
            Some(UnrollDefinition {
                name_column: "name".into(),
                reversed: false,
            }),
        )?;
    }

    generate(mart, dataset)?;
    let main = generated(mart, dataset, "term");
    assert_eq!(unit_labels(mart, main), vec!["select", "unroll", "unroll"]);
    let names: BTreeSet<String> = visible(mart, main).into_iter().collect();
    let expected: BTreeSet<String> = [
        "term_id_key",
        "name",
        "parent_term_unrolled_id",
        "parent_term_unrolled_name",
        "child_term_unrolled_id",
        "child_term_unrolled_name",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(names, expected);
    validate_mart(mart)?;
    Ok(())
}

#[test]
fn queued_expressions_are_realized_once() -> Result<()> {
    let (mut source, gene, _) = gene_xref();
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.add_expression_column(
        dataset,
        "gene",
        "name_length",
        ExpressionDefinition::new("length(n)").with_alias("n", "name"),
    )?;
    mart.add_expression_column(
        dataset,
        "gene",
        "broken",
        ExpressionDefinition::new("upper(x)").with_alias("x", "missing"),
    )?;

    let report = generate(mart, dataset)?;
    assert_eq!(report.realized_pending, 2);
    assert!(mart.dataset(dataset)?.pending_expressions.is_empty());

    let main = generated(mart, dataset, "gene");
    let names = visible(mart, main);
    assert!(names.contains(&"name_length".to_string()));
    assert!(!names.contains(&"broken".to_string()));
    assert_eq!(unit_labels(mart, main).last(), Some(&"expression"));

    let name = mart
        .table(main)
        .columns()
        .find(|column| mart.column(*column).modified_name() == "name")
        .unwrap();
    assert!(mart.column(name).generated.as_ref().unwrap().expression_dependency);
    assert!(mart.set_column_masked(dataset, name, true).is_err());

    let again = generate(mart, dataset)?;
    assert_eq!(again.realized_pending, 0);
    assert!(visible(mart, main).contains(&"name_length".to_string()));
    Ok(())
}

#[test]
fn dimensions_can_walk_from_an_alternate_start() -> Result<()> {
    let (mut source, gene, transcript, _) = gene_transcript();
    let translation = source.table(
        "translation",
        &["translation_id", "transcript_id", "seq"],
        &["translation_id"],
    );
    source.relate(transcript, translation, &["transcript_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    mart.set_make_dimensions(dataset, true)?;
    generate(mart, dataset)?;

    let dimension = generated(mart, dataset, "gene__transcript__dm");
    assert_eq!(unit_labels(mart, dimension), vec!["select", "join"]);
    mart.set_transform_start(dataset, dimension, Some(translation))?;
    generate(mart, dataset)?;

    let main = generated(mart, dataset, "gene");
    let chain = &mart.table(dimension).generated.as_ref().unwrap().chain;
    let tables: Vec<Option<TableId>> = chain.units().iter().map(TransformationUnit::table).collect();
    assert_eq!(
        tables,
        vec![Some(translation), Some(transcript), Some(main)]
    );
    assert_eq!(unit_labels(mart, dimension), vec!["select", "join", "join"]);
    let names = visible(mart, dimension);
    assert!(names.contains(&"gene_id_key".to_string()));
    assert!(names.contains(&"seq".to_string()));
    Ok(())
}

#[test]
fn replicas_keep_dimension_masks_and_alternate_starts() -> Result<()> {
    let (mut source, gene, transcript, _) = gene_transcript();
    let translation = source.table(
        "translation",
        &["translation_id", "transcript_id", "seq"],
        &["translation_id"],
    );
    source.relate(transcript, translation, &["transcript_id"]);
    let mart = &mut source.mart;
    let dataset = mart.add_dataset("gene", gene)?;
    generate(mart, dataset)?;

    let dimension = generated(mart, dataset, "gene__transcript__dm");
    mart.set_dimension_masked(dataset, dimension, true)?;
    mart.set_transform_start(dataset, dimension, Some(translation))?;
    generate(mart, dataset)?;

    let replica = mart.replicate_dataset(dataset, "gene2")?;
    generate(mart, replica)?;
    assert_eq!(
        table_names(mart, replica),
        vec!["gene2", "gene2__transcript__dm"]
    );
    let copied = generated(mart, replica, "gene2__transcript__dm");
    assert!(mart.table(copied).masked);
    let chain = &mart.table(copied).generated.as_ref().unwrap().chain;
    assert_eq!(chain.units()[0].table(), Some(translation));
    assert_eq!(unit_labels(mart, copied), vec!["select", "join", "join"]);
    Ok(())
}
