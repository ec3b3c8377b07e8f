use pretty_assertions::assert_eq;

use martforge_compile::{ResyncContext, load_partition_rows, resync, summarize_dataset};
use martforge_core::{
    ApplicationRow, ApplicationTarget, Error, Mart, PartitionApplication, Result, SchemaId,
    SourceSettings, TableId,
};
use martforge_introspect::MemorySource;
use martforge_sync::{AlwaysProceed, synchronize};

fn ensembl() -> MemorySource {
    MemorySource::new()
        .with_table("public", "gene", &["gene_id", "name", "xref_id"])
        .with_primary_key("public", "gene", &["gene_id"])
        .with_table("public", "xref", &["xref_id", "label"])
        .with_primary_key("public", "xref", &["xref_id"])
        .with_foreign_key("public", "gene", &["xref_id"], ("public", "xref"), &["xref_id"])
        .with_table("public", "species", &["species_id", "prefix"])
        .with_primary_key("public", "species", &["species_id"])
        .with_rows(
            "public",
            "species",
            vec![
                vec![Some("2"), Some("mm")],
                vec![Some("1"), Some("hs")],
                vec![Some("3"), Some("hs")],
            ],
        )
}

struct Workspace {
    mart: Mart,
    source: SchemaId,
    dataset: SchemaId,
    gene: TableId,
}

async fn workspace(source: &MemorySource) -> Result<Workspace> {
    let mut mart = Mart::new();
    let schema = mart.add_source_schema("ens", SourceSettings::new("public"))?;
    synchronize(&mut mart, schema, source, &AlwaysProceed, &mut |_| {}).await?;
    let gene = mart.find_table(schema, "gene").unwrap();
    let dataset = mart.add_dataset("gene", gene)?;
    Ok(Workspace {
        mart,
        source: schema,
        dataset,
        gene,
    })
}

fn context(source: &MemorySource) -> ResyncContext<'_> {
    ResyncContext {
        source,
        rows: source,
        confirmation: &AlwaysProceed,
    }
}

fn visible(mart: &Mart, dataset: SchemaId, table: &str) -> Vec<String> {
    let table = mart.find_table(dataset, table).unwrap();
    mart.table(table)
        .columns()
        .map(|column| mart.column(column).modified_name().to_string())
        .collect()
}

/// Partition the gene->xref relation of the main table by species prefix.
fn partition_by_species(workspace: &mut Workspace) -> Result<()> {
    let mart = &mut workspace.mart;
    let species = mart.find_table(workspace.source, "species").unwrap();
    mart.add_source_partition_table("species", species, vec!["prefix".into()])?;
    let relation = mart.relations_of_table(workspace.gene)[0];
    mart.apply_partition_table(PartitionApplication {
        partition_table: "species".into(),
        target: ApplicationTarget::DatasetTable {
            dataset: workspace.dataset,
            table: "gene".into(),
        },
        rows: vec![ApplicationRow {
            partition_column: "prefix".into(),
            relation: Some(mart.relation_name(relation)),
            name_column: "prefix".into(),
            compound: 0,
        }],
    })
}

#[tokio::test]
async fn partition_rows_compound_the_relation_per_value() -> Result<()> {
    let source = ensembl();
    let mut workspace = workspace(&source).await?;
    partition_by_species(&mut workspace)?;
    assert_eq!(workspace.mart.dataset(workspace.dataset)?.pending_applications.len(), 1);

    let report = resync(&mut workspace.mart, &context(&source)).await?;
    assert!(!report.deferred);
    assert!(report.synchronized.is_empty());
    assert_eq!(report.partitions_loaded, vec!["species"]);
    assert_eq!(report.generated["gene"].realized_pending, 1);

    let mart = &workspace.mart;
    assert_eq!(
        visible(mart, workspace.dataset, "gene"),
        vec!["gene_id_key", "name", "xref_id", "hs_label", "mm_label"]
    );
    let summary = summarize_dataset(mart, workspace.dataset)?;
    let main = &summary.tables[0];
    let values: Vec<Option<String>> = main
        .units
        .iter()
        .filter(|unit| unit.kind == "join")
        .map(|unit| unit.partition_value.clone())
        .collect();
    assert_eq!(values, vec![Some("hs".to_string()), Some("mm".to_string())]);
    assert_eq!(
        main.partition.as_ref().map(|application| application.partition_table.as_str()),
        Some("species")
    );
    assert!(!mart.needs_resync());
    Ok(())
}

#[tokio::test]
async fn resync_waits_for_the_outermost_transaction() -> Result<()> {
    let source = ensembl();
    let mut workspace = workspace(&source).await?;
    let mart = &mut workspace.mart;

    mart.begin_transaction();
    mart.begin_transaction();
    mart.set_make_dimensions(workspace.dataset, false)?;
    assert!(!mart.end_transaction());
    let report = resync(mart, &context(&source)).await?;
    assert!(report.deferred);
    assert!(report.generated.is_empty());
    assert_eq!(mart.schema(workspace.dataset).table_count(), 0);

    assert!(mart.end_transaction());
    let report = resync(mart, &context(&source)).await?;
    assert!(!report.deferred);
    assert_eq!(report.generated.keys().collect::<Vec<_>>(), vec!["gene"]);
    assert_eq!(
        visible(mart, workspace.dataset, "gene"),
        vec!["gene_id_key", "name", "xref_id", "label"]
    );
    Ok(())
}

#[tokio::test]
async fn source_changes_flow_into_generated_tables() -> Result<()> {
    let mut source = ensembl();
    let mut workspace = workspace(&source).await?;
    partition_by_species(&mut workspace)?;
    resync(&mut workspace.mart, &context(&source)).await?;

    source.drop_column("public", "xref", "label");
    workspace.mart.mark_dirty(workspace.source);
    let report = resync(&mut workspace.mart, &context(&source)).await?;

    assert_eq!(report.synchronized["ens"].columns_removed, vec!["xref.label"]);
    assert_eq!(report.partitions_loaded, vec!["species"], "stale rows are reloaded");
    assert_eq!(
        visible(&workspace.mart, workspace.dataset, "gene"),
        vec!["gene_id_key", "name", "xref_id"]
    );
    Ok(())
}

#[tokio::test]
async fn dropping_the_central_table_is_a_data_model_error() -> Result<()> {
    let mut source = ensembl();
    let mut workspace = workspace(&source).await?;
    resync(&mut workspace.mart, &context(&source)).await?;

    source.drop_table("public", "gene");
    workspace.mart.mark_dirty(workspace.source);
    let err = resync(&mut workspace.mart, &context(&source)).await.unwrap_err();
    assert!(matches!(err, Error::DataModel(_)));
    assert!(workspace.mart.get_table(workspace.gene).is_none());

    let err = summarize_dataset(&workspace.mart, workspace.dataset).unwrap_err();
    assert!(matches!(err, Error::DataModel(_)));

    workspace.mart.remove_dataset(workspace.dataset)?;
    let report = resync(&mut workspace.mart, &context(&source)).await?;
    assert!(report.generated.is_empty());
    assert!(!workspace.mart.needs_resync());
    Ok(())
}

#[tokio::test]
async fn partition_loading_reports_source_failures() -> Result<()> {
    let source = ensembl();
    let mut workspace = workspace(&source).await?;
    partition_by_species(&mut workspace)?;

    let broken = MemorySource::new().failing("connection reset");
    let err = load_partition_rows(&mut workspace.mart, "species", &broken)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Partition(_)));

    let rows = load_partition_rows(&mut workspace.mart, "species", &source).await?;
    assert_eq!(rows, 2);
    let cached = load_partition_rows(&mut workspace.mart, "species", &broken).await?;
    assert_eq!(cached, 2);
    Ok(())
}
