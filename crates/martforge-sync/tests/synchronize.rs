use pretty_assertions::assert_eq;

use martforge_core::{
    Cardinality, ComponentStatus, Error, KeyKind, Mart, Result, SchemaId, SourceSettings,
};
use martforge_introspect::MemorySource;
use martforge_sync::{AlwaysAbort, AlwaysProceed, synchronize};

fn ensembl() -> MemorySource {
    MemorySource::new()
        .with_table("public", "gene", &["gene_id", "name", "biotype"])
        .with_primary_key("public", "gene", &["gene_id"])
        .with_table("public", "transcript", &["transcript_id", "gene_id", "length"])
        .with_primary_key("public", "transcript", &["transcript_id"])
        .with_foreign_key(
            "public",
            "transcript",
            &["gene_id"],
            ("public", "gene"),
            &["gene_id"],
        )
}

fn workspace(settings: SourceSettings) -> (Mart, SchemaId) {
    let mut mart = Mart::new();
    let schema = mart.add_source_schema("ens", settings).unwrap();
    (mart, schema)
}

async fn sync(mart: &mut Mart, schema: SchemaId, source: &MemorySource) -> Result<()> {
    synchronize(mart, schema, source, &AlwaysProceed, &mut |_| {}).await?;
    Ok(())
}

#[tokio::test]
async fn mirrors_tables_keys_and_relations() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut progress = Vec::new();
    let report = synchronize(&mut mart, schema, &ensembl(), &AlwaysProceed, &mut |value| {
        progress.push(value)
    })
    .await?;

    assert_eq!(report.tables_added, vec!["gene", "transcript"]);
    assert_eq!(report.keys_created, 3);
    assert_eq!(report.relations_created, 1);
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));

    let relations: Vec<_> = mart.relations().collect();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].cardinality, Cardinality::Many);
    assert_eq!(relations[0].status, ComponentStatus::Inferred);
    assert_eq!(
        mart.relation_name(relations[0].id()),
        "ens.gene(gene_id)->ens.transcript(gene_id)"
    );
    assert!(!mart.schema(schema).is_dirty());
    Ok(())
}

#[tokio::test]
async fn second_run_changes_nothing() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let source = ensembl();
    sync(&mut mart, schema, &source).await?;
    let report = synchronize(&mut mart, schema, &source, &AlwaysProceed, &mut |_| {}).await?;
    assert!(report.is_unchanged());
    Ok(())
}

#[tokio::test]
async fn handmade_relations_survive_and_are_confirmed_when_reported() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut source = ensembl();
    source.drop_foreign_keys("public", "transcript");
    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.relations().count(), 0);

    let gene = mart.find_table(schema, "gene").unwrap();
    let transcript = mart.find_table(schema, "transcript").unwrap();
    let pk = mart.table(gene).primary_key().unwrap();
    let column = mart.find_column(transcript, "gene_id").unwrap();
    let fk = mart.add_key(transcript, KeyKind::Foreign, vec![column], ComponentStatus::Handmade)?;
    let relation = mart.add_relation(pk, fk, Cardinality::Many, ComponentStatus::Handmade)?;

    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.relation(relation).status, ComponentStatus::Handmade);
    assert_eq!(mart.key(fk).status, ComponentStatus::Handmade);

    sync(&mut mart, schema, &ensembl()).await?;
    assert_eq!(mart.relations().count(), 1);
    assert_eq!(mart.relation(relation).status, ComponentStatus::Inferred);
    assert_eq!(mart.key(fk).status, ComponentStatus::Inferred);
    Ok(())
}

#[tokio::test]
async fn user_cardinality_is_kept_as_modified() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let source = ensembl();
    sync(&mut mart, schema, &source).await?;

    let relation = mart.relations().next().unwrap().id();
    mart.set_relation_cardinality(relation, Cardinality::One);
    sync(&mut mart, schema, &source).await?;

    let relation = mart.relation(relation);
    assert_eq!(relation.cardinality, Cardinality::One);
    assert_eq!(relation.status, ComponentStatus::Modified);
    assert_eq!(relation.original_cardinality, Some(Cardinality::Many));
    Ok(())
}

#[tokio::test]
async fn incorrect_relations_are_not_promoted() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let source = ensembl();
    sync(&mut mart, schema, &source).await?;

    let relation = mart.relations().next().unwrap().id();
    mart.set_relation_status(relation, ComponentStatus::InferredIncorrect);
    let report = synchronize(&mut mart, schema, &source, &AlwaysProceed, &mut |_| {}).await?;

    assert_eq!(report.relations_created, 0);
    assert_eq!(mart.relation(relation).status, ComponentStatus::InferredIncorrect);
    Ok(())
}

#[tokio::test]
async fn aborting_on_orphans_leaves_the_model_untouched() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut source = ensembl();
    sync(&mut mart, schema, &source).await?;

    source.drop_column("public", "transcript", "gene_id");
    let err = synchronize(&mut mart, schema, &source, &AlwaysAbort, &mut |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Aborted(_)));
    let transcript = mart.find_table(schema, "transcript").unwrap();
    assert!(mart.find_column(transcript, "gene_id").is_some());
    assert_eq!(mart.relations().count(), 1);
    Ok(())
}

#[tokio::test]
async fn proceeding_on_orphans_drops_keys_and_columns() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut source = ensembl();
    sync(&mut mart, schema, &source).await?;

    source.drop_column("public", "transcript", "gene_id");
    let report = synchronize(&mut mart, schema, &source, &AlwaysProceed, &mut |_| {}).await?;

    assert_eq!(report.orphans.entries.len(), 1);
    assert_eq!(report.orphans.entries[0].column, "gene_id");
    assert_eq!(
        report.orphans.entries[0].relations,
        vec!["ens.gene(gene_id)->ens.transcript(gene_id)"]
    );
    assert_eq!(report.columns_removed, vec!["transcript.gene_id"]);
    assert_eq!(mart.relations().count(), 0);
    Ok(())
}

#[tokio::test]
async fn vanished_tables_are_dropped() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut source = ensembl();
    sync(&mut mart, schema, &source).await?;

    source.drop_table("public", "transcript");
    let report = synchronize(&mut mart, schema, &source, &AlwaysProceed, &mut |_| {}).await?;

    assert_eq!(report.tables_removed, vec!["transcript"]);
    assert!(mart.find_table(schema, "transcript").is_none());
    assert_eq!(mart.relations().count(), 0);
    Ok(())
}

#[tokio::test]
async fn handmade_primary_key_survives_when_source_has_none() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let mut source = ensembl();
    source.set_primary_key("public", "transcript", &[]);
    sync(&mut mart, schema, &source).await?;

    let transcript = mart.find_table(schema, "transcript").unwrap();
    assert!(mart.table(transcript).primary_key().is_none());
    let column = mart.find_column(transcript, "transcript_id").unwrap();
    let pk = mart.add_key(transcript, KeyKind::Primary, vec![column], ComponentStatus::Handmade)?;

    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.table(transcript).primary_key(), Some(pk));
    assert_eq!(mart.key(pk).status, ComponentStatus::Handmade);
    Ok(())
}

#[tokio::test]
async fn guessing_derives_keys_from_column_names() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public").with_key_guessing(true));
    let source = MemorySource::new()
        .with_table("public", "gene", &["gene_id", "name"])
        .with_table("public", "transcript", &["transcript_id", "gene_id"])
        .with_table("public", "gene_extra", &["gene_id", "note"]);
    sync(&mut mart, schema, &source).await?;

    let gene = mart.find_table(schema, "gene").unwrap();
    let extra = mart.find_table(schema, "gene_extra").unwrap();
    let pk = mart.table(gene).primary_key().unwrap();
    assert_eq!(mart.key_label(pk), "ens.gene(gene_id)");
    assert!(mart.table(extra).primary_key().is_none());

    let mut names: Vec<String> = mart
        .relations()
        .map(|relation| mart.relation_name(relation.id()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "ens.gene(gene_id)->ens.gene_extra(gene_id)",
            "ens.gene(gene_id)->ens.transcript(gene_id)",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn guessing_keeps_handmade_keys_it_cannot_rediscover() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public").with_key_guessing(true));
    let source = MemorySource::new()
        .with_table("public", "gene", &["gene_id", "name", "display_xref"])
        .with_table("public", "xref", &["xref_id", "label"])
        .with_table("public", "transcript", &["transcript_id", "gene_id"])
        .with_table("public", "gene_extra", &["gene_id", "note"]);
    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.relations().count(), 2);

    let gene = mart.find_table(schema, "gene").unwrap();
    let xref = mart.find_table(schema, "xref").unwrap();
    let extra = mart.find_table(schema, "gene_extra").unwrap();
    let display = mart.find_column(gene, "display_xref").unwrap();
    let xref_pk = mart.table(xref).primary_key().unwrap();
    let fk = mart.add_key(gene, KeyKind::Foreign, vec![display], ComponentStatus::Handmade)?;
    let relation = mart.add_relation(xref_pk, fk, Cardinality::Many, ComponentStatus::Handmade)?;
    let note = mart.find_column(extra, "note").unwrap();
    let extra_pk = mart.add_key(extra, KeyKind::Primary, vec![note], ComponentStatus::Handmade)?;

    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.relation(relation).status, ComponentStatus::Handmade);
    assert_eq!(mart.key(fk).status, ComponentStatus::Handmade);
    assert_eq!(mart.table(extra).primary_key(), Some(extra_pk));
    assert_eq!(mart.key(extra_pk).status, ComponentStatus::Handmade);

    let mut names: Vec<String> = mart
        .relations()
        .map(|relation| mart.relation_name(relation.id()))
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "ens.gene(gene_id)->ens.gene_extra(gene_id)",
            "ens.gene(gene_id)->ens.transcript(gene_id)",
            "ens.xref(xref_id)->ens.gene(display_xref)",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn partitions_record_where_tables_were_found() -> Result<()> {
    let settings = SourceSettings::new("public")
        .with_partition("hs_core", "hs")
        .with_partition("mm_core", "mm");
    let (mut mart, schema) = workspace(settings);
    let source = MemorySource::new()
        .with_table("hs_core", "gene", &["gene_id", "name"])
        .with_primary_key("hs_core", "gene", &["gene_id"])
        .with_table("mm_core", "gene", &["gene_id", "name", "strain"])
        .with_primary_key("mm_core", "gene", &["gene_id"])
        .with_table("hs_core", "variation", &["variation_id"]);
    sync(&mut mart, schema, &source).await?;

    let gene = mart.find_table(schema, "gene").unwrap();
    let variation = mart.find_table(schema, "variation").unwrap();
    assert!(mart.table(gene).in_partition("mm"));
    assert!(!mart.table(variation).in_partition("mm"));
    let strain = mart.find_column(gene, "strain").unwrap();
    assert!(mart.column(strain).in_partition("mm"));
    assert!(!mart.column(strain).in_partition("hs"));
    Ok(())
}

#[tokio::test]
async fn datasets_are_flagged_after_synchronization() -> Result<()> {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let source = ensembl();
    sync(&mut mart, schema, &source).await?;

    let gene = mart.find_table(schema, "gene").unwrap();
    let dataset = mart.add_dataset("genes", gene)?;
    mart.clear_dirty(dataset);
    sync(&mut mart, schema, &source).await?;
    assert_eq!(mart.dirty_datasets(), vec![dataset]);
    Ok(())
}

#[tokio::test]
async fn source_failures_propagate() {
    let (mut mart, schema) = workspace(SourceSettings::new("public"));
    let source = ensembl().failing("connection refused");
    let err = synchronize(&mut mart, schema, &source, &AlwaysProceed, &mut |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Db(_)));
    assert_eq!(mart.schema(schema).table_count(), 0);
}
