use anyhow::Result;
use martforge_introspect::{MemorySource, RowSource, SchemaScope, SourceIntrospector};

fn source() -> MemorySource {
    MemorySource::new()
        .with_table("public", "gene", &["gene_id", "species", "name"])
        .with_primary_key("public", "gene", &["gene_id", "species"])
        .with_table("public", "transcript", &["transcript_id", "gene_id", "species"])
        .with_foreign_key(
            "public",
            "transcript",
            &["gene_id", "species"],
            ("public", "gene"),
            &["gene_id", "species"],
        )
        .with_table("other", "xref", &["gene_id", "species"])
        .with_foreign_key(
            "other",
            "xref",
            &["gene_id", "species"],
            ("public", "gene"),
            &["gene_id", "species"],
        )
        .with_rows(
            "public",
            "gene",
            vec![
                vec![Some("1"), Some("hs"), Some("BRCA2")],
                vec![Some("2"), Some("mm"), None],
                vec![Some("3"), Some("hs"), Some("TP53")],
            ],
        )
}

#[tokio::test]
async fn exported_keys_are_grouped_by_sequence() -> Result<()> {
    let source = source();
    let keys = source
        .list_exported_keys(&SchemaScope::new("public"), "gene")
        .await?;

    let summary: Vec<(&str, &str, &str, u16)> = keys
        .iter()
        .map(|key| {
            (
                key.fk_schema.as_str(),
                key.fk_table.as_str(),
                key.fk_column.as_str(),
                key.key_seq,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("other", "xref", "gene_id", 1),
            ("other", "xref", "species", 2),
            ("public", "transcript", "gene_id", 1),
            ("public", "transcript", "species", 2),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn distinct_values_are_sorted_and_bounded() -> Result<()> {
    let source = source();
    let scope = SchemaScope::new("public");
    let values = source
        .distinct_values(&scope, "gene", &["species".to_string()], 10)
        .await?;
    assert_eq!(
        values,
        vec![vec![Some("hs".to_string())], vec![Some("mm".to_string())]]
    );

    let first = source
        .first_rows(&scope, "gene", &["name".to_string()], 2)
        .await?;
    assert_eq!(first, vec![vec![Some("BRCA2".to_string())], vec![None]]);
    Ok(())
}

#[tokio::test]
async fn dropped_columns_take_their_keys_with_them() -> Result<()> {
    let mut source = source();
    source.drop_column("public", "gene", "species");
    let scope = SchemaScope::new("public");

    assert!(source.list_primary_key(&scope, "gene").await?.is_empty());
    assert_eq!(
        source.list_columns(&scope, "gene").await?,
        vec!["gene_id".to_string(), "name".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn injected_failures_surface_as_database_errors() {
    let source = source().failing("connection refused");
    let err = source
        .list_tables(&SchemaScope::new("public"))
        .await
        .unwrap_err();
    assert!(matches!(err, martforge_core::Error::Db(_)));
}
