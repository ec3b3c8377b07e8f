use martforge_core::{
    ApplicationRow, ApplicationTarget, Cardinality, ComponentStatus, CompoundDefinition,
    DATASET_WIDE, KeyKind, Mart, ModProperty, ModValue, PartitionApplication, SchemaId,
    SourceSettings, TableId,
};
use pretty_assertions::assert_eq;

struct Source {
    mart: Mart,
    gene: TableId,
    species: TableId,
    relation: martforge_core::RelationId,
}

fn source() -> Source {
    let mut mart = Mart::new();
    let schema = mart
        .add_source_schema("ens", SourceSettings::new("public"))
        .unwrap();
    let gene = mart.add_table(schema, "gene").unwrap();
    let gene_id = mart.add_column(gene, "gene_id").unwrap();
    let transcript = mart.add_table(schema, "transcript").unwrap();
    let transcript_gene = mart.add_column(transcript, "gene_id").unwrap();
    let species = mart.add_table(schema, "species").unwrap();
    mart.add_column(species, "code").unwrap();

    let pk = mart
        .add_key(gene, KeyKind::Primary, vec![gene_id], ComponentStatus::Inferred)
        .unwrap();
    let fk = mart
        .add_key(
            transcript,
            KeyKind::Foreign,
            vec![transcript_gene],
            ComponentStatus::Inferred,
        )
        .unwrap();
    let relation = mart
        .add_relation(pk, fk, Cardinality::Many, ComponentStatus::Inferred)
        .unwrap();
    Source {
        mart,
        gene,
        species,
        relation,
    }
}

fn queue_application(mart: &mut Mart, dataset: SchemaId) {
    mart.apply_partition_table(PartitionApplication {
        partition_table: "species".into(),
        target: ApplicationTarget::DatasetTable {
            dataset,
            table: "genes__transcript__dm".into(),
        },
        rows: vec![ApplicationRow {
            partition_column: "code".into(),
            relation: None,
            name_column: "code".into(),
            compound: 0,
        }],
    })
    .unwrap();
}

#[test]
fn replicas_copy_policy_under_the_new_name() {
    let Source {
        mut mart,
        gene,
        species,
        relation,
    } = source();
    mart.add_source_partition_table("species", species, vec!["code".into()])
        .unwrap();
    let dataset = mart.add_dataset("genes", gene).unwrap();
    mart.set_relation_compound(dataset, "genes", relation, Some(CompoundDefinition::new(3)))
        .unwrap();
    mart.set_relation_masked(dataset, DATASET_WIDE, relation, true)
        .unwrap();
    queue_application(&mut mart, dataset);

    let replica = mart.replicate_dataset(dataset, "genes_copy").unwrap();
    let copy = mart.dataset(replica).unwrap();
    let name = mart.relation_name(relation);

    assert_eq!(copy.central_table(), gene);
    assert_eq!(
        copy.mods.value("genes_copy", ModProperty::RelationCompound, &name),
        Some(&ModValue::Compound(CompoundDefinition::new(3)))
    );
    assert!(copy.mods.is_relation_masked("genes_copy__anything", &name));
    assert!(!copy.mods.contains("genes", ModProperty::RelationCompound, &name));
    assert_eq!(
        copy.pending_applications[0].target,
        ApplicationTarget::DatasetTable {
            dataset: replica,
            table: "genes_copy__transcript__dm".into(),
        }
    );

    // The original keeps its own, independent copy.
    mart.set_relation_compound(dataset, "genes", relation, None)
        .unwrap();
    assert!(mart.dataset(replica).unwrap().mods.compound("genes_copy", &name).is_some());
}

#[test]
fn removing_a_source_schema_removes_dependent_datasets() {
    let Source { mut mart, gene, .. } = source();
    let dataset = mart.add_dataset("genes", gene).unwrap();
    let source = mart.table(gene).schema();

    mart.remove_schema(source).unwrap();
    assert!(mart.get_schema(dataset).is_none());
    assert!(mart.get_table(gene).is_none());
    assert_eq!(mart.relations().count(), 0);
}

#[test]
fn dataset_names_are_validated() {
    let Source { mut mart, gene, .. } = source();
    assert!(mart.add_dataset("bad__name", gene).is_err());
    mart.add_dataset("genes", gene).unwrap();
    assert!(mart.add_dataset("genes", gene).is_err());
    assert!(mart.add_dataset("ens", gene).is_err());
}

#[test]
fn mod_values_serialize_with_a_kind_tag() {
    let value = ModValue::Compound(CompoundDefinition::new(2));
    let json = serde_json::to_value(&value).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "kind": "compound", "count": 2, "parallel": false })
    );
}
