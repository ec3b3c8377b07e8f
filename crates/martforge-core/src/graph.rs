use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Mart, SchemaId};

/// Size of a schema's relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RelationGraphSummary {
    pub tables: usize,
    pub relations: usize,
}

/// Dependency order of a schema's tables: "one" ends before "many" ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RelationGraphReport {
    pub summary: RelationGraphSummary,
    pub topo_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Build a deterministic relation report for one schema. Relations marked
/// incorrect and relations leaving the schema are ignored.
pub fn build_relation_graph_report(mart: &Mart, schema: SchemaId) -> RelationGraphReport {
    let graph = relation_adjacency(mart, schema);
    let summary = RelationGraphSummary {
        tables: graph.len(),
        relations: graph.values().map(BTreeSet::len).sum(),
    };

    match dependency_order(&graph) {
        Ok(order) => RelationGraphReport {
            summary,
            topo_order: Some(order),
            cycle: None,
        },
        Err(cycle) => RelationGraphReport {
            summary,
            topo_order: None,
            cycle: Some(cycle),
        },
    }
}

fn relation_adjacency(mart: &Mart, schema: SchemaId) -> BTreeMap<String, BTreeSet<String>> {
    let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let Some(owner) = mart.get_schema(schema) else {
        return graph;
    };

    for table in owner.tables() {
        graph.entry(mart.qualified_table_name(table)).or_default();
    }
    for relation in mart.relations() {
        if relation.status.is_incorrect() {
            continue;
        }
        let one = mart.key(relation.first_key()).table();
        let many = mart.key(relation.second_key()).table();
        if mart.table(one).schema() != schema || mart.table(many).schema() != schema {
            continue;
        }
        graph
            .entry(mart.qualified_table_name(one))
            .or_default()
            .insert(mart.qualified_table_name(many));
    }
    graph
}

/// Kahn's algorithm over name-ordered sets, so ties break alphabetically.
/// On a cycle, returns the tables that could not be ordered.
fn dependency_order(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> = graph.keys().map(|node| (node.as_str(), 0)).collect();
    for targets in graph.values() {
        for target in targets {
            *indegree.entry(target.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_first() {
        order.push(node.to_string());
        for target in graph.get(node).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(target.as_str()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert(target.as_str());
                }
            }
        }
    }

    if order.len() == indegree.len() {
        Ok(order)
    } else {
        Err(indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(node, _)| node.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceSettings;
    use crate::status::{Cardinality, ComponentStatus, KeyKind};

    fn link(mart: &mut Mart, one: crate::model::TableId, many: crate::model::TableId, column: &str) {
        let pk_column = match mart.find_column(one, "id") {
            Some(column) => column,
            None => mart.add_column(one, "id").unwrap(),
        };
        let pk = match mart.table(one).primary_key() {
            Some(pk) => pk,
            None => mart
                .add_key(one, KeyKind::Primary, vec![pk_column], ComponentStatus::Inferred)
                .unwrap(),
        };
        let fk_column = mart.add_column(many, column).unwrap();
        let fk = mart
            .add_key(many, KeyKind::Foreign, vec![fk_column], ComponentStatus::Inferred)
            .unwrap();
        mart.add_relation(pk, fk, Cardinality::Many, ComponentStatus::Inferred)
            .unwrap();
    }

    #[test]
    fn one_ends_come_first() {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("src", SourceSettings::new("public"))
            .unwrap();
        let orders = mart.add_table(schema, "orders").unwrap();
        let users = mart.add_table(schema, "users").unwrap();
        link(&mut mart, users, orders, "user_id");

        let report = build_relation_graph_report(&mart, schema);
        assert_eq!(report.summary.relations, 1);
        assert_eq!(
            report.topo_order,
            Some(vec!["src.users".to_string(), "src.orders".to_string()])
        );
    }

    #[test]
    fn cycles_are_reported() {
        let mut mart = Mart::new();
        let schema = mart
            .add_source_schema("src", SourceSettings::new("public"))
            .unwrap();
        let a = mart.add_table(schema, "a").unwrap();
        let b = mart.add_table(schema, "b").unwrap();
        let c = mart.add_table(schema, "c").unwrap();
        link(&mut mart, a, b, "a_id");
        link(&mut mart, b, a, "b_id");
        link(&mut mart, b, c, "b_id");

        let report = build_relation_graph_report(&mart, schema);
        assert!(report.topo_order.is_none());
        let cycle = report.cycle.unwrap();
        assert!(cycle.contains(&"src.a".to_string()));
        assert!(cycle.contains(&"src.b".to_string()));
    }
}
