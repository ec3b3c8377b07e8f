/// Options that control which relations the Postgres adapter lists.
#[derive(Debug, Clone)]
pub struct IntrospectOptions {
    pub include_views: bool,
    pub include_materialized_views: bool,
    pub include_foreign_tables: bool,
}

impl Default for IntrospectOptions {
    fn default() -> Self {
        Self {
            include_views: true,
            include_materialized_views: true,
            include_foreign_tables: true,
        }
    }
}

impl IntrospectOptions {
    /// `pg_class.relkind` codes to list.
    pub fn relkinds(&self) -> Vec<String> {
        let mut kinds = vec!["r".to_string(), "p".to_string()];
        if self.include_views {
            kinds.push("v".to_string());
        }
        if self.include_materialized_views {
            kinds.push("m".to_string());
        }
        if self.include_foreign_tables {
            kinds.push("f".to_string());
        }
        kinds
    }
}
