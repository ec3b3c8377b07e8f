use serde::Serialize;

use crate::orphans::OrphanReport;

/// What one synchronization changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub tables_added: Vec<String>,
    pub tables_removed: Vec<String>,
    /// `table.column`
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
    pub keys_created: usize,
    pub keys_removed: usize,
    pub relations_created: usize,
    pub relations_removed: usize,
    pub orphans: OrphanReport,
}

impl SyncReport {
    /// True when the source matched the model exactly.
    pub fn is_unchanged(&self) -> bool {
        self.tables_added.is_empty()
            && self.tables_removed.is_empty()
            && self.columns_added.is_empty()
            && self.columns_removed.is_empty()
            && self.keys_created == 0
            && self.keys_removed == 0
            && self.relations_created == 0
            && self.relations_removed == 0
    }
}
