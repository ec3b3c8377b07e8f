//! Dataset generation: the compiler that turns a source table and its
//! dataset's mods into generated tables, partition row loading, resync
//! orchestration and the summary handed to DDL generators.

pub mod compiler;
pub mod partition;
pub mod resync;
pub mod summary;

pub use compiler::naming::{CLASH_SUFFIX, DIMENSION_SUFFIX, KEY_SUFFIX};
pub use compiler::{GenerationReport, generate};
pub use partition::load_partition_rows;
pub use resync::{ResyncContext, ResyncReport, resync};
pub use summary::{
    ColumnSummary, DatasetSummary, ForeignKeySummary, SUMMARY_VERSION, TableSummary, UnitSummary,
    summarize_dataset,
};
