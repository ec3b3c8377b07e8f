//! Source schema synchronization: mirror tables, columns and keys from a
//! database into the model and infer the relations between them.

pub mod guess;
pub mod keys;
pub mod metadata;
pub mod orphans;
pub mod report;
pub mod synchronize;

pub use guess::{GuessingKeyInference, guess_primary_key};
pub use keys::{InferenceContext, KeyInference};
pub use metadata::{MetadataKeyInference, group_exported_keys};
pub use orphans::{
    AlwaysAbort, AlwaysProceed, OrphanConfirmation, OrphanDecision, OrphanEntry, OrphanReport,
};
pub use report::SyncReport;
pub use synchronize::synchronize;
