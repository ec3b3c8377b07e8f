//! Keys that reference columns the source no longer has.

use std::fmt;

use serde::Serialize;

/// One key column that disappeared from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanEntry {
    pub table: String,
    pub key: String,
    pub column: String,
    pub relations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub entries: Vec<OrphanEntry>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for OrphanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(
                f,
                "{}: key {} references missing column {}",
                entry.table, entry.key, entry.column
            )?;
            for relation in &entry.relations {
                writeln!(f, "  used by {relation}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanDecision {
    /// Delete the orphaned keys and their relations, then continue.
    Proceed,
    /// Stop synchronization without changing anything.
    Abort,
}

/// Decides what happens to orphaned keys. Called at most once per
/// synchronization, only when the report is non-empty.
pub trait OrphanConfirmation {
    fn confirm(&self, report: &OrphanReport) -> OrphanDecision;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

impl OrphanConfirmation for AlwaysProceed {
    fn confirm(&self, _report: &OrphanReport) -> OrphanDecision {
        OrphanDecision::Proceed
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAbort;

impl OrphanConfirmation for AlwaysAbort {
    fn confirm(&self, _report: &OrphanReport) -> OrphanDecision {
        OrphanDecision::Abort
    }
}
