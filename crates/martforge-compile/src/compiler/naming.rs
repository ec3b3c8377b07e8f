//! Generated table and column names.

use std::collections::BTreeSet;

use martforge_core::NAME_SEPARATOR;

/// Appended to the visible name of columns taking part in a key.
pub const KEY_SUFFIX: &str = "_key";
/// Appended to an inherited column whose name a new column already took.
pub const CLASH_SUFFIX: &str = "_clash";
/// Last segment of dimension table names.
pub const DIMENSION_SUFFIX: &str = "dm";

fn iteration_suffix(iteration: usize) -> String {
    if iteration == 0 {
        String::new()
    } else {
        format!("_{iteration}")
    }
}

/// `parent__table`, plus `_n` for compounded iterations.
pub fn subclass_table_name(parent: &str, table: &str, iteration: usize) -> String {
    format!(
        "{parent}{NAME_SEPARATOR}{table}{}",
        iteration_suffix(iteration)
    )
}

/// `parent__table__dm`, plus `_n` for compounded iterations.
pub fn dimension_table_name(parent: &str, table: &str, iteration: usize) -> String {
    format!(
        "{parent}{NAME_SEPARATOR}{table}{NAME_SEPARATOR}{DIMENSION_SUFFIX}{}",
        iteration_suffix(iteration)
    )
}

/// Internal name of a column wrapped from a source table.
///
/// The schema and table unique ids plus the visit number keep repeated
/// visits of the same table apart; `prefix` carries partition segments.
pub fn internal_column_name(
    prefix: &str,
    schema_uid: u32,
    table_uid: u32,
    visit: usize,
    column: &str,
) -> String {
    format!("{prefix}{schema_uid}_{table_uid}_{visit}{NAME_SEPARATOR}{column}")
}

/// Visible name a wrapped column starts from.
pub fn visible_column_name(prefix: &str, column: &str, suffix: &str) -> String {
    format!("{prefix}{column}{suffix}")
}

pub fn strip_key_suffix(name: &str) -> &str {
    name.strip_suffix(KEY_SUFFIX).unwrap_or(name)
}

/// `candidate`, or `candidate_n` for the smallest n >= 2 that is free.
pub fn unique_name(candidate: String, taken: &BTreeSet<String>) -> String {
    if !taken.contains(&candidate) {
        return candidate;
    }
    (2..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|name| !taken.contains(name))
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_nest_under_their_parent() {
        assert_eq!(subclass_table_name("genes", "transcript", 0), "genes__transcript");
        assert_eq!(dimension_table_name("genes", "xref", 2), "genes__xref__dm_2");
    }

    #[test]
    fn internal_names_separate_visits() {
        assert_eq!(internal_column_name("", 1, 4, 0, "name"), "1_4_0__name");
        assert_eq!(internal_column_name("hs_", 1, 4, 1, "name"), "hs_1_4_1__name");
    }

    #[test]
    fn unique_names_count_from_two() {
        let taken: BTreeSet<String> = ["name".to_string(), "name_2".to_string()].into();
        assert_eq!(unique_name("name".into(), &taken), "name_3");
        assert_eq!(unique_name("biotype".into(), &taken), "biotype");
        assert_eq!(strip_key_suffix("gene_id_key"), "gene_id");
    }
}
