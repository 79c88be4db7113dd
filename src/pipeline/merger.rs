use crate::error::MergeError;
use crate::types::{RecordKind, Table};
use std::collections::BTreeSet;

/// Concatenate per-area tables of one kind into a single table.
///
/// Strict schema policy: every table must carry the same column names as the
/// first one. A table whose columns are the same set in a different order is
/// realigned by name; any other difference is a `SchemaMismatch`, never a
/// silent null fill. Rows keep input order, then intra-table order.
pub fn merge(kind: RecordKind, tables: Vec<Table>) -> Result<Table, MergeError> {
    let mut iter = tables.into_iter();
    let Some(mut merged) = iter.next() else {
        return Ok(Table::default());
    };
    let expected: Vec<String> = merged.columns().to_vec();
    let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();

    for (i, table) in iter.enumerate() {
        let area_index = i + 1;
        if table.columns() == &expected[..] {
            merged.extend_rows(table);
            continue;
        }
        let found_set: BTreeSet<&str> = table.columns().iter().map(String::as_str).collect();
        if found_set != expected_set {
            return Err(MergeError::SchemaMismatch {
                kind,
                area_index,
                expected: expected.clone(),
                found: table.columns().to_vec(),
            });
        }
        let aligned = table
            .reorder(&expected)
            .map_err(|source| MergeError::Table { kind, source })?;
        merged.extend_rows(aligned);
    }
    Ok(merged)
}
