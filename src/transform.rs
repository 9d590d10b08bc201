// ABOUTME: Optional per-table row mutation applied before serialization
// ABOUTME: Used for redaction/anonymization; must keep the column set intact

use std::sync::Arc;

use crate::error::{SnapError, SnapResult};
use crate::value::Row;

/// User-supplied row mutation. Receives the table name and the row.
pub type RowTransformer = Arc<dyn Fn(&str, Row) -> anyhow::Result<Row> + Send + Sync>;

/// Wrap a closure as a [`RowTransformer`].
pub fn transformer<F>(f: F) -> RowTransformer
where
    F: Fn(&str, Row) -> anyhow::Result<Row> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Transformer that overwrites the given columns with a fixed value.
///
/// NULL cells are overwritten too, so every redacted column holds the
/// replacement afterwards. Columns the row does not have are ignored.
///
/// # Examples
///
/// ```
/// use db_snapper::transform::{apply_transformer, redact};
/// use db_snapper::value::{CellValue, Row};
///
/// let row = Row::new(
///     vec!["id".into(), "phone".into()],
///     vec![CellValue::Int(1), CellValue::Text("+1 555 0100".into())],
/// ).unwrap();
/// let redacted = apply_transformer(Some(&redact(&["phone"], "000")), "users", row).unwrap();
/// assert_eq!(redacted.get("phone"), Some(&CellValue::Text("000".into())));
/// ```
pub fn redact(columns: &[&str], replacement: &str) -> RowTransformer {
    let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let replacement = replacement.to_string();
    transformer(move |_table, mut row| {
        for column in &columns {
            row.set(column, replacement.as_str());
        }
        Ok(row)
    })
}

/// Apply the table's transformer, if any, and check the column set survived.
///
/// A transformer that adds, removes or reorders columns is a hook error: the
/// INSERT column list was fixed before the first row was read.
pub fn apply_transformer(
    transformer: Option<&RowTransformer>,
    table: &str,
    row: Row,
) -> SnapResult<Row> {
    let transformer = match transformer {
        Some(t) => t,
        None => return Ok(row),
    };

    let expected = row.columns().to_vec();
    let hook = format!("row_transformer[{}]", table);
    let transformed = transformer(table, row).map_err(|e| SnapError::hook(hook.clone(), e))?;

    if transformed.columns() != expected.as_slice() {
        return Err(SnapError::hook_message(
            hook,
            format!(
                "transformer changed the column set from [{}] to [{}]",
                expected.join(", "),
                transformed.columns().join(", ")
            ),
        ));
    }

    Ok(transformed)
}
