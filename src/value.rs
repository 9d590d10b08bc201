// ABOUTME: Cell values, rows and their rendering as replayable SQL literals
// ABOUTME: Null, blob (hex), numeric (bare) and quoted-string rules in priority order

use crate::column::ColumnType;
use crate::error::{SnapError, SnapResult};

/// A single cell as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Raw bytes as sent by the server (the text protocol delivers most values this way).
    Bytes(Vec<u8>),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Raw byte form of the value; `None` for NULL.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            CellValue::Null => None,
            CellValue::Int(i) => Some(i.to_string().into_bytes()),
            CellValue::UInt(u) => Some(u.to_string().into_bytes()),
            CellValue::Float(f) => Some(f.to_string().into_bytes()),
            CellValue::Bytes(b) => Some(b.clone()),
            CellValue::Text(s) => Some(s.as_bytes().to_vec()),
        }
    }

    /// Lossy text view, handy for transformers and assertions.
    pub fn to_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

impl From<mysql_async::Value> for CellValue {
    fn from(value: mysql_async::Value) -> Self {
        use mysql_async::Value;
        match value {
            Value::NULL => CellValue::Null,
            Value::Bytes(b) => CellValue::Bytes(b),
            Value::Int(i) => CellValue::Int(i),
            Value::UInt(u) => CellValue::UInt(u),
            Value::Float(f) => CellValue::Float(f64::from(f)),
            Value::Double(d) => CellValue::Float(d),
            // Temporal values: reuse the driver's rendering minus the quotes
            other => CellValue::Text(other.as_sql(false).trim_matches('\'').to_string()),
        }
    }
}

/// One row, column names in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<CellValue>,
}

impl Row {
    /// Build a row; `columns` and `values` must have the same length.
    pub fn new(columns: Vec<String>, values: Vec<CellValue>) -> SnapResult<Self> {
        if columns.len() != values.len() {
            return Err(SnapError::unexpected_shape(format!(
                "row has {} values for {} columns",
                values.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Replace the value of an existing column. Returns false when the column is unknown.
    pub fn set(&mut self, column: &str, value: impl Into<CellValue>) -> bool {
        match self.columns.iter().position(|c| c == column) {
            Some(idx) => {
                self.values[idx] = value.into();
                true
            }
            None => false,
        }
    }

    /// Add a column. Transformers that do this are rejected before serialization.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<CellValue>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Remove a column. Transformers that do this are rejected before serialization.
    pub fn remove(&mut self, column: &str) -> Option<CellValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.columns.remove(idx);
        Some(self.values.remove(idx))
    }
}

/// The engine's string-literal quoting routine.
pub trait LiteralQuoter: Send + Sync {
    /// Render raw bytes as one quoted string literal.
    fn quote(&self, raw: &[u8]) -> SnapResult<String>;
}

/// Quoting through the MySQL driver (`mysql_async::Value::as_sql`).
///
/// Escapes quotes, backslashes, NUL and control bytes; bytes that are not
/// valid UTF-8 come back as a hex literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlQuoter {
    /// Set when the target runs with `NO_BACKSLASH_ESCAPES`.
    pub no_backslash_escapes: bool,
}

impl LiteralQuoter for MySqlQuoter {
    fn quote(&self, raw: &[u8]) -> SnapResult<String> {
        Ok(mysql_async::Value::Bytes(raw.to_vec()).as_sql(self.no_backslash_escapes))
    }
}

/// Render one cell as a literal for an `INSERT ... VALUES` tuple.
///
/// Rules, first match wins:
/// 1. NULL → `NULL`
/// 2. blob (including `bit`) → `0x<hex>`, or `''` when empty
/// 3. numeric → the value's text, unquoted
/// 4. anything else → quoted via `quoter`
pub fn serialize_value(
    value: &CellValue,
    column: &ColumnType,
    quoter: &dyn LiteralQuoter,
) -> SnapResult<String> {
    let bytes = match value.as_bytes() {
        None => return Ok("NULL".to_string()),
        Some(bytes) => bytes,
    };

    if column.is_blob {
        if bytes.is_empty() {
            return Ok("''".to_string());
        }
        return Ok(format!("0x{}", hex::encode(&bytes)));
    }

    if column.is_numeric {
        return numeric_literal(value, &bytes, column);
    }

    quoter.quote(&bytes)
}

fn numeric_literal(value: &CellValue, bytes: &[u8], column: &ColumnType) -> SnapResult<String> {
    if let CellValue::Float(f) = value {
        if !f.is_finite() {
            return Err(SnapError::serialization(format!(
                "column '{}' holds non-finite number {}",
                column.name, f
            )));
        }
    }

    let text = std::str::from_utf8(bytes).map_err(|_| {
        SnapError::serialization(format!(
            "column '{}' is numeric but holds non-UTF-8 bytes",
            column.name
        ))
    })?;
    let text = text.trim();

    // Anything else here could break out of the VALUES tuple
    let looks_numeric = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    if !looks_numeric {
        return Err(SnapError::serialization(format!(
            "column '{}' is numeric but holds '{}'",
            column.name,
            crate::utils::sanitize_identifier(text)
        )));
    }

    Ok(text.to_string())
}

/// Render a whole row as a parenthesised tuple `(v1,v2,...)`.
pub fn serialize_row(
    values: &[CellValue],
    columns: &[ColumnType],
    quoter: &dyn LiteralQuoter,
) -> SnapResult<String> {
    if values.len() != columns.len() {
        return Err(SnapError::serialization(format!(
            "row has {} values for {} columns",
            values.len(),
            columns.len()
        )));
    }

    let mut tuple = String::from("(");
    for (idx, (value, column)) in values.iter().zip(columns).enumerate() {
        if idx > 0 {
            tuple.push(',');
        }
        tuple.push_str(&serialize_value(value, column, quoter)?);
    }
    tuple.push(')');
    Ok(tuple)
}
