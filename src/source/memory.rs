// ABOUTME: In-memory snapshot source for fixtures and tests
// ABOUTME: Serves canned tables, DDL and scalars; records every row query it receives

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::{ObjectKind, RowCursor, SnapSource};
use crate::column::ColumnMeta;
use crate::error::{SnapError, SnapResult};
use crate::utils::{quote_mysql_ident, sanitize_identifier};
use crate::value::{CellValue, LiteralQuoter, MySqlQuoter};

struct MemoryTable {
    name: String,
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<CellValue>>,
    ddl: String,
}

/// A schema held entirely in memory.
///
/// Where-clauses are not evaluated: every row of a table is returned and the
/// SELECT is recorded so callers can inspect the filter that was requested.
///
/// ```
/// use db_snapper::column::ColumnMeta;
/// use db_snapper::source::MemorySource;
/// use db_snapper::value::CellValue;
///
/// let source = MemorySource::new("app").with_table(
///     "users",
///     vec![ColumnMeta::new("id", "int(11)", "")],
///     vec![vec![CellValue::Int(1)]],
///     "CREATE TABLE `users` (`id` int(11))",
/// );
/// assert_eq!(source.table_names(), vec!["users"]);
/// ```
pub struct MemorySource {
    schema: String,
    quoter: MySqlQuoter,
    tables: Vec<MemoryTable>,
    objects: Vec<(ObjectKind, String, String)>,
    scalars: HashMap<String, String>,
    failing_selects: HashSet<String>,
    failing_ddl: HashSet<(ObjectKind, String)>,
    queries: Vec<String>,
}

impl MemorySource {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            quoter: MySqlQuoter::default(),
            tables: Vec::new(),
            objects: Vec::new(),
            scalars: HashMap::new(),
            failing_selects: HashSet::new(),
            failing_ddl: HashSet::new(),
            queries: Vec::new(),
        }
    }

    /// Add a base table with its columns, rows (in column order) and create statement.
    pub fn with_table(
        mut self,
        name: impl Into<String>,
        columns: Vec<ColumnMeta>,
        rows: Vec<Vec<CellValue>>,
        ddl: impl Into<String>,
    ) -> Self {
        self.tables.push(MemoryTable {
            name: name.into(),
            columns,
            rows,
            ddl: ddl.into(),
        });
        self
    }

    /// Add a view, trigger, function or procedure with its create statement.
    pub fn with_object(
        mut self,
        kind: ObjectKind,
        name: impl Into<String>,
        ddl: impl Into<String>,
    ) -> Self {
        self.objects.push((kind, name.into(), ddl.into()));
        self
    }

    /// Canned answer for [`SnapSource::query_scalar`].
    pub fn with_scalar(mut self, sql: impl Into<String>, value: impl Into<String>) -> Self {
        self.scalars.insert(sql.into(), value.into());
        self
    }

    /// Make the row query for `table` fail.
    pub fn failing_select(mut self, table: impl Into<String>) -> Self {
        self.failing_selects.insert(table.into());
        self
    }

    /// Make fetching the create statement of an object fail.
    pub fn failing_ddl(mut self, kind: ObjectKind, name: impl Into<String>) -> Self {
        self.failing_ddl.insert((kind, name.into()));
        self
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Every row query received so far, in order.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    fn table(&self, name: &str) -> SnapResult<&MemoryTable> {
        self.tables.iter().find(|t| t.name == name).ok_or_else(|| {
            SnapError::unexpected_shape(format!(
                "table '{}' does not exist in {}",
                sanitize_identifier(name),
                self.schema
            ))
        })
    }

    fn names_of(&self, kind: ObjectKind) -> Vec<String> {
        self.objects
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, name, _)| name.clone())
            .collect()
    }
}

struct MemoryRows {
    rows: std::vec::IntoIter<Vec<CellValue>>,
}

#[async_trait]
impl RowCursor for MemoryRows {
    async fn next_row(&mut self) -> SnapResult<Option<Vec<CellValue>>> {
        Ok(self.rows.next())
    }
}

#[async_trait]
impl SnapSource for MemorySource {
    fn schema(&self) -> &str {
        &self.schema
    }

    fn quoter(&self) -> Arc<dyn LiteralQuoter> {
        Arc::new(self.quoter)
    }

    async fn list_tables(&mut self) -> SnapResult<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn list_views(&mut self) -> SnapResult<Vec<String>> {
        Ok(self.names_of(ObjectKind::View))
    }

    async fn list_triggers(&mut self) -> SnapResult<Vec<String>> {
        Ok(self.names_of(ObjectKind::Trigger))
    }

    async fn list_functions(&mut self) -> SnapResult<Vec<String>> {
        Ok(self.names_of(ObjectKind::Function))
    }

    async fn list_procedures(&mut self) -> SnapResult<Vec<String>> {
        Ok(self.names_of(ObjectKind::Procedure))
    }

    async fn columns(&mut self, table: &str) -> SnapResult<Vec<ColumnMeta>> {
        Ok(self.table(table)?.columns.clone())
    }

    async fn create_statement(&mut self, kind: ObjectKind, name: &str) -> SnapResult<String> {
        if self.failing_ddl.contains(&(kind, name.to_string())) {
            return Err(SnapError::unexpected_shape(format!(
                "no DDL returned for {} '{}'",
                kind.label(),
                sanitize_identifier(name)
            )));
        }

        if kind == ObjectKind::Table {
            return Ok(self.table(name)?.ddl.clone());
        }

        self.objects
            .iter()
            .find(|(k, n, _)| *k == kind && n == name)
            .map(|(_, _, ddl)| ddl.clone())
            .ok_or_else(|| {
                SnapError::unexpected_shape(format!(
                    "{} '{}' does not exist in {}",
                    kind.label(),
                    sanitize_identifier(name),
                    self.schema
                ))
            })
    }

    async fn select_rows<'a>(&'a mut self, sql: &str) -> SnapResult<Box<dyn RowCursor + 'a>> {
        self.queries.push(sql.to_string());

        let (select_list, from) = sql.split_once(" FROM ").ok_or_else(|| {
            SnapError::unexpected_shape(format!("unsupported row query: {}", sql))
        })?;

        let table = self
            .tables
            .iter()
            .find(|t| {
                let quoted = quote_mysql_ident(&t.name);
                from == quoted || from.starts_with(&format!("{} ", quoted))
            })
            .ok_or_else(|| {
                SnapError::unexpected_shape(format!("row query names no known table: {}", sql))
            })?;

        if self.failing_selects.contains(&table.name) {
            return Err(SnapError::unexpected_shape(format!(
                "failed to select rows from '{}'",
                table.name
            )));
        }

        // Project onto the selected columns, keeping catalog order
        let selected: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| select_list.contains(&quote_mysql_ident(&c.name)))
            .map(|(idx, _)| idx)
            .collect();

        let rows: Vec<Vec<CellValue>> = table
            .rows
            .iter()
            .map(|row| {
                selected
                    .iter()
                    .map(|&idx| row.get(idx).cloned().unwrap_or(CellValue::Null))
                    .collect()
            })
            .collect();

        Ok(Box::new(MemoryRows {
            rows: rows.into_iter(),
        }))
    }

    async fn query_scalar(&mut self, sql: &str) -> SnapResult<Option<String>> {
        Ok(self.scalars.get(sql).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> MemorySource {
        MemorySource::new("app")
            .with_table(
                "users",
                vec![
                    ColumnMeta::new("id", "int(11)", "auto_increment"),
                    ColumnMeta::new("name", "varchar(64)", ""),
                    ColumnMeta::new("name_upper", "varchar(64)", "VIRTUAL GENERATED"),
                ],
                vec![
                    vec![CellValue::Int(1), "ada".into(), "ADA".into()],
                    vec![CellValue::Int(2), "linus".into(), "LINUS".into()],
                ],
                "CREATE TABLE `users` (...)",
            )
            .with_object(ObjectKind::View, "active_users", "CREATE VIEW `active_users` AS ...")
            .with_object(ObjectKind::Trigger, "users_bi", "CREATE TRIGGER `users_bi` ...")
    }

    #[tokio::test]
    async fn test_enumeration_keeps_insertion_order() {
        let mut source = fixture();
        assert_eq!(source.list_tables().await.unwrap(), vec!["users"]);
        assert_eq!(source.list_views().await.unwrap(), vec!["active_users"]);
        assert_eq!(source.list_triggers().await.unwrap(), vec!["users_bi"]);
        assert!(source.list_functions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_select_projects_and_records() {
        let mut source = fixture();
        let sql = "SELECT `id`, `name` FROM `users` WHERE id > 1";
        let mut rows = Vec::new();
        {
            let mut cursor = source.select_rows(sql).await.unwrap();
            while let Some(row) = cursor.next_row().await.unwrap() {
                rows.push(row);
            }
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![CellValue::Int(2), CellValue::from("linus")]);
        assert_eq!(source.queries(), &[sql.to_string()]);
    }

    #[tokio::test]
    async fn test_failures_are_injectable() {
        let mut source = fixture()
            .failing_select("users")
            .failing_ddl(ObjectKind::Trigger, "users_bi");
        assert!(source
            .select_rows("SELECT `id` FROM `users` WHERE true")
            .await
            .is_err());
        assert!(source
            .create_statement(ObjectKind::Trigger, "users_bi")
            .await
            .is_err());
        assert!(source
            .create_statement(ObjectKind::View, "missing")
            .await
            .is_err());
    }
}
