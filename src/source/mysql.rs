// ABOUTME: MySQL/MariaDB implementation of the snapshot source
// ABOUTME: information_schema enumeration, SHOW CREATE statements, streaming selects

use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, QueryResult, TextProtocol};

use super::{ObjectKind, RowCursor, SnapSource};
use crate::column::ColumnMeta;
use crate::connection::{self, ConnectionParams};
use crate::error::{SnapError, SnapResult};
use crate::utils::{quote_mysql_ident, sanitize_identifier};
use crate::value::{CellValue, LiteralQuoter, MySqlQuoter};

/// Source backed by a live `mysql_async` connection.
pub struct MySqlSource {
    conn: Conn,
    schema: String,
    quoter: MySqlQuoter,
}

impl MySqlSource {
    /// Open a connection and prepare the session.
    ///
    /// When `charset` is given the session runs `SET NAMES` so string values
    /// arrive in the same encoding the snapshot header declares.
    pub async fn connect(params: &ConnectionParams, charset: Option<&str>) -> SnapResult<Self> {
        let mut conn = connection::connect(params).await?;

        if let Some(charset) = charset {
            if !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(SnapError::configuration(format!(
                    "invalid database_charset '{}' for {}",
                    sanitize_identifier(charset),
                    params.identifier()
                )));
            }
            conn.query_drop(format!("SET NAMES {}", charset))
                .await
                .map_err(|e| SnapError::connection("failed to set session charset", e))?;
        }

        // TIMESTAMP values come back in UTC to match the snapshot header
        conn.query_drop("SET time_zone = '+00:00'")
            .await
            .map_err(|e| SnapError::connection("failed to set session time zone", e))?;

        tracing::info!("Connected to {}", params.identifier());
        Ok(Self::from_conn(conn, params.database.clone()))
    }

    /// Wrap an already-open connection.
    pub fn from_conn(conn: Conn, schema: impl Into<String>) -> Self {
        Self {
            conn,
            schema: schema.into(),
            quoter: MySqlQuoter::default(),
        }
    }

    /// Close the connection cleanly.
    pub async fn disconnect(self) -> SnapResult<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| SnapError::connection("failed to close connection", e))
    }

    async fn names(&mut self, what: &str, sql: &str) -> SnapResult<Vec<String>> {
        let schema = self.schema.clone();
        self.conn
            .exec::<String, _, _>(sql, (schema,))
            .await
            .map_err(|e| SnapError::introspection(format!("failed to list {}", what), e))
    }
}

struct MySqlRows<'a> {
    result: QueryResult<'a, 'static, TextProtocol>,
}

#[async_trait]
impl<'a> RowCursor for MySqlRows<'a> {
    async fn next_row(&mut self) -> SnapResult<Option<Vec<CellValue>>> {
        let row = self
            .result
            .next()
            .await
            .map_err(|e| SnapError::connection("failed to fetch row", e))?;
        Ok(row.map(|r| {
            r.unwrap_raw()
                .into_iter()
                .map(|v| v.map(CellValue::from).unwrap_or(CellValue::Null))
                .collect()
        }))
    }
}

#[async_trait]
impl SnapSource for MySqlSource {
    fn schema(&self) -> &str {
        &self.schema
    }

    fn quoter(&self) -> Arc<dyn LiteralQuoter> {
        Arc::new(self.quoter)
    }

    async fn list_tables(&mut self) -> SnapResult<Vec<String>> {
        self.names(
            "tables",
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
        )
        .await
    }

    async fn list_views(&mut self) -> SnapResult<Vec<String>> {
        self.names(
            "views",
            "SELECT TABLE_NAME FROM information_schema.VIEWS WHERE TABLE_SCHEMA = ?",
        )
        .await
    }

    async fn list_triggers(&mut self) -> SnapResult<Vec<String>> {
        self.names(
            "triggers",
            "SELECT TRIGGER_NAME FROM information_schema.TRIGGERS WHERE TRIGGER_SCHEMA = ?",
        )
        .await
    }

    async fn list_functions(&mut self) -> SnapResult<Vec<String>> {
        self.names(
            "functions",
            "SELECT ROUTINE_NAME FROM information_schema.ROUTINES \
             WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = 'FUNCTION'",
        )
        .await
    }

    async fn list_procedures(&mut self) -> SnapResult<Vec<String>> {
        self.names(
            "procedures",
            "SELECT ROUTINE_NAME FROM information_schema.ROUTINES \
             WHERE ROUTINE_SCHEMA = ? AND ROUTINE_TYPE = 'PROCEDURE'",
        )
        .await
    }

    async fn columns(&mut self, table: &str) -> SnapResult<Vec<ColumnMeta>> {
        let schema = self.schema.clone();
        let rows: Vec<(String, String, Option<String>)> = self
            .conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, EXTRA FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                (schema, table.to_string()),
            )
            .await
            .map_err(|e| {
                SnapError::introspection(
                    format!("failed to read columns of '{}'", sanitize_identifier(table)),
                    e,
                )
            })?;

        if rows.is_empty() {
            return Err(SnapError::unexpected_shape(format!(
                "table '{}' has no columns in information_schema",
                sanitize_identifier(table)
            )));
        }

        Ok(rows
            .into_iter()
            .map(|(name, column_type, extra)| {
                ColumnMeta::new(name, column_type, extra.unwrap_or_default())
            })
            .collect())
    }

    async fn create_statement(&mut self, kind: ObjectKind, name: &str) -> SnapResult<String> {
        let sql = format!("SHOW CREATE {} {}", kind.keyword(), quote_mysql_ident(name));
        let row: Option<mysql_async::Row> = self.conn.query_first(sql).await.map_err(|e| {
            SnapError::introspection(
                format!("failed to fetch DDL of {} '{}'", kind.label(), sanitize_identifier(name)),
                e,
            )
        })?;

        // Tables and views report the DDL in column 1, routines and triggers in column 2
        let index = match kind {
            ObjectKind::Table | ObjectKind::View => 1,
            ObjectKind::Trigger | ObjectKind::Function | ObjectKind::Procedure => 2,
        };

        let ddl = row
            .and_then(|mut r| r.take_opt::<Option<String>, usize>(index))
            .and_then(|v| v.ok())
            .flatten();

        ddl.filter(|d| !d.trim().is_empty()).ok_or_else(|| {
            SnapError::unexpected_shape(format!(
                "no DDL returned for {} '{}' (missing privileges?)",
                kind.label(),
                sanitize_identifier(name)
            ))
        })
    }

    async fn select_rows<'a>(&'a mut self, sql: &str) -> SnapResult<Box<dyn RowCursor + 'a>> {
        tracing::debug!("Streaming rows: {}", sql);
        let result = self
            .conn
            .query_iter(sql.to_string())
            .await
            .map_err(|e| SnapError::introspection("failed to select rows", e))?;
        Ok(Box::new(MySqlRows { result }))
    }

    async fn query_scalar(&mut self, sql: &str) -> SnapResult<Option<String>> {
        let row: Option<mysql_async::Row> = self
            .conn
            .query_first(sql.to_string())
            .await
            .map_err(|e| SnapError::introspection("scalar query failed", e))?;
        Ok(row
            .and_then(|mut r| r.take::<mysql_async::Value, usize>(0))
            .map(CellValue::from)
            .and_then(|v| v.to_text()))
    }
}
