// ABOUTME: Driver seam between the snapper and the source database
// ABOUTME: Schema enumeration, column metadata, create statements and row cursors

pub mod memory;
pub mod mysql;

use std::sync::Arc;

use async_trait::async_trait;

use crate::column::ColumnMeta;
use crate::error::SnapResult;
use crate::value::{CellValue, LiteralQuoter};

pub use memory::MemorySource;
pub use mysql::MySqlSource;

/// Kinds of schema objects a snapshot contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    View,
    Trigger,
    Function,
    Procedure,
}

impl ObjectKind {
    /// Keyword used in `SHOW CREATE` / `DROP ... IF EXISTS`.
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Procedure => "PROCEDURE",
        }
    }

    /// Lower-case label for comments and messages.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
        }
    }

    /// Routines and triggers need a delimiter change around their DDL.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            ObjectKind::Trigger | ObjectKind::Function | ObjectKind::Procedure
        )
    }
}

/// Forward-only cursor over the rows of one SELECT.
#[async_trait]
pub trait RowCursor: Send {
    /// Next row's values in select order, or `None` when exhausted.
    async fn next_row(&mut self) -> SnapResult<Option<Vec<CellValue>>>;
}

/// Read-only view of the schema being snapshotted.
///
/// Enumeration order is whatever the catalog returns; it is deterministic for
/// an unchanged schema but not sorted. Implementations never mutate the source.
#[async_trait]
pub trait SnapSource: Send {
    /// Name of the schema being dumped.
    fn schema(&self) -> &str;

    /// Quoting routine for string literals of this engine.
    ///
    /// Shared so it stays usable while a row cursor borrows the source.
    fn quoter(&self) -> Arc<dyn LiteralQuoter>;

    /// Base tables only, views excluded.
    async fn list_tables(&mut self) -> SnapResult<Vec<String>>;

    async fn list_views(&mut self) -> SnapResult<Vec<String>>;

    async fn list_triggers(&mut self) -> SnapResult<Vec<String>>;

    async fn list_functions(&mut self) -> SnapResult<Vec<String>>;

    async fn list_procedures(&mut self) -> SnapResult<Vec<String>>;

    /// Column metadata for a table, in ordinal order.
    async fn columns(&mut self, table: &str) -> SnapResult<Vec<ColumnMeta>>;

    /// The engine's canonical create statement for an object.
    async fn create_statement(&mut self, kind: ObjectKind, name: &str) -> SnapResult<String>;

    /// Run a SELECT and stream its rows without buffering the result.
    async fn select_rows<'a>(&'a mut self, sql: &str) -> SnapResult<Box<dyn RowCursor + 'a>>;

    /// First column of the first row of a query, as text.
    async fn query_scalar(&mut self, sql: &str) -> SnapResult<Option<String>>;
}
