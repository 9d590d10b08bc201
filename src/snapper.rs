// ABOUTME: The snapshot orchestrator: sequences DDL, views, data and routines into one file
// ABOUTME: Strictly sequential state machine that publishes lifecycle events at each stage

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::column::{classify_columns, ColumnType};
use crate::config::SnapperConfig;
use crate::ddl;
use crate::error::{SnapError, SnapResult};
use crate::events::{EventKind, EventNotifier, Listener, ListenerId, SnapEvent};
use crate::filter::WhereResolver;
use crate::source::{MySqlSource, ObjectKind, SnapSource};
use crate::transform::apply_transformer;
use crate::utils::{column_list, format_elapsed, quote_mysql_ident, sanitize_identifier};
use crate::value::{serialize_row, Row};
use crate::writer::OutputWriter;

/// Stages of one snapshot run.
///
/// Stages only move forward; optional ones are skipped according to the
/// configuration. `Closed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapState {
    Idle,
    Connecting,
    PreparingOutput,
    DumpingSchema,
    DumpingViews,
    DumpingData,
    DumpingRoutines,
    Finalizing,
    Closed,
    Aborted,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapSummary {
    pub path: PathBuf,
    /// Tables whose rows were dumped.
    pub tables: usize,
    pub rows: u64,
    pub elapsed: Duration,
}

/// Dumps one database into one snapshot file.
///
/// A `Snapper` owns its event listeners and configuration; the source
/// connection and output file only live for the duration of a [`snap`](Self::snap)
/// call. Independent snappers share nothing and may run concurrently.
pub struct Snapper {
    config: SnapperConfig,
    notifier: EventNotifier,
    state: SnapState,
}

impl Snapper {
    /// Validate `config` and build a snapper. No I/O happens here.
    pub fn new(config: SnapperConfig) -> SnapResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            notifier: EventNotifier::new(),
            state: SnapState::Idle,
        })
    }

    pub fn config(&self) -> &SnapperConfig {
        &self.config
    }

    /// Replace the configuration between runs.
    pub fn reconfigure(&mut self, config: SnapperConfig) -> SnapResult<()> {
        config.validate()?;
        self.config = config;
        self.state = SnapState::Idle;
        Ok(())
    }

    pub fn state(&self) -> SnapState {
        self.state
    }

    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.notifier.on(kind, listener)
    }

    pub fn on_any(&mut self, listener: Listener) -> ListenerId {
        self.notifier.on_any(listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.notifier.off(id)
    }

    /// Open a MySQL connection from the configured parameters and snapshot it.
    pub async fn connect_and_snap(&mut self) -> SnapResult<SnapSummary> {
        self.state = SnapState::Connecting;
        let mut source =
            match MySqlSource::connect(&self.config.connection, self.config.charset.as_deref())
                .await
            {
                Ok(source) => source,
                Err(e) => {
                    self.state = SnapState::Aborted;
                    return Err(e);
                }
            };

        let result = self.snap(&mut source).await;

        if let Err(e) = source.disconnect().await {
            tracing::warn!("Failed to close source connection cleanly: {}", e);
        }
        result
    }

    /// Snapshot `source` into the configured output file.
    ///
    /// Any error aborts the run. The output file is closed on every path but
    /// not deleted; after an error its content must be treated as invalid.
    pub async fn snap(&mut self, source: &mut dyn SnapSource) -> SnapResult<SnapSummary> {
        let Snapper {
            config,
            notifier,
            state,
        } = self;

        let hook_ids: Vec<ListenerId> = config
            .hooks
            .iter()
            .map(|(kind, listener)| notifier.on(*kind, listener.clone()))
            .collect();

        *state = SnapState::PreparingOutput;
        let mut run = SnapRun {
            config: &*config,
            notifier: &*notifier,
            state: &mut *state,
            started: Instant::now(),
            tables: 0,
            rows: 0,
        };
        let result = run.execute(source).await;

        for id in hook_ids {
            notifier.off(id);
        }

        match &result {
            Ok(summary) => {
                *state = SnapState::Closed;
                tracing::info!(
                    "Snapshot of '{}' complete: {} tables, {} rows in {}",
                    config.connection.database,
                    summary.tables,
                    summary.rows,
                    format_elapsed(summary.elapsed)
                );
            }
            Err(e) => {
                *state = SnapState::Aborted;
                tracing::error!("Snapshot of '{}' aborted: {}", config.connection.database, e);
            }
        }
        result
    }
}

struct SnapRun<'a> {
    config: &'a SnapperConfig,
    notifier: &'a EventNotifier,
    state: &'a mut SnapState,
    started: Instant,
    tables: usize,
    rows: u64,
}

impl<'a> SnapRun<'a> {
    fn enter(&mut self, next: SnapState) {
        tracing::debug!("Snapper state {:?} -> {:?}", self.state, next);
        *self.state = next;
    }

    fn notify(&self, event: SnapEvent) -> SnapResult<()> {
        self.notifier.notify(&event)
    }

    async fn execute(&mut self, source: &mut dyn SnapSource) -> SnapResult<SnapSummary> {
        let path = self.config.snapshot_path();

        self.notify(SnapEvent::Snapping {
            database: self.config.connection.database.clone(),
        })?;
        self.notify(SnapEvent::CreatingSnapFile { path: path.clone() })?;
        tracing::info!(
            "Snapping '{}' into {}",
            self.config.connection.database,
            path.display()
        );

        let mut out = OutputWriter::open(&path, self.config.compress)?;

        if let Err(e) = self.dump(source, &mut out).await {
            // Release the handle; the dump error is the one reported
            let _ = out.close();
            return Err(e);
        }

        out.close()?;

        let elapsed = self.started.elapsed();
        self.notify(SnapEvent::Snapped {
            path: path.clone(),
            elapsed,
        })?;

        Ok(SnapSummary {
            path,
            tables: self.tables,
            rows: self.rows,
            elapsed,
        })
    }

    async fn dump(&mut self, source: &mut dyn SnapSource, out: &mut OutputWriter) -> SnapResult<()> {
        self.write_header(out)?;

        let tables = source.list_tables().await?;
        tracing::debug!("Found {} tables in '{}'", tables.len(), source.schema());

        if self.config.dump_schema {
            self.enter(SnapState::DumpingSchema);
            self.notify(SnapEvent::DumpingSchema)?;
            for table in &tables {
                self.notify(SnapEvent::DumpingTableDdl {
                    table: table.clone(),
                })?;
                self.dump_ddl(source, out, ObjectKind::Table, table).await?;
            }

            self.enter(SnapState::DumpingViews);
            let views = source.list_views().await?;
            self.notify(SnapEvent::DumpingViews)?;
            for view in &views {
                self.notify(SnapEvent::DumpingView { view: view.clone() })?;
                self.dump_ddl(source, out, ObjectKind::View, view).await?;
            }
        }

        if self.config.dump_data {
            self.enter(SnapState::DumpingData);
            self.notify(SnapEvent::DumpingData)?;
            for table in &tables {
                self.dump_table_data(source, out, table).await?;
            }
        }

        if self.config.dump_routines {
            self.enter(SnapState::DumpingRoutines);
            self.dump_routines(source, out).await?;
        }

        self.enter(SnapState::Finalizing);
        for file in &self.config.append {
            self.notify(SnapEvent::Appending { path: file.clone() })?;
            out.comment(&format!("Appended from {}", file.display()))?;
            let bytes = out.append_file(file)?;
            out.new_line(1)?;
            self.notify(SnapEvent::Appended {
                path: file.clone(),
                bytes,
            })?;
        }

        self.write_footer(out)
    }

    fn write_header(&self, out: &mut OutputWriter) -> SnapResult<()> {
        let mut lines = vec![
            format!("db-snapper {} snapshot", env!("CARGO_PKG_VERSION")),
            String::new(),
            format!("Database: {}", sanitize_identifier(&self.config.connection.database)),
        ];
        if self.config.dump_date {
            lines.push(format!(
                "Generated: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        out.comment(&lines.join("\n"))?;
        out.new_line(1)?;

        if let Some(charset) = &self.config.charset {
            match &self.config.collation {
                Some(collation) => {
                    out.writeln(&format!("SET NAMES {} COLLATE {};", charset, collation))?
                }
                None => out.writeln(&format!("SET NAMES {};", charset))?,
            }
        }
        // Rows were read with the source session pinned to UTC
        out.writeln("SET @OLD_TIME_ZONE=@@TIME_ZONE, TIME_ZONE='+00:00';")?;
        out.writeln("SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0;")?;
        out.writeln("SET @OLD_UNIQUE_CHECKS=@@UNIQUE_CHECKS, UNIQUE_CHECKS=0;")?;
        // Keeps explicit 0 ids and drops NO_BACKSLASH_ESCAPES for the quoted literals
        out.writeln("SET @OLD_SQL_MODE=@@SQL_MODE, SQL_MODE='NO_AUTO_VALUE_ON_ZERO';")?;
        out.new_line(1)
    }

    fn write_footer(&self, out: &mut OutputWriter) -> SnapResult<()> {
        out.writeln("SET SQL_MODE=@OLD_SQL_MODE;")?;
        out.writeln("SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS;")?;
        out.writeln("SET UNIQUE_CHECKS=@OLD_UNIQUE_CHECKS;")?;
        out.writeln("SET TIME_ZONE=@OLD_TIME_ZONE;")?;
        out.new_line(1)?;
        if self.config.dump_date {
            out.comment(&format!(
                "Snapshot completed on {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
            ))?;
        } else {
            out.comment("Snapshot completed")?;
        }
        out.flush()
    }

    /// Drop-and-create block for one schema object.
    async fn dump_ddl(
        &self,
        source: &mut dyn SnapSource,
        out: &mut OutputWriter,
        kind: ObjectKind,
        name: &str,
    ) -> SnapResult<()> {
        let create = source.create_statement(kind, name).await?;

        out.message(&format!("Creating {} {}", kind.label(), name))?;
        out.comment(&format!(
            "Structure for {} {}",
            kind.label(),
            quote_mysql_ident(name)
        ))?;
        out.writeln(&ddl::render(kind, name, &create))?;
        out.new_line(1)
    }

    async fn dump_routines(
        &self,
        source: &mut dyn SnapSource,
        out: &mut OutputWriter,
    ) -> SnapResult<()> {
        self.notify(SnapEvent::DumpingActions)?;

        let triggers = source.list_triggers().await?;
        self.notify(SnapEvent::DumpingTriggers)?;
        for trigger in &triggers {
            self.notify(SnapEvent::DumpingTrigger {
                trigger: trigger.clone(),
            })?;
            self.dump_ddl(source, out, ObjectKind::Trigger, trigger).await?;
        }

        let functions = source.list_functions().await?;
        self.notify(SnapEvent::DumpingFunctions)?;
        for function in &functions {
            self.notify(SnapEvent::DumpingFunction {
                function: function.clone(),
            })?;
            self.dump_ddl(source, out, ObjectKind::Function, function).await?;
        }

        let procedures = source.list_procedures().await?;
        self.notify(SnapEvent::DumpingProcedures)?;
        for procedure in &procedures {
            self.notify(SnapEvent::DumpingProcedure {
                procedure: procedure.clone(),
            })?;
            self.dump_ddl(source, out, ObjectKind::Procedure, procedure)
                .await?;
        }

        tracing::debug!(
            "Dumped {} triggers, {} functions, {} procedures",
            triggers.len(),
            functions.len(),
            procedures.len()
        );
        Ok(())
    }

    /// Stream one table's rows into a single bracketed INSERT.
    async fn dump_table_data(
        &mut self,
        source: &mut dyn SnapSource,
        out: &mut OutputWriter,
        table: &str,
    ) -> SnapResult<()> {
        let started = Instant::now();

        let columns: Vec<ColumnType> = classify_columns(&source.columns(table).await?)
            .into_iter()
            .filter(|c| !c.is_virtual)
            .collect();
        if columns.is_empty() {
            return Err(SnapError::unexpected_shape(format!(
                "table '{}' has no insertable columns",
                sanitize_identifier(table)
            )));
        }
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let column_sql = column_list(names.iter().map(String::as_str));

        let resolver = WhereResolver::new(&self.config.default_where, &self.config.wheres);
        let where_clause = resolver.resolve(table, &mut *source, self.config).await?;

        self.notify(SnapEvent::DumpingTableData {
            table: table.to_string(),
            where_clause: where_clause.clone(),
        })?;

        let quoted = quote_mysql_ident(table);
        out.message(&format!("Dumping data of table {}", table))?;
        out.comment(&format!("Data for table {}", quoted))?;
        out.writeln(&format!("LOCK TABLES {} WRITE;", quoted))?;
        out.writeln(&format!("/*!40000 ALTER TABLE {} DISABLE KEYS */;", quoted))?;
        out.writeln("SET autocommit=0;")?;

        let quoter = source.quoter();
        let transformer = self.config.row_transformers.get(table);
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            column_sql, quoted, where_clause
        );

        let mut rows: u64 = 0;
        {
            let mut cursor = source.select_rows(&sql).await?;
            while let Some(values) = cursor.next_row().await? {
                let row = Row::new(names.clone(), values)?;
                let row = apply_transformer(transformer, table, row)?;
                let tuple = serialize_row(row.values(), &columns, quoter.as_ref())?;

                if rows == 0 {
                    out.write(&format!("INSERT INTO {} ({}) VALUES\n", quoted, column_sql))?;
                } else {
                    out.write(",\n")?;
                }
                out.write(&tuple)?;
                rows += 1;
            }
        }
        if rows > 0 {
            out.writeln(";")?;
        }

        out.writeln(&format!("/*!40000 ALTER TABLE {} ENABLE KEYS */;", quoted))?;
        out.writeln("UNLOCK TABLES;")?;
        out.writeln("COMMIT;")?;
        out.writeln("SET autocommit=1;")?;
        out.new_line(1)?;

        let elapsed = started.elapsed();
        tracing::info!(
            "Dumped {} rows from '{}' in {}",
            rows,
            sanitize_identifier(table),
            format_elapsed(elapsed)
        );

        self.tables += 1;
        self.rows += rows;
        self.notify(SnapEvent::TableDumped {
            table: table.to_string(),
            rows,
            elapsed,
        })
    }
}
