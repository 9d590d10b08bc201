// ABOUTME: Typed lifecycle events published while a snapshot runs
// ABOUTME: Synchronous in-process pub/sub with removable listeners

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SnapError, SnapResult};
use crate::utils::format_elapsed;

/// Discriminant of a [`SnapEvent`], used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Snapping,
    CreatingSnapFile,
    DumpingSchema,
    DumpingTableDdl,
    DumpingViews,
    DumpingView,
    DumpingData,
    DumpingTableData,
    TableDumped,
    DumpingActions,
    DumpingTriggers,
    DumpingTrigger,
    DumpingFunctions,
    DumpingFunction,
    DumpingProcedures,
    DumpingProcedure,
    Appending,
    Appended,
    Snapped,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::Snapping,
        EventKind::CreatingSnapFile,
        EventKind::DumpingSchema,
        EventKind::DumpingTableDdl,
        EventKind::DumpingViews,
        EventKind::DumpingView,
        EventKind::DumpingData,
        EventKind::DumpingTableData,
        EventKind::TableDumped,
        EventKind::DumpingActions,
        EventKind::DumpingTriggers,
        EventKind::DumpingTrigger,
        EventKind::DumpingFunctions,
        EventKind::DumpingFunction,
        EventKind::DumpingProcedures,
        EventKind::DumpingProcedure,
        EventKind::Appending,
        EventKind::Appended,
        EventKind::Snapped,
    ];

    /// Stable snake_case name, e.g. `dumping_table_data`.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Snapping => "snapping",
            EventKind::CreatingSnapFile => "creating_snap_file",
            EventKind::DumpingSchema => "dumping_schema",
            EventKind::DumpingTableDdl => "dumping_table_ddl",
            EventKind::DumpingViews => "dumping_views",
            EventKind::DumpingView => "dumping_view",
            EventKind::DumpingData => "dumping_data",
            EventKind::DumpingTableData => "dumping_table_data",
            EventKind::TableDumped => "table_dumped",
            EventKind::DumpingActions => "dumping_actions",
            EventKind::DumpingTriggers => "dumping_triggers",
            EventKind::DumpingTrigger => "dumping_trigger",
            EventKind::DumpingFunctions => "dumping_functions",
            EventKind::DumpingFunction => "dumping_function",
            EventKind::DumpingProcedures => "dumping_procedures",
            EventKind::DumpingProcedure => "dumping_procedure",
            EventKind::Appending => "appending",
            EventKind::Appended => "appended",
            EventKind::Snapped => "snapped",
        }
    }

    /// Look a kind up by its [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lifecycle event and its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapEvent {
    Snapping { database: String },
    CreatingSnapFile { path: PathBuf },
    DumpingSchema,
    DumpingTableDdl { table: String },
    DumpingViews,
    DumpingView { view: String },
    DumpingData,
    DumpingTableData { table: String, where_clause: String },
    TableDumped { table: String, rows: u64, elapsed: Duration },
    DumpingActions,
    DumpingTriggers,
    DumpingTrigger { trigger: String },
    DumpingFunctions,
    DumpingFunction { function: String },
    DumpingProcedures,
    DumpingProcedure { procedure: String },
    Appending { path: PathBuf },
    Appended { path: PathBuf, bytes: u64 },
    Snapped { path: PathBuf, elapsed: Duration },
}

impl SnapEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SnapEvent::Snapping { .. } => EventKind::Snapping,
            SnapEvent::CreatingSnapFile { .. } => EventKind::CreatingSnapFile,
            SnapEvent::DumpingSchema => EventKind::DumpingSchema,
            SnapEvent::DumpingTableDdl { .. } => EventKind::DumpingTableDdl,
            SnapEvent::DumpingViews => EventKind::DumpingViews,
            SnapEvent::DumpingView { .. } => EventKind::DumpingView,
            SnapEvent::DumpingData => EventKind::DumpingData,
            SnapEvent::DumpingTableData { .. } => EventKind::DumpingTableData,
            SnapEvent::TableDumped { .. } => EventKind::TableDumped,
            SnapEvent::DumpingActions => EventKind::DumpingActions,
            SnapEvent::DumpingTriggers => EventKind::DumpingTriggers,
            SnapEvent::DumpingTrigger { .. } => EventKind::DumpingTrigger,
            SnapEvent::DumpingFunctions => EventKind::DumpingFunctions,
            SnapEvent::DumpingFunction { .. } => EventKind::DumpingFunction,
            SnapEvent::DumpingProcedures => EventKind::DumpingProcedures,
            SnapEvent::DumpingProcedure { .. } => EventKind::DumpingProcedure,
            SnapEvent::Appending { .. } => EventKind::Appending,
            SnapEvent::Appended { .. } => EventKind::Appended,
            SnapEvent::Snapped { .. } => EventKind::Snapped,
        }
    }
}

impl fmt::Display for SnapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapEvent::Snapping { database } => write!(f, "Snapping database '{}'", database),
            SnapEvent::CreatingSnapFile { path } => {
                write!(f, "Creating snapshot file {}", path.display())
            }
            SnapEvent::DumpingSchema => f.write_str("Dumping schema"),
            SnapEvent::DumpingTableDdl { table } => write!(f, "Dumping schema of '{}'", table),
            SnapEvent::DumpingViews => f.write_str("Dumping views"),
            SnapEvent::DumpingView { view } => write!(f, "Dumping view '{}'", view),
            SnapEvent::DumpingData => f.write_str("Dumping data"),
            SnapEvent::DumpingTableData {
                table,
                where_clause,
            } => write!(f, "Dumping data of '{}' where {}", table, where_clause),
            SnapEvent::TableDumped {
                table,
                rows,
                elapsed,
            } => write!(
                f,
                "Dumped {} rows of '{}' in {}",
                rows,
                table,
                format_elapsed(*elapsed)
            ),
            SnapEvent::DumpingActions => f.write_str("Dumping triggers and routines"),
            SnapEvent::DumpingTriggers => f.write_str("Dumping triggers"),
            SnapEvent::DumpingTrigger { trigger } => write!(f, "Dumping trigger '{}'", trigger),
            SnapEvent::DumpingFunctions => f.write_str("Dumping functions"),
            SnapEvent::DumpingFunction { function } => {
                write!(f, "Dumping function '{}'", function)
            }
            SnapEvent::DumpingProcedures => f.write_str("Dumping procedures"),
            SnapEvent::DumpingProcedure { procedure } => {
                write!(f, "Dumping procedure '{}'", procedure)
            }
            SnapEvent::Appending { path } => write!(f, "Appending {}", path.display()),
            SnapEvent::Appended { path, bytes } => {
                write!(f, "Appended {} ({} bytes)", path.display(), bytes)
            }
            SnapEvent::Snapped { path, elapsed } => write!(
                f,
                "Snapshot written to {} in {}",
                path.display(),
                format_elapsed(*elapsed)
            ),
        }
    }
}

/// Callback invoked synchronously for each matching event.
pub type Listener = Arc<dyn Fn(&SnapEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&SnapEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by [`EventNotifier::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: Option<EventKind>,
    listener: Listener,
}

/// In-process publisher for [`SnapEvent`]s.
///
/// Listeners run on the caller's task, in registration order. The first
/// listener error stops delivery and is returned from [`notify`](Self::notify);
/// listeners are trusted code, so a failing one aborts the snapshot.
#[derive(Default)]
pub struct EventNotifier {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.register(Some(kind), listener)
    }

    /// Subscribe to every event.
    pub fn on_any(&mut self, listener: Listener) -> ListenerId {
        self.register(None, listener)
    }

    fn register(&mut self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.registrations.push(Registration { id, kind, listener });
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.registrations.len()
    }

    /// Deliver `event` to every matching listener.
    pub fn notify(&self, event: &SnapEvent) -> SnapResult<()> {
        let kind = event.kind();
        tracing::debug!("event {}: {}", kind, event);

        for registration in &self.registrations {
            if registration.kind.map_or(true, |k| k == kind) {
                (registration.listener)(event)
                    .map_err(|e| SnapError::hook(format!("listener[{}]", kind), e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |event| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.kind()));
            Ok(())
        })
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("exploded"), None);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = EventNotifier::new();
        notifier.on(EventKind::DumpingData, recorder(&log, "first"));
        notifier.on_any(recorder(&log, "any"));
        notifier.on(EventKind::DumpingData, recorder(&log, "second"));

        notifier.notify(&SnapEvent::DumpingData).unwrap();
        notifier.notify(&SnapEvent::DumpingViews).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:dumping_data",
                "any:dumping_data",
                "second:dumping_data",
                "any:dumping_views"
            ]
        );
    }

    #[test]
    fn test_off_removes_listener() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = EventNotifier::new();
        let id = notifier.on(EventKind::Snapped, recorder(&log, "x"));
        assert!(notifier.off(id));
        assert!(!notifier.off(id));
        assert_eq!(notifier.listener_count(), 0);

        notifier
            .notify(&SnapEvent::Snapped {
                path: PathBuf::from("/tmp/app.sql"),
                elapsed: Duration::from_secs(1),
            })
            .unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_listener_error_stops_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = EventNotifier::new();
        notifier.on(
            EventKind::DumpingSchema,
            listener(|_| anyhow::bail!("progress bar crashed")),
        );
        notifier.on(EventKind::DumpingSchema, recorder(&log, "late"));

        let err = notifier.notify(&SnapEvent::DumpingSchema).unwrap_err();
        assert!(err.is_hook());
        assert!(err.to_string().contains("listener[dumping_schema]"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_event_display() {
        let event = SnapEvent::TableDumped {
            table: "users".into(),
            rows: 6,
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(event.to_string(), "Dumped 6 rows of 'users' in 1.50s");
    }
}
