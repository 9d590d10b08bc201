// ABOUTME: Library root for db-snapper
// ABOUTME: Filtered, anonymized MySQL snapshots written as one replayable file

pub mod column;
pub mod commands;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod error;
pub mod events;
pub mod filter;
pub mod restore;
pub mod snapper;
pub mod source;
pub mod transform;
pub mod utils;
pub mod value;
pub mod writer;

pub use config::{ConfigFile, SnapperConfig};
pub use connection::ConnectionParams;
pub use error::{SnapError, SnapResult};
pub use events::{EventKind, SnapEvent};
pub use snapper::{SnapSummary, Snapper};
