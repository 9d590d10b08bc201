// ABOUTME: Typed error taxonomy for the snapshot engine
// ABOUTME: Every failure aborts the current snap() call; nothing is retried here

use std::path::{Path, PathBuf};

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by a snapshot run.
///
/// All variants are fatal for the `snap()` call that produced them. A snapshot
/// file left behind by an aborted run must be treated as invalid by callers.
#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    /// Invalid or missing connection/snapper settings, detected before any I/O.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The database connection could not be opened or was lost.
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// A metadata query failed or returned an unexpected shape.
    #[error("schema introspection error: {message}")]
    SchemaIntrospection {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// A cell value could not be rendered as a literal.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Filesystem or compression failure while writing the snapshot.
    #[error("output error on {}: {message}", path.display())]
    Output {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A user-supplied where-clause, transformer or event listener failed.
    #[error("hook error in {hook}: {message}")]
    Hook {
        hook: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl SnapError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    pub fn introspection(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SchemaIntrospection {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Introspection failure without an underlying driver error (bad result shape).
    pub fn unexpected_shape(message: impl Into<String>) -> Self {
        Self::SchemaIntrospection {
            message: message.into(),
            source: None,
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn output(path: &Path, message: impl Into<String>, cause: std::io::Error) -> Self {
        Self::Output {
            path: path.to_path_buf(),
            message: message.into(),
            source: Some(cause),
        }
    }

    pub fn hook(hook: impl Into<String>, cause: anyhow::Error) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: format!("{:#}", cause),
            source: Some(cause),
        }
    }

    pub fn hook_message(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: message.into(),
            source: None,
        }
    }

    /// True for failures raised by user-supplied callables.
    pub fn is_hook(&self) -> bool {
        matches!(self, Self::Hook { .. })
    }
}

pub type SnapResult<T> = std::result::Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_error_names_path() {
        let err = SnapError::output(
            Path::new("/tmp/snaps/app.sql"),
            "failed to open snapshot file",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/snaps/app.sql"));
        assert!(msg.contains("failed to open snapshot file"));
    }

    #[test]
    fn test_hook_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("lookup failed").context("resolving where for users");
        let err = SnapError::hook("where[users]", cause);
        assert!(err.is_hook());
        assert!(err.to_string().contains("where[users]"));
        assert!(err.to_string().contains("lookup failed"));
    }
}
