// ABOUTME: Connection parameters for the source MySQL server
// ABOUTME: Pure validation plus in-memory driver options; no credential files

use std::path::PathBuf;

use mysql_async::{Conn, OptsBuilder};
use serde::Deserialize;

use crate::error::{SnapError, SnapResult};

/// A port as written in configuration: either a number or a digit-only string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    /// Coerce into a TCP port, rejecting anything outside 1..=65535.
    pub fn to_port(&self) -> Result<u16, String> {
        let raw = match self {
            PortValue::Number(n) => *n,
            PortValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
                    return Err(format!("port '{}' is not a number", s));
                }
                trimmed
                    .parse::<i64>()
                    .map_err(|_| format!("port '{}' is out of range", s))?
            }
        };
        if !(1..=65535).contains(&raw) {
            return Err(format!("port {} must be between 1 and 65535", raw));
        }
        Ok(raw as u16)
    }
}

/// Validated set of values used to open a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub socket: Option<PathBuf>,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

// Hand-written so the password never ends up in logs.
impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

impl ConnectionParams {
    /// TCP connection parameters.
    pub fn tcp(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: Option<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            socket: None,
            user: user.into(),
            password,
            database: database.into(),
        }
    }

    /// Unix socket connection parameters.
    pub fn socket(
        socket: impl Into<PathBuf>,
        user: impl Into<String>,
        password: Option<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: None,
            port: None,
            socket: Some(socket.into()),
            user: user.into(),
            password,
            database: database.into(),
        }
    }

    /// Identifier used in error messages: `user@host:port/db` or `user@socket/db`.
    pub fn identifier(&self) -> String {
        let server = match (&self.socket, &self.host, self.port) {
            (Some(socket), _, _) => socket.display().to_string(),
            (None, Some(host), Some(port)) => format!("{}:{}", host, port),
            (None, Some(host), None) => host.clone(),
            (None, None, _) => "<no server>".to_string(),
        };
        format!("{}@{}/{}", self.user, server, self.database)
    }

    /// Check that the parameters describe a reachable server.
    ///
    /// Requires either a socket or both host and port, a non-empty user and a
    /// database name. Performs no I/O.
    pub fn validate(&self) -> SnapResult<()> {
        let id = self.identifier();

        if self.socket.is_none() {
            match (&self.host, self.port) {
                (Some(host), Some(_)) if !host.trim().is_empty() => {}
                (Some(host), None) if !host.trim().is_empty() => {
                    return Err(SnapError::configuration(format!(
                        "field 'port' is required with 'host' for {}",
                        id
                    )));
                }
                _ => {
                    return Err(SnapError::configuration(format!(
                        "field 'host' (with 'port') or 'socket' is required for {}",
                        id
                    )));
                }
            }
        }

        if let Some(socket) = &self.socket {
            if socket.as_os_str().is_empty() {
                return Err(SnapError::configuration(format!(
                    "field 'socket' cannot be empty for {}",
                    id
                )));
            }
        }

        if let Some(0) = self.port {
            return Err(SnapError::configuration(format!(
                "field 'port' must be between 1 and 65535 for {}",
                id
            )));
        }

        if self.user.trim().is_empty() {
            return Err(SnapError::configuration(format!(
                "field 'username' must be a non-empty string for {}",
                id
            )));
        }

        if self.database.trim().is_empty() {
            return Err(SnapError::configuration(format!(
                "field 'database_name' must be a non-empty string for {}",
                id
            )));
        }

        Ok(())
    }

    /// Driver options built entirely in memory.
    pub fn to_opts(&self) -> OptsBuilder {
        let mut opts = OptsBuilder::default()
            .user(Some(self.user.clone()))
            .pass(self.password.clone())
            .db_name(Some(self.database.clone()));

        if let Some(socket) = &self.socket {
            opts = opts.socket(Some(socket.display().to_string()));
        } else {
            // Force TCP so the driver does not silently switch to a local socket
            opts = opts.prefer_socket(false);
            if let Some(host) = &self.host {
                opts = opts.ip_or_hostname(host.clone());
            }
            if let Some(port) = self.port {
                opts = opts.tcp_port(port);
            }
        }

        opts
    }
}

/// Open a connection to the source server.
///
/// Failures are surfaced as [`SnapError::Connection`]; nothing is retried.
pub async fn connect(params: &ConnectionParams) -> SnapResult<Conn> {
    params.validate()?;

    tracing::debug!("Connecting to {}", params.identifier());

    Conn::new(params.to_opts())
        .await
        .map_err(|e| SnapError::connection(format!("failed to connect to {}", params.identifier()), e))
}
