// ABOUTME: Snapshot run configuration and TOML profile loading
// ABOUTME: Resolves `extends` chains once, then produces one flat SnapperConfig

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::connection::{ConnectionParams, PortValue};
use crate::error::{SnapError, SnapResult};
use crate::events::{EventKind, Listener};
use crate::filter::WhereClause;
use crate::transform::RowTransformer;
use crate::writer;

/// Name of the configuration file looked up when none is given.
pub const CONFIG_FILE_NAME: &str = "snapper.toml";

/// Everything one `snap()` run needs.
///
/// Not modified while a run is in progress; the [`Snapper`](crate::snapper::Snapper)
/// takes it by value and only hands out shared references.
#[derive(Clone)]
pub struct SnapperConfig {
    pub connection: ConnectionParams,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub output_dir: PathBuf,
    /// Base name of the snapshot file, without extension.
    pub output_file_name: String,
    pub compress: bool,
    /// Write the generation time into the header and footer comments.
    pub dump_date: bool,
    pub dump_schema: bool,
    pub dump_data: bool,
    pub dump_routines: bool,
    pub default_where: WhereClause,
    pub wheres: HashMap<String, WhereClause>,
    pub row_transformers: HashMap<String, RowTransformer>,
    /// Lifecycle listeners attached for the duration of every run.
    pub hooks: Vec<(EventKind, Listener)>,
    /// Files copied verbatim to the end of the snapshot.
    pub append: Vec<PathBuf>,
}

impl fmt::Debug for SnapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut transformers: Vec<&String> = self.row_transformers.keys().collect();
        transformers.sort();
        f.debug_struct("SnapperConfig")
            .field("connection", &self.connection)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("output_dir", &self.output_dir)
            .field("output_file_name", &self.output_file_name)
            .field("compress", &self.compress)
            .field("dump_date", &self.dump_date)
            .field("dump_schema", &self.dump_schema)
            .field("dump_data", &self.dump_data)
            .field("dump_routines", &self.dump_routines)
            .field("default_where", &self.default_where)
            .field("wheres", &self.wheres)
            .field("row_transformers", &transformers)
            .field("hooks", &self.hooks.iter().map(|(k, _)| *k).collect::<Vec<_>>())
            .field("append", &self.append)
            .finish()
    }
}

impl SnapperConfig {
    /// Defaults: everything dumped, uncompressed, to `./{database}.sql`.
    pub fn new(connection: ConnectionParams) -> Self {
        let output_file_name = connection.database.clone();
        Self {
            connection,
            charset: None,
            collation: None,
            output_dir: PathBuf::from("."),
            output_file_name,
            compress: false,
            dump_date: true,
            dump_schema: true,
            dump_data: true,
            dump_routines: true,
            default_where: WhereClause::default(),
            wheres: HashMap::new(),
            row_transformers: HashMap::new(),
            hooks: Vec::new(),
            append: Vec::new(),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_output_file_name(mut self, name: impl Into<String>) -> Self {
        self.output_file_name = name.into();
        self
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    pub fn with_dump_date(mut self, dump_date: bool) -> Self {
        self.dump_date = dump_date;
        self
    }

    /// Dump rows only: no table, view, trigger or routine DDL.
    pub fn data_only(mut self) -> Self {
        self.dump_schema = false;
        self.dump_routines = false;
        self
    }

    /// Dump DDL only: no rows.
    pub fn no_data(mut self) -> Self {
        self.dump_data = false;
        self
    }

    /// Where-clause used for tables without an override.
    pub fn with_default_where(mut self, clause: impl Into<WhereClause>) -> Self {
        self.default_where = clause.into();
        self
    }

    pub fn with_where(mut self, table: impl Into<String>, clause: impl Into<WhereClause>) -> Self {
        self.wheres.insert(table.into(), clause.into());
        self
    }

    pub fn with_row_transformer(
        mut self,
        table: impl Into<String>,
        transformer: RowTransformer,
    ) -> Self {
        self.row_transformers.insert(table.into(), transformer);
        self
    }

    pub fn with_hook(mut self, kind: EventKind, listener: Listener) -> Self {
        self.hooks.push((kind, listener));
        self
    }

    pub fn with_append(mut self, path: impl Into<PathBuf>) -> Self {
        self.append.push(path.into());
        self
    }

    /// Where the snapshot of this run will be written.
    pub fn snapshot_path(&self) -> PathBuf {
        writer::snapshot_path(&self.output_dir, &self.output_file_name, self.compress)
    }

    /// Check the whole configuration before any I/O happens.
    pub fn validate(&self) -> SnapResult<()> {
        self.connection.validate()?;

        let name = self.output_file_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(SnapError::configuration(format!(
                "field 'output_file_name' must be a plain file name, got '{}'",
                self.output_file_name
            )));
        }

        if !self.dump_schema && !self.dump_data {
            return Err(SnapError::configuration(
                "'data_only' and 'no_data' cannot both be set",
            ));
        }

        for (field, value) in [
            ("database_charset", &self.charset),
            ("database_collation", &self.collation),
        ] {
            if let Some(value) = value {
                if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(SnapError::configuration(format!(
                        "field '{}' has invalid value '{}'",
                        field, value
                    )));
                }
            }
        }

        Ok(())
    }
}

/// One profile as written in the configuration file, after `extends` resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub driver: Option<String>,
    pub host: Option<String>,
    pub socket: Option<PathBuf>,
    pub port: Option<PortValue>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database_name: Option<String>,
    pub database_charset: Option<String>,
    pub database_collation: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub output_file_name: Option<String>,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub skip_dump_date: bool,
    #[serde(default)]
    pub data_only: bool,
    #[serde(default)]
    pub no_data: bool,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub wheres: BTreeMap<String, String>,
    #[serde(default)]
    pub append: Vec<PathBuf>,
}

impl ProfileConfig {
    /// Validated connection parameters of this profile.
    pub fn connection_params(&self) -> SnapResult<ConnectionParams> {
        let server = self
            .host
            .clone()
            .or_else(|| self.socket.as_ref().map(|s| s.display().to_string()))
            .unwrap_or_else(|| "<no server>".to_string());
        let database = self.database_name.clone().unwrap_or_default();

        let port = match &self.port {
            Some(port) => Some(port.to_port().map_err(|e| {
                SnapError::configuration(format!("field 'port': {} for {}/{}", e, server, database))
            })?),
            None => None,
        };

        let params = ConnectionParams {
            host: self.host.clone(),
            port,
            socket: self.socket.clone(),
            user: self.username.clone().unwrap_or_default(),
            password: self.password.clone(),
            database,
        };
        params.validate()?;
        Ok(params)
    }

    /// Flatten this profile into a run configuration.
    pub fn into_snapper_config(self) -> SnapResult<SnapperConfig> {
        match self.driver.as_deref() {
            None | Some("mysql") => {}
            Some(other) => {
                return Err(SnapError::configuration(format!(
                    "field 'driver': unsupported driver '{}' (only 'mysql' is supported)",
                    other
                )))
            }
        }

        if self.data_only && self.no_data {
            return Err(SnapError::configuration(
                "'data_only' and 'no_data' cannot both be set",
            ));
        }

        let mut config = SnapperConfig::new(self.connection_params()?).with_compress(self.compress);
        config.charset = self.database_charset;
        config.collation = self.database_collation;
        config.dump_date = !self.skip_dump_date;
        config.dump_schema = !self.data_only;
        config.dump_routines = !self.data_only;
        config.dump_data = !self.no_data;
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(name) = self.output_file_name {
            config.output_file_name = name;
        }
        if let Some(clause) = self.where_clause {
            config.default_where = WhereClause::Static(clause);
        }
        config.wheres = self
            .wheres
            .into_iter()
            .map(|(table, clause)| (table, WhereClause::Static(clause)))
            .collect();
        config.append = self.append;

        config.validate()?;
        Ok(config)
    }
}

/// A parsed configuration file holding named profiles.
///
/// ```toml
/// [profiles.base]
/// host = "db.internal"
/// port = 3306
/// username = "snapper"
/// database_name = "app"
///
/// [profiles.staging]
/// extends = "base"
/// compress = true
///
/// [profiles.staging.wheres]
/// users = "created_at > NOW() - INTERVAL 30 DAY"
/// ```
#[derive(Debug, Clone)]
pub struct ConfigFile {
    profiles: toml::Table,
}

impl ConfigFile {
    pub fn parse(text: &str) -> SnapResult<Self> {
        let mut root: toml::Table = text
            .parse()
            .map_err(|e| SnapError::configuration(format!("invalid TOML: {}", e)))?;

        let profiles = match root.remove("profiles") {
            Some(toml::Value::Table(profiles)) => profiles,
            Some(_) => {
                return Err(SnapError::configuration("'profiles' must be a table"));
            }
            None => toml::Table::new(),
        };

        if let Some(key) = root.keys().next() {
            return Err(SnapError::configuration(format!(
                "unknown top-level key '{}' (profiles live under [profiles.<name>])",
                key
            )));
        }

        for (name, profile) in &profiles {
            if !profile.is_table() {
                return Err(SnapError::configuration(format!(
                    "profile '{}' must be a table",
                    name
                )));
            }
        }

        Ok(Self { profiles })
    }

    pub fn load(path: &Path) -> SnapResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SnapError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::parse(&text)
    }

    /// `./snapper.toml` if it exists, else `~/.config/db-snapper/snapper.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("db-snapper").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Walk the `extends` chain of `name` and merge it into one profile.
    pub fn resolve(&self, name: &str) -> SnapResult<ProfileConfig> {
        let mut chain: Vec<&toml::Table> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut current = name.to_string();

        loop {
            if seen.contains(&current) {
                seen.push(current);
                return Err(SnapError::configuration(format!(
                    "profile inheritance cycle: {}",
                    seen.join(" -> ")
                )));
            }

            let table = self
                .profiles
                .get(&current)
                .and_then(toml::Value::as_table)
                .ok_or_else(|| match seen.last() {
                    Some(child) => SnapError::configuration(format!(
                        "profile '{}' extends unknown profile '{}'",
                        child, current
                    )),
                    None => SnapError::configuration(format!("unknown profile '{}'", current)),
                })?;

            chain.push(table);
            seen.push(current.clone());

            match table.get("extends") {
                None => break,
                Some(toml::Value::String(base)) => current = base.clone(),
                Some(_) => {
                    return Err(SnapError::configuration(format!(
                        "field 'extends' of profile '{}' must be a string",
                        current
                    )))
                }
            }
        }

        let mut merged = toml::Table::new();
        for table in chain.into_iter().rev() {
            merge_tables(&mut merged, table);
        }
        merged.remove("extends");

        if seen.len() > 1 {
            tracing::debug!("Profile '{}' resolved through {}", name, seen.join(" -> "));
        }

        toml::Value::Table(merged)
            .try_into::<ProfileConfig>()
            .map_err(|e| SnapError::configuration(format!("profile '{}': {}", name, e)))
    }

    /// Resolve `name` and turn it into a validated run configuration.
    pub fn snapper_config(&self, name: &str) -> SnapResult<SnapperConfig> {
        self.resolve(name)?.into_snapper_config()
    }
}

/// Child keys override base keys; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(child)) => {
                merge_tables(existing, child);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}
