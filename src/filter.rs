// ABOUTME: Per-table row filtering for the data-dump phase
// ABOUTME: Static or dynamically computed where-clauses with a global fallback

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SnapperConfig;
use crate::error::{SnapError, SnapResult};
use crate::source::SnapSource;

/// Where-clause used when nothing else is configured.
pub const DEFAULT_WHERE: &str = "true";

/// A where-clause computed at dump time from the live connection and the config.
#[async_trait]
pub trait DynamicWhere: Send + Sync {
    async fn resolve(
        &self,
        source: &mut dyn SnapSource,
        config: &SnapperConfig,
    ) -> anyhow::Result<String>;
}

struct ConfigFn<F>(F);

#[async_trait]
impl<F> DynamicWhere for ConfigFn<F>
where
    F: Fn(&SnapperConfig) -> anyhow::Result<String> + Send + Sync,
{
    async fn resolve(
        &self,
        _source: &mut dyn SnapSource,
        config: &SnapperConfig,
    ) -> anyhow::Result<String> {
        (self.0)(config)
    }
}

/// Wrap a closure that only needs the config as a dynamic where-clause.
///
/// Use a [`DynamicWhere`] implementation instead when the clause depends on
/// data in the source database.
pub fn where_fn<F>(f: F) -> WhereClause
where
    F: Fn(&SnapperConfig) -> anyhow::Result<String> + Send + Sync + 'static,
{
    WhereClause::Dynamic(Arc::new(ConfigFn(f)))
}

/// Filter strategy for one table (or the global default).
#[derive(Clone)]
pub enum WhereClause {
    Static(String),
    Dynamic(Arc<dyn DynamicWhere>),
}

impl WhereClause {
    pub fn dynamic(resolver: impl DynamicWhere + 'static) -> Self {
        WhereClause::Dynamic(Arc::new(resolver))
    }
}

impl fmt::Debug for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereClause::Static(clause) => f.debug_tuple("Static").field(clause).finish(),
            WhereClause::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

impl Default for WhereClause {
    fn default() -> Self {
        WhereClause::Static(DEFAULT_WHERE.to_string())
    }
}

impl From<&str> for WhereClause {
    fn from(value: &str) -> Self {
        WhereClause::Static(value.to_string())
    }
}

impl From<String> for WhereClause {
    fn from(value: String) -> Self {
        WhereClause::Static(value)
    }
}

/// Collapse a clause onto one line: newlines dropped, runs of whitespace squeezed.
///
/// # Examples
///
/// ```
/// use db_snapper::filter::normalize_where;
/// assert_eq!(normalize_where("id > 10\n  AND  active = 1"), "id > 10 AND active = 1");
/// ```
pub fn normalize_where(clause: &str) -> String {
    clause.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves the effective where-clause per table: override first, then default.
pub struct WhereResolver<'a> {
    default: &'a WhereClause,
    overrides: &'a HashMap<String, WhereClause>,
}

impl<'a> WhereResolver<'a> {
    pub fn new(default: &'a WhereClause, overrides: &'a HashMap<String, WhereClause>) -> Self {
        Self { default, overrides }
    }

    /// The strategy that applies to `table`.
    pub fn strategy_for(&self, table: &str) -> &'a WhereClause {
        self.overrides.get(table).unwrap_or(self.default)
    }

    /// Resolve and normalize the clause for `table`.
    ///
    /// A failing dynamic clause aborts the dump. An empty result is rejected as
    /// well: silently dumping unfiltered data is worse than failing.
    pub async fn resolve(
        &self,
        table: &str,
        source: &mut dyn SnapSource,
        config: &SnapperConfig,
    ) -> SnapResult<String> {
        let hook = format!("where[{}]", table);
        let raw = match self.strategy_for(table) {
            WhereClause::Static(clause) => clause.clone(),
            WhereClause::Dynamic(resolver) => resolver
                .resolve(source, config)
                .await
                .map_err(|e| SnapError::hook(hook.clone(), e))?,
        };

        let clause = normalize_where(&raw);
        if clause.is_empty() {
            return Err(SnapError::hook_message(hook, "resolved to an empty where-clause"));
        }
        Ok(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionParams;
    use crate::source::memory::MemorySource;

    fn config() -> SnapperConfig {
        SnapperConfig::new(ConnectionParams::tcp("localhost", 3306, "root", None, "app"))
    }

    struct MaxIdWindow;

    #[async_trait]
    impl DynamicWhere for MaxIdWindow {
        async fn resolve(
            &self,
            source: &mut dyn SnapSource,
            _config: &SnapperConfig,
        ) -> anyhow::Result<String> {
            let max = source
                .query_scalar("SELECT MAX(id) FROM users")
                .await?
                .unwrap_or_else(|| "0".to_string());
            Ok(format!("id > {} - 100", max))
        }
    }

    #[test]
    fn test_normalize_where() {
        assert_eq!(normalize_where("a = 1"), "a = 1");
        assert_eq!(normalize_where("\n a   =\r\n1 \t"), "a = 1");
        assert_eq!(normalize_where("   "), "");
    }

    #[tokio::test]
    async fn test_default_applies_without_override() {
        let default = WhereClause::default();
        let overrides = HashMap::new();
        let resolver = WhereResolver::new(&default, &overrides);
        let mut source = MemorySource::new("app");

        let clause = resolver.resolve("users", &mut source, &config()).await.unwrap();
        assert_eq!(clause, "true");
    }

    #[tokio::test]
    async fn test_override_wins_over_default() {
        let default = WhereClause::from("id < 1000");
        let mut overrides = HashMap::new();
        overrides.insert("users".to_string(), WhereClause::from("active =\n 1"));
        let resolver = WhereResolver::new(&default, &overrides);
        let mut source = MemorySource::new("app");

        assert_eq!(
            resolver.resolve("users", &mut source, &config()).await.unwrap(),
            "active = 1"
        );
        assert_eq!(
            resolver.resolve("orders", &mut source, &config()).await.unwrap(),
            "id < 1000"
        );
    }

    #[tokio::test]
    async fn test_dynamic_clause_sees_config_and_connection() {
        let default = where_fn(|config| Ok(format!("tenant = '{}'", config.connection.database)));
        let mut overrides = HashMap::new();
        overrides.insert("users".to_string(), WhereClause::dynamic(MaxIdWindow));
        let resolver = WhereResolver::new(&default, &overrides);
        let mut source = MemorySource::new("app").with_scalar("SELECT MAX(id) FROM users", "500");

        assert_eq!(
            resolver.resolve("orders", &mut source, &config()).await.unwrap(),
            "tenant = 'app'"
        );
        assert_eq!(
            resolver.resolve("users", &mut source, &config()).await.unwrap(),
            "id > 500 - 100"
        );
    }

    #[tokio::test]
    async fn test_failing_dynamic_clause_is_hook_error() {
        let default = where_fn(|_| anyhow::bail!("feature flag service unavailable"));
        let overrides = HashMap::new();
        let resolver = WhereResolver::new(&default, &overrides);
        let mut source = MemorySource::new("app");

        let err = resolver
            .resolve("users", &mut source, &config())
            .await
            .unwrap_err();
        assert!(err.is_hook());
        assert!(err.to_string().contains("where[users]"));
    }

    #[tokio::test]
    async fn test_empty_clause_is_rejected() {
        let default = WhereClause::from("  \n ");
        let overrides = HashMap::new();
        let resolver = WhereResolver::new(&default, &overrides);
        let mut source = MemorySource::new("app");

        assert!(resolver.resolve("users", &mut source, &config()).await.is_err());
    }
}
