//! Configuration for a [`Cache`].
//!
//! A builder carrying the collaborator functions (loaders and named
//! queries) together with the keying, expiry, search and derived-view
//! options.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;

use crate::cache::Cache;
use crate::error::LoadError;
use crate::expiry::{ExpiryStrategy, QueryFn, QueryOutput};
use crate::loader::{Batch, LoadAllFn, LoadOneFn};
use crate::record::Record;
use crate::search::DEFAULT_FUZZY_THRESHOLD;
use crate::sublist::Predicate;

/// Field values are keyed by unless configured otherwise.
pub const DEFAULT_KEY_PROPERTY: &str = "_id";

/// Configuration for creating a new cache instance.
///
/// ```
/// use megamap::{CacheConfig, LoadError};
/// use serde_json::{json, Value};
/// use std::time::Duration;
///
/// let config = CacheConfig::<Value>::new()
///     .load_one(|key| async move {
///         Ok::<_, LoadError>(Some(json!({ "_id": key, "status": "draft" })))
///     })
///     .expiry_interval(Duration::from_secs(30))
///     .searchable_fields(["title", "slug"])
///     .sublist("drafts", |post: &Value| post["status"] == "draft");
///
/// assert_eq!(config.get_key_property(), "_id");
/// assert_eq!(config.get_expiry_interval(), Some(Duration::from_secs(30)));
/// ```
pub struct CacheConfig<V: Record> {
    pub(crate) load_one: Option<LoadOneFn<V>>,
    pub(crate) load_all: Option<LoadAllFn<V>>,
    pub(crate) named_queries: IndexMap<String, QueryFn<V>>,

    /// Field used to key values that arrive without an explicit key.
    pub(crate) key_property: String,

    /// How long an entry or query result stays fresh. `None` means forever.
    pub(crate) expiry_interval: Option<Duration>,

    pub(crate) expiry_strategy: ExpiryStrategy,

    /// Fields `search_items` looks at, in order.
    pub(crate) searchable_fields: Vec<String>,

    /// Minimum similarity for the fuzzy search pass.
    pub(crate) fuzzy_threshold: f64,

    pub(crate) sublists: Vec<(String, Predicate<V>)>,
    pub(crate) secondary_maps: Vec<Cache<V>>,
    pub(crate) on_updated: Vec<Arc<dyn Fn() + Send + Sync>>,

    /// Period of the background `get_all(true)` task. `None` disables it.
    pub(crate) refresh_interval: Option<Duration>,
}

impl<V: Record> Default for CacheConfig<V> {
    fn default() -> Self {
        Self {
            load_one: None,
            load_all: None,
            named_queries: IndexMap::new(),
            key_property: DEFAULT_KEY_PROPERTY.to_string(),
            expiry_interval: None,
            expiry_strategy: ExpiryStrategy::default(),
            searchable_fields: Vec::new(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            sublists: Vec::new(),
            secondary_maps: Vec::new(),
            on_updated: Vec::new(),
            refresh_interval: None,
        }
    }
}

impl<V: Record> CacheConfig<V> {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the single-item fetch function. Required.
    ///
    /// Returning `Ok(None)` means the key does not exist; nothing is cached
    /// and the next read asks again.
    pub fn load_one<F, Fut>(mut self, load: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, LoadError>> + Send + 'static,
    {
        let load: LoadOneFn<V> = Arc::new(move |key: String| load(key).boxed());
        self.load_one = Some(load);
        self
    }

    /// Set the bulk fetch function used by `get_all` and periodic refresh.
    pub fn load_all<F, Fut, B>(mut self, load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, LoadError>> + Send + 'static,
        B: Into<Batch<V>>,
    {
        let load: LoadAllFn<V> =
            Arc::new(move || load().map(|result| result.map(Into::into)).boxed());
        self.load_all = Some(load);
        self
    }

    /// Register a named query. The function receives the query name and its arguments.
    pub fn named_query<F, Fut>(mut self, name: impl Into<String>, query: F) -> Self
    where
        F: Fn(String, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<QueryOutput<V>, LoadError>> + Send + 'static,
    {
        let query: QueryFn<V> =
            Arc::new(move |name: String, args: Vec<String>| query(name, args).boxed());
        self.named_queries.insert(name.into(), query);
        self
    }

    /// Set the field values are keyed by. Defaults to `_id`.
    pub fn key_property(mut self, property: impl Into<String>) -> Self {
        self.key_property = property.into();
        self
    }

    /// Set how long entries and query results stay fresh.
    ///
    /// `Duration::ZERO` disables expiry.
    pub fn expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// Choose how reads treat expired entries.
    pub fn expiry_strategy(mut self, strategy: ExpiryStrategy) -> Self {
        self.expiry_strategy = strategy;
        self
    }

    pub fn searchable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum similarity (0.0 to 1.0) for fuzzy search results.
    pub fn fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Add a named sublist. Sublists are recomputed in the order they are added.
    pub fn sublist<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        let predicate: Predicate<V> = Arc::new(predicate);
        match self.sublists.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = predicate,
            None => self.sublists.push((name, predicate)),
        }
        self
    }

    /// Add a cache that mirrors this one's writes.
    pub fn secondary_map(mut self, map: Cache<V>) -> Self {
        self.secondary_maps.push(map);
        self
    }

    /// Add a callback run on every update, after sublists are recomputed.
    pub fn on_updated<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_updated.push(Arc::new(callback));
        self
    }

    /// Reload everything on a fixed period. `Duration::ZERO` disables it.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    pub fn get_key_property(&self) -> &str {
        &self.key_property
    }

    pub fn get_expiry_interval(&self) -> Option<Duration> {
        self.expiry_interval
    }

    pub fn get_expiry_strategy(&self) -> ExpiryStrategy {
        self.expiry_strategy
    }

    pub fn get_refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }
}

impl<V: Record> fmt::Debug for CacheConfig<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("load_one", &self.load_one.is_some())
            .field("load_all", &self.load_all.is_some())
            .field("named_queries", &self.named_queries.keys().collect::<Vec<_>>())
            .field("key_property", &self.key_property)
            .field("expiry_interval", &self.expiry_interval)
            .field("expiry_strategy", &self.expiry_strategy)
            .field("searchable_fields", &self.searchable_fields)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field(
                "sublists",
                &self.sublists.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("secondary_maps", &self.secondary_maps.len())
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::<Value>::default();
        assert!(config.load_one.is_none());
        assert_eq!(config.get_key_property(), "_id");
        assert!(config.get_expiry_interval().is_none());
        assert_eq!(config.get_expiry_strategy(), ExpiryStrategy::BlockAndRefresh);
        assert!(config.get_refresh_interval().is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = CacheConfig::<Value>::new()
            .key_property("slug")
            .expiry_interval(Duration::from_secs(60))
            .expiry_strategy(ExpiryStrategy::StaleWhileRevalidate)
            .searchable_fields(["title", "content"])
            .refresh_interval(Duration::from_secs(5));

        assert_eq!(config.get_key_property(), "slug");
        assert_eq!(config.get_expiry_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.searchable_fields, vec!["title", "content"]);
        assert_eq!(config.get_refresh_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_durations_disable() {
        let config = CacheConfig::<Value>::new()
            .expiry_interval(Duration::ZERO)
            .refresh_interval(Duration::ZERO);
        assert!(config.get_expiry_interval().is_none());
        assert!(config.get_refresh_interval().is_none());
    }

    #[test]
    fn test_sublist_names_are_unique() {
        let config = CacheConfig::<Value>::new()
            .sublist("active", |_: &Value| true)
            .sublist("draft", |_: &Value| false)
            .sublist("active", |_: &Value| false);

        let names: Vec<&str> = config.sublists.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["active", "draft"]);
    }

    #[test]
    fn test_fuzzy_threshold_is_clamped() {
        let config = CacheConfig::<Value>::new().fuzzy_threshold(4.0);
        assert_eq!(config.fuzzy_threshold, 1.0);
    }
}
