//! The main cache interface.
//!
//! [`Cache`] composes the layers: the entry store, the deduplicating
//! loader, expiry and named queries, then on top of those secondary-map
//! propagation, derived sublists and search. Every handle is cheap to clone
//! and shares the same state.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{ensure_key, CacheError, CacheResult};
use crate::events::{CacheEvent, ListenerId};
use crate::expiry::{ExpiringLoader, ExpiryOptions, ExpiryStrategy, QueryOutput};
use crate::loader::{LoadSink, Loader};
use crate::lock::{mutex_lock, rw_read, rw_write};
use crate::record::{key_of, Record};
use crate::search;
use crate::stats::{CacheStats, LoadingStatus, StatsSnapshot};
use crate::storage::Store;
use crate::sublist::SubLists;

const SOURCE: &str = "cache";

/// A lazily-loaded, self-refreshing key/value cache.
///
/// # Example
/// ```
/// use megamap::{Cache, CacheConfig, LoadError};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), megamap::CacheError> {
/// let cache = Cache::new(
///     CacheConfig::<Value>::new()
///         .load_one(|key| async move {
///             Ok::<_, LoadError>(Some(json!({ "_id": key, "status": "active" })))
///         })
///         .sublist("active", |v: &Value| v["status"] == "active"),
/// )?;
///
/// let post = cache.get("p1").await?;
/// assert_eq!(post.unwrap()["_id"], "p1");
/// assert_eq!(cache.sublist("active").unwrap().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Cache<V: Record> {
    inner: Arc<Inner<V>>,
}

struct Inner<V: Record> {
    store: Arc<Store<V>>,
    layers: ExpiringLoader<V>,
    key_property: String,
    searchable_fields: Vec<String>,
    fuzzy_threshold: f64,
    sublists: Arc<SubLists<V>>,
    secondaries: Arc<RwLock<Vec<Cache<V>>>>,
    stats: Arc<CacheStats>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Record> Drop for Inner<V> {
    fn drop(&mut self) {
        let task = match self.refresh_task.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl<V: Record> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Record> Cache<V> {
    /// Create a new cache from its configuration.
    ///
    /// Fails when no single-item loader is configured, when periodic refresh
    /// is requested without a bulk loader, or outside a Tokio runtime when
    /// periodic refresh is requested.
    pub fn new(config: CacheConfig<V>) -> CacheResult<Self> {
        let CacheConfig {
            load_one,
            load_all,
            named_queries,
            key_property,
            expiry_interval,
            expiry_strategy,
            searchable_fields,
            fuzzy_threshold,
            sublists,
            secondary_maps,
            on_updated,
            refresh_interval,
        } = config;

        let load_one = load_one.ok_or(CacheError::MissingLoader)?;
        if refresh_interval.is_some() && load_all.is_none() {
            return Err(CacheError::MissingBulkLoader);
        }

        let stats = Arc::new(CacheStats::new());
        let store = Arc::new(Store::new(Arc::clone(&stats)));
        let secondaries = Arc::new(RwLock::new(Vec::new()));
        let sink = mirror_sink(Arc::clone(&secondaries));

        let loader = Loader::new(
            Arc::clone(&store),
            &key_property,
            load_one,
            load_all,
            Some(Arc::clone(&sink)),
            Arc::clone(&stats),
        );
        let layers = ExpiringLoader::new(
            loader,
            Arc::clone(&store),
            ExpiryOptions {
                ttl: expiry_interval,
                strategy: expiry_strategy,
                key_property: key_property.clone(),
                queries: named_queries,
                sink: Some(sink),
            },
            Arc::clone(&stats),
        );

        // Sublists are refreshed before any external observer runs.
        let sublists = Arc::new(SubLists::new(sublists));
        if !sublists.is_empty() {
            let views = Arc::clone(&sublists);
            let source = Arc::downgrade(&store);
            store.notifier().on(CacheEvent::Updated, move |_| {
                if let Some(store) = source.upgrade() {
                    views.refresh_from(|| store.values());
                }
            });
        }
        for callback in on_updated {
            store.notifier().on(CacheEvent::Updated, move |_| callback());
        }

        let cache = Self {
            inner: Arc::new(Inner {
                store,
                layers,
                key_property,
                searchable_fields,
                fuzzy_threshold,
                sublists,
                secondaries,
                stats,
                refresh_task: Mutex::new(None),
            }),
        };

        for map in secondary_maps {
            cache.add_secondary_map(map);
        }
        if let Some(period) = refresh_interval {
            cache.spawn_refresh(period)?;
        }

        Ok(cache)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Whether `key` is in memory. Never triggers a load.
    pub fn has(&self, key: &str) -> bool {
        self.inner.store.has(key)
    }

    /// The in-memory value for `key`, fresh or not. Never triggers a load.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner.store.get(key)
    }

    /// Get the value for `key`, loading it when absent or expired.
    ///
    /// Concurrent calls for the same key share one fetch. A failed or empty
    /// fetch resolves to `Ok(None)`; only an empty key is an error.
    pub async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        self.inner.layers.get(key).await
    }

    /// Alias for [`Cache::get`].
    pub async fn load(&self, key: &str) -> CacheResult<Option<V>> {
        self.get(key).await
    }

    /// The first in-memory value whose `field` renders as `value`.
    pub fn get_by(&self, field: &str, value: &str) -> Option<V> {
        self.inner.store.find_by(field, value)
    }

    /// Every entry, loading in bulk when the cache is empty or `refresh` is set.
    ///
    /// Resolves to `Ok(None)` when the bulk loader fails.
    pub async fn get_all(&self, refresh: bool) -> CacheResult<Option<IndexMap<String, V>>> {
        self.inner.layers.get_all(refresh).await
    }

    /// Reload everything from the bulk loader.
    pub async fn force_refresh(&self) -> CacheResult<Option<IndexMap<String, V>>> {
        self.get_all(true).await
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.store.keys()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.store.values()
    }

    pub fn entries(&self) -> IndexMap<String, V> {
        self.inner.store.snapshot()
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Store `value` under `key`, as fresh as a load, and mirror it to secondary maps.
    pub fn set(&self, key: impl Into<String>, value: V) -> CacheResult<()> {
        let key = key.into();
        ensure_key(&key)?;
        self.inner.store.set(key, value.clone());
        self.propagate(std::slice::from_ref(&value));
        Ok(())
    }

    /// Store `value` under its key property. Returns the key used.
    pub fn insert(&self, value: V) -> CacheResult<String> {
        let key = self.key_for(&value)?;
        self.set(key.clone(), value)?;
        Ok(key)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        match self.inner.store.delete(key) {
            Some(removed) => {
                self.propagate_removal(&removed);
                true
            }
            None => false,
        }
    }

    /// Remove the first value whose `field` renders as `value`.
    pub fn delete_by(&self, field: &str, value: &str) -> bool {
        match self.inner.store.delete_by(field, value) {
            Some(removed) => {
                self.propagate_removal(&removed);
                true
            }
            None => false,
        }
    }

    /// Empty the store and the query cache. Secondary maps keep their contents.
    pub fn clear(&self) {
        self.inner.layers.clear_queries();
        self.inner.store.clear();
    }

    /// Insert every item under its key property with a single notification.
    ///
    /// All-or-nothing: if any item lacks a key, nothing is written.
    pub fn bulk_add(&self, items: impl IntoIterator<Item = V>) -> CacheResult<usize> {
        let keyed = items
            .into_iter()
            .map(|value| Ok((self.key_for(&value)?, value)))
            .collect::<CacheResult<Vec<(String, V)>>>()?;

        let count = keyed.len();
        let values: Vec<V> = keyed.iter().map(|(_, value)| value.clone()).collect();
        self.inner.store.apply_batch(keyed);
        self.propagate(&values);
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Secondary maps
    // ---------------------------------------------------------------

    /// Register `map` as a mirror of this cache and copy the current contents into it.
    pub fn add_secondary_map(&self, map: Cache<V>) {
        map.mirror(&self.values());
        rw_write(&self.inner.secondaries, SOURCE, "add_secondary_map").push(map);
    }

    pub fn secondary_map_count(&self) -> usize {
        rw_read(&self.inner.secondaries, SOURCE, "secondary_map_count").len()
    }

    /// Apply values written to a primary. Never fails: values without a key
    /// under this cache's key property are skipped.
    fn mirror(&self, values: &[V]) {
        let keyed: Vec<(String, V)> = values
            .iter()
            .filter_map(|value| match key_of(value, &self.inner.key_property) {
                Some(key) => Some((key, value.clone())),
                None => {
                    debug!(
                        key_property = %self.inner.key_property,
                        "Secondary map skipped value without a key"
                    );
                    None
                }
            })
            .collect();
        if keyed.is_empty() {
            return;
        }

        let mirrored: Vec<V> = keyed.iter().map(|(_, value)| value.clone()).collect();
        self.inner.store.apply_batch(keyed);
        self.propagate(&mirrored);
    }

    fn propagate(&self, values: &[V]) {
        for map in self.secondaries() {
            map.mirror(values);
        }
    }

    fn propagate_removal(&self, removed: &V) {
        for map in self.secondaries() {
            if let Some(key) = key_of(removed, &map.inner.key_property) {
                map.delete(&key);
            }
        }
    }

    fn secondaries(&self) -> Vec<Cache<V>> {
        rw_read(&self.inner.secondaries, SOURCE, "secondaries").clone()
    }

    // ---------------------------------------------------------------
    // Derived views and search
    // ---------------------------------------------------------------

    /// Current contents of a named sublist.
    pub fn sublist(&self, name: &str) -> Option<Vec<V>> {
        self.inner.sublists.get(name)
    }

    /// Every sublist, in registration order.
    pub fn sublists(&self) -> IndexMap<String, Vec<V>> {
        self.inner.sublists.snapshot()
    }

    pub fn filter_items<F>(&self, predicate: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        self.values().into_iter().filter(|value| predicate(value)).collect()
    }

    pub fn sort_items<F>(&self, compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut values = self.values();
        values.sort_by(compare);
        values
    }

    /// Search the searchable fields: substring match first, fuzzy match only if that finds nothing.
    pub fn search_items(&self, query: &str) -> Vec<V> {
        search::search(
            self.values(),
            &self.inner.searchable_fields,
            query,
            self.inner.fuzzy_threshold,
        )
    }

    // ---------------------------------------------------------------
    // Named queries
    // ---------------------------------------------------------------

    /// Run a named query, serving a fresh cached result when there is one.
    ///
    /// Unlike [`Cache::get`], failures of the query function are returned.
    pub async fn execute_query<I, S>(&self, name: &str, args: I) -> CacheResult<QueryOutput<V>>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let args = args.into_iter().map(|arg| arg.to_string()).collect();
        self.inner.layers.execute_query(name, args).await
    }

    /// A handle on a registered named query.
    pub fn query(&self, name: &str) -> CacheResult<Query<'_, V>> {
        if self.inner.layers.query_names().is_empty() {
            return Err(CacheError::NoNamedQueries);
        }
        if !self.inner.layers.has_query(name) {
            return Err(CacheError::UnknownQuery(name.to_string()));
        }
        Ok(Query {
            cache: self,
            name: name.to_string(),
        })
    }

    pub fn query_names(&self) -> Vec<String> {
        self.inner.layers.query_names()
    }

    // ---------------------------------------------------------------
    // Notification and status
    // ---------------------------------------------------------------

    /// Subscribe to an event. Listeners run synchronously after each mutation.
    pub fn on<F>(&self, event: CacheEvent, listener: F) -> ListenerId
    where
        F: Fn(CacheEvent) + Send + Sync + 'static,
    {
        self.inner.store.notifier().on(event, listener)
    }

    pub fn off(&self, event: CacheEvent, id: ListenerId) -> bool {
        self.inner.store.notifier().off(event, id)
    }

    pub fn loading_status(&self) -> LoadingStatus {
        let loader = self.inner.layers.loader();
        LoadingStatus {
            all: loader.loading_all(),
            keys: loader.loading_keys(),
            queries: self.inner.layers.loading_queries(),
        }
    }

    /// Whether a bulk load has completed at least once.
    pub fn has_loaded_once(&self) -> bool {
        self.inner.layers.loader().has_loaded_once()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn stats_ref(&self) -> Arc<CacheStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn key_property(&self) -> &str {
        &self.inner.key_property
    }

    pub fn expiry_strategy(&self) -> ExpiryStrategy {
        self.inner.layers.strategy()
    }

    fn key_for(&self, value: &V) -> CacheResult<String> {
        key_of(value, &self.inner.key_property).ok_or_else(|| CacheError::MissingKeyProperty {
            property: self.inner.key_property.clone(),
        })
    }

    /// Tick `get_all(true)` every `period` until the last handle is dropped.
    fn spawn_refresh(&self, period: Duration) -> CacheResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        let weak = Arc::downgrade(&self.inner);

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let cache = Cache { inner };
                info!(period_ms = period.as_millis() as u64, "Periodic refresh");
                if let Err(err) = cache.get_all(true).await {
                    warn!(error = %err, "Periodic refresh failed");
                }
            }
        });

        *mutex_lock(&self.inner.refresh_task, SOURCE, "spawn_refresh") = Some(task);
        Ok(())
    }
}

impl<V: Record> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("key_property", &self.inner.key_property)
            .field("len", &self.len())
            .field("sublists", &self.inner.sublists)
            .field("secondary_maps", &self.secondary_map_count())
            .finish()
    }
}

/// A registered named query, bound to its cache.
#[derive(Debug)]
pub struct Query<'a, V: Record> {
    cache: &'a Cache<V>,
    name: String,
}

impl<V: Record> Query<'_, V> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run<I, S>(&self, args: I) -> CacheResult<QueryOutput<V>>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.cache.execute_query(&self.name, args).await
    }
}

/// Forward loaded values to every secondary map. Holds no reference to the primary.
fn mirror_sink<V: Record>(secondaries: Arc<RwLock<Vec<Cache<V>>>>) -> LoadSink<V> {
    Arc::new(move |values: &[V]| {
        let targets = rw_read(&secondaries, SOURCE, "mirror_sink").clone();
        for map in targets {
            map.mirror(values);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn echo_config() -> CacheConfig<Value> {
        CacheConfig::new().load_one(|key| async move {
            Ok::<_, LoadError>(Some(json!({"_id": key, "data": format!("Data for {key}")})))
        })
    }

    #[test]
    fn test_missing_loader() {
        let err = Cache::new(CacheConfig::<Value>::new()).unwrap_err();
        assert!(matches!(err, CacheError::MissingLoader));
    }

    #[test]
    fn test_refresh_requires_bulk_loader() {
        let config = echo_config().refresh_interval(Duration::from_secs(1));
        assert!(matches!(
            Cache::new(config).unwrap_err(),
            CacheError::MissingBulkLoader
        ));
    }

    #[test]
    fn test_refresh_requires_runtime() {
        let config = echo_config()
            .load_all(|| async { Ok::<_, LoadError>(Vec::<Value>::new()) })
            .refresh_interval(Duration::from_secs(1));
        assert!(matches!(Cache::new(config).unwrap_err(), CacheError::NoRuntime));
    }

    #[test]
    fn test_cache_is_clone() {
        let cache1 = Cache::new(echo_config()).unwrap();
        cache1.set("key", json!({"_id": "key"})).unwrap();

        let cache2 = cache1.clone();
        assert_eq!(cache2.peek("key"), Some(json!({"_id": "key"})));

        cache2.set("key2", json!({"_id": "key2"})).unwrap();
        assert!(cache1.has("key2"));
    }

    #[test]
    fn test_set_rejects_empty_key() {
        let cache = Cache::new(echo_config()).unwrap();
        assert!(matches!(cache.set("", json!({})), Err(CacheError::EmptyKey)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_uses_key_property() {
        let cache = Cache::new(echo_config().key_property("slug")).unwrap();

        let key = cache.insert(json!({"slug": "hello", "title": "Hello"})).unwrap();
        assert_eq!(key, "hello");
        assert!(cache.has("hello"));

        assert!(matches!(
            cache.insert(json!({"title": "no slug"})),
            Err(CacheError::MissingKeyProperty { .. })
        ));
    }

    #[test]
    fn test_bulk_add_is_all_or_nothing() {
        let cache = Cache::new(echo_config()).unwrap();
        let result = cache.bulk_add(vec![json!({"_id": "a"}), json!({"name": "keyless"})]);

        assert!(matches!(result, Err(CacheError::MissingKeyProperty { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bulk_add_notifies_once() {
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let cache = Cache::new(echo_config().on_updated(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }))
        .unwrap();

        let added = cache
            .bulk_add((0..10).map(|i| json!({"_id": format!("k{i}")})))
            .unwrap();
        assert_eq!(added, 10);
        assert_eq!(updates.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_delete_and_delete_by() {
        let cache = Cache::new(echo_config()).unwrap();
        cache
            .bulk_add(vec![
                json!({"_id": "a", "slug": "first"}),
                json!({"_id": "b", "slug": "second"}),
            ])
            .unwrap();

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert!(cache.delete_by("slug", "second"));
        assert!(!cache.delete_by("slug", "second"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_by() {
        let cache = Cache::new(echo_config()).unwrap();
        cache.insert(json!({"_id": "a", "slug": "hello"})).unwrap();

        assert_eq!(cache.get_by("slug", "hello").unwrap()["_id"], "a");
        assert!(cache.get_by("slug", "nope").is_none());
    }

    #[test]
    fn test_filter_and_sort_items() {
        let cache = Cache::new(echo_config()).unwrap();
        cache
            .bulk_add(vec![
                json!({"_id": "a", "rank": 3}),
                json!({"_id": "b", "rank": 1}),
                json!({"_id": "c", "rank": 2}),
            ])
            .unwrap();

        let high = cache.filter_items(|v| v["rank"].as_i64().unwrap_or(0) >= 2);
        assert_eq!(high.len(), 2);

        let sorted = cache.sort_items(|a, b| a["rank"].as_i64().cmp(&b["rank"].as_i64()));
        let ids: Vec<&str> = sorted.iter().filter_map(|v| v["_id"].as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_listener_off() {
        let cache = Cache::new(echo_config()).unwrap();
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        let id = cache.on(CacheEvent::Updated, move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });

        cache.insert(json!({"_id": "a"})).unwrap();
        assert!(cache.off(CacheEvent::Updated, id));
        cache.insert(json!({"_id": "b"})).unwrap();

        assert_eq!(updates.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_query_handle_requires_registration() {
        let cache = Cache::new(echo_config()).unwrap();
        assert!(matches!(cache.query("x"), Err(CacheError::NoNamedQueries)));

        let cache = Cache::new(echo_config().named_query("byTag", |_, _| async {
            Ok::<_, LoadError>(QueryOutput::<Value>::Empty)
        }))
        .unwrap();
        assert!(matches!(cache.query("x"), Err(CacheError::UnknownQuery(_))));
        assert_eq!(cache.query("byTag").unwrap().name(), "byTag");
        assert_eq!(cache.query_names(), vec!["byTag"]);
    }

    #[tokio::test]
    async fn test_get_empty_key() {
        let cache = Cache::new(echo_config()).unwrap();
        assert!(matches!(cache.get("").await, Err(CacheError::EmptyKey)));
    }

    #[tokio::test]
    async fn test_set_then_get_skips_loader() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = Cache::new(CacheConfig::<Value>::new().load_one(move |key| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            async move { Ok::<_, LoadError>(Some(json!({"_id": key}))) }
        }))
        .unwrap();

        cache.set("k", json!({"_id": "k", "v": 1})).unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"_id": "k", "v": 1})));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    /// Records the loading status seen by listeners while each write is applied.
    fn record_status_on_update(cache: &Cache<Value>) -> Arc<Mutex<Vec<LoadingStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let watcher = cache.clone();
        cache.on(CacheEvent::Updated, move |_| {
            log.lock().unwrap().push(watcher.loading_status());
        });
        seen
    }

    #[tokio::test]
    async fn test_load_is_stored_before_registration_clears() {
        let cache = Cache::new(echo_config()).unwrap();
        let seen = record_status_on_update(&cache);

        cache.get("k").await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].keys, 1);
        assert_eq!(cache.loading_status().keys, 0);
    }

    #[tokio::test]
    async fn test_bulk_load_is_stored_before_registration_clears() {
        let cache = Cache::new(
            echo_config().load_all(|| async { Ok::<_, LoadError>(vec![json!({"_id": "a"})]) }),
        )
        .unwrap();
        let seen = record_status_on_update(&cache);

        cache.get_all(true).await.unwrap();

        assert!(seen.lock().unwrap()[0].all);
        assert!(!cache.loading_status().all);
    }

    #[tokio::test]
    async fn test_query_result_is_stored_before_registration_clears() {
        let cache = Cache::new(echo_config().named_query("byTag", |_, _| async {
            Ok::<_, LoadError>(QueryOutput::One(json!({"_id": "q1"})))
        }))
        .unwrap();
        let seen = record_status_on_update(&cache);

        cache.execute_query("byTag", ["x"]).await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].queries, 1);
        assert_eq!(cache.loading_status().queries, 0);
    }

    #[test]
    fn test_concurrent_writers_leave_sublist_consistent() {
        let cache = Cache::new(
            echo_config().sublist("active", |v: &Value| v["status"] == "active"),
        )
        .unwrap();

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        let status = if (t + n) % 2 == 0 { "active" } else { "idle" };
                        cache
                            .set(format!("k{}", n % 10), json!({"_id": n, "status": status}))
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let expected = cache.filter_items(|v| v["status"] == "active");
        assert_eq!(cache.sublist("active"), Some(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_stops_with_last_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = Cache::new(
            echo_config()
                .load_all(move || {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    async { Ok::<_, LoadError>(vec![json!({"_id": "a"})]) }
                })
                .refresh_interval(Duration::from_millis(100)),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert!(cache.has("a"));

        drop(cache);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }
}
