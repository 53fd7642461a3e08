//! Expiry and the named-query cache.
//!
//! [`ExpiringLoader`] puts a time-to-live in front of the [`Loader`] and
//! caches named query results under a composite query key, with the same
//! in-flight deduplication the loader applies to keys.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::entry::Entry;
use crate::error::{ensure_key, CacheError, CacheResult, LoadError};
use crate::loader::{drive, LoadSink, Loader};
use crate::lock::{mutex_lock, rw_read, rw_write};
use crate::record::{key_of, Record};
use crate::stats::CacheStats;
use crate::storage::Store;

const SOURCE: &str = "expiry";

pub(crate) type QueryFn<V> = Arc<
    dyn Fn(String, Vec<String>) -> BoxFuture<'static, Result<QueryOutput<V>, LoadError>>
        + Send
        + Sync,
>;

type PendingQuery<V> = Shared<BoxFuture<'static, CacheResult<QueryOutput<V>>>>;

/// How a read treats an entry whose time-to-live has elapsed.
///
/// A cache instance uses exactly one strategy for its whole lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryStrategy {
    /// Wait for a fresh load before answering. If the reload yields nothing,
    /// the stale value is returned.
    #[default]
    BlockAndRefresh,
    /// Answer with the stale value at once and reload in the background.
    ///
    /// The reload is spawned on the current Tokio runtime. Without one it
    /// stays registered and the next read of the key drives it.
    StaleWhileRevalidate,
}

/// Result of a named query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput<V> {
    One(V),
    Many(Vec<V>),
    Empty,
}

impl<V> QueryOutput<V> {
    pub fn values(&self) -> &[V] {
        match self {
            QueryOutput::One(value) => std::slice::from_ref(value),
            QueryOutput::Many(values) => values,
            QueryOutput::Empty => &[],
        }
    }

    pub fn into_vec(self) -> Vec<V> {
        match self {
            QueryOutput::One(value) => vec![value],
            QueryOutput::Many(values) => values,
            QueryOutput::Empty => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

impl<V> From<Option<V>> for QueryOutput<V> {
    fn from(value: Option<V>) -> Self {
        value.map_or(QueryOutput::Empty, QueryOutput::One)
    }
}

impl<V> From<Vec<V>> for QueryOutput<V> {
    fn from(values: Vec<V>) -> Self {
        QueryOutput::Many(values)
    }
}

/// Cache slot for a query invocation: the name followed by its arguments.
pub(crate) fn query_key(name: &str, args: &[String]) -> String {
    format!("{}({})", name, args.join(":"))
}

pub(crate) struct ExpiringLoader<V> {
    loader: Loader<V>,
    store: Arc<Store<V>>,
    ttl: Option<Duration>,
    strategy: ExpiryStrategy,
    key_property: Arc<str>,
    queries: IndexMap<String, QueryFn<V>>,
    query_results: Arc<RwLock<HashMap<String, Entry<QueryOutput<V>>>>>,
    query_in_flight: Arc<Mutex<HashMap<String, PendingQuery<V>>>>,
    sink: Option<LoadSink<V>>,
    stats: Arc<CacheStats>,
}

pub(crate) struct ExpiryOptions<V> {
    pub ttl: Option<Duration>,
    pub strategy: ExpiryStrategy,
    pub key_property: String,
    pub queries: IndexMap<String, QueryFn<V>>,
    pub sink: Option<LoadSink<V>>,
}

impl<V: Record> ExpiringLoader<V> {
    pub fn new(
        loader: Loader<V>,
        store: Arc<Store<V>>,
        options: ExpiryOptions<V>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            loader,
            store,
            ttl: options.ttl,
            strategy: options.strategy,
            key_property: Arc::from(options.key_property),
            queries: options.queries,
            query_results: Arc::new(RwLock::new(HashMap::new())),
            query_in_flight: Arc::new(Mutex::new(HashMap::new())),
            sink: options.sink,
            stats,
        }
    }

    pub fn loader(&self) -> &Loader<V> {
        &self.loader
    }

    pub fn strategy(&self) -> ExpiryStrategy {
        self.strategy
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        ensure_key(key)?;

        let Some(entry) = self.store.entry(key) else {
            self.stats.record_miss();
            return self.loader.get(key).await;
        };

        if entry.is_fresh(self.ttl) {
            self.stats.record_hit();
            return Ok(Some(entry.into_value()));
        }

        self.stats.record_miss();
        debug!(key, strategy = ?self.strategy, "Entry expired");
        match self.strategy {
            ExpiryStrategy::BlockAndRefresh => {
                let refreshed = self.loader.load(key).await?;
                Ok(refreshed.or(Some(entry.into_value())))
            }
            ExpiryStrategy::StaleWhileRevalidate => {
                self.loader.refresh_in_background(key);
                Ok(Some(entry.into_value()))
            }
        }
    }

    pub async fn get_all(&self, refresh: bool) -> CacheResult<Option<IndexMap<String, V>>> {
        self.loader.get_all(refresh).await
    }

    pub fn query_names(&self) -> Vec<String> {
        self.queries.keys().cloned().collect()
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    /// Run the named query, answering from its cache slot while fresh.
    ///
    /// Query failures are returned to the caller, unlike single-item loads.
    pub async fn execute_query(
        &self,
        name: &str,
        args: Vec<String>,
    ) -> CacheResult<QueryOutput<V>> {
        if self.queries.is_empty() {
            return Err(CacheError::NoNamedQueries);
        }
        let query = self
            .queries
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownQuery(name.to_string()))?;
        let key = query_key(name, &args);

        let pending = {
            let mut in_flight = mutex_lock(&self.query_in_flight, SOURCE, "execute_query");
            if let Some(pending) = in_flight.get(&key) {
                debug!(query = %key, "Joining in-flight query");
                pending.clone()
            } else {
                if let Some(cached) = self.cached_query(&key) {
                    self.stats.record_query_hit();
                    return Ok(cached);
                }
                self.stats.record_query_miss();
                let pending = self
                    .run_query(query, name.to_string(), key.clone(), args)
                    .boxed()
                    .shared();
                in_flight.insert(key.clone(), pending.clone());
                drive(pending.clone(), &key);
                pending
            }
        };

        pending.await
    }

    pub fn loading_queries(&self) -> usize {
        mutex_lock(&self.query_in_flight, SOURCE, "loading_queries").len()
    }

    pub fn clear_queries(&self) {
        rw_write(&self.query_results, SOURCE, "clear_queries").clear();
    }

    fn cached_query(&self, key: &str) -> Option<QueryOutput<V>> {
        rw_read(&self.query_results, SOURCE, "cached_query")
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.value().clone())
    }

    fn run_query(
        &self,
        query: QueryFn<V>,
        name: String,
        key: String,
        args: Vec<String>,
    ) -> impl Future<Output = CacheResult<QueryOutput<V>>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let results = Arc::clone(&self.query_results);
        let in_flight = Arc::clone(&self.query_in_flight);
        let key_property = Arc::clone(&self.key_property);
        let sink = self.sink.clone();

        async move {
            let outcome = query(name.clone(), args).await;

            let result = match outcome {
                Ok(output) => {
                    if !output.is_empty() {
                        rw_write(&results, SOURCE, "run_query")
                            .insert(key.clone(), Entry::new(output.clone()));
                    }

                    let items: Vec<(String, V)> = output
                        .values()
                        .iter()
                        .filter_map(|value| key_of(value, &key_property).map(|k| (k, value.clone())))
                        .collect();
                    let values: Vec<V> = items.iter().map(|(_, value)| value.clone()).collect();
                    store.apply_batch(items);
                    match &sink {
                        Some(sink) if !values.is_empty() => sink(&values),
                        _ => {}
                    }
                    Ok(output)
                }
                Err(err) => {
                    warn!(query = %key, error = %err, "Named query failed");
                    Err(CacheError::QueryFailed {
                        name,
                        cause: Arc::from(err),
                    })
                }
            };

            mutex_lock(&in_flight, SOURCE, "run_query").remove(&key);
            result
        }
    }
}
