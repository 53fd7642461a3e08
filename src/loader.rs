//! The loader: single-item and bulk fetches with in-flight deduplication.
//!
//! Each pending fetch is a [`Shared`] future registered before it is handed
//! out, so every concurrent caller for a key awaits the same fetch. The
//! registration is dropped when the fetch completes, successfully or not.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{ensure_key, CacheError, CacheResult, LoadError};
use crate::lock::mutex_lock;
use crate::record::{key_of, Record};
use crate::stats::CacheStats;
use crate::storage::Store;

const SOURCE: &str = "loader";

pub(crate) type LoadOneFn<V> =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<Option<V>, LoadError>> + Send + Sync>;
pub(crate) type LoadAllFn<V> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Batch<V>, LoadError>> + Send + Sync>;

/// Receives every batch of freshly loaded values; used to mirror loads elsewhere.
pub(crate) type LoadSink<V> = Arc<dyn Fn(&[V]) + Send + Sync>;

type PendingLoad<V> = Shared<BoxFuture<'static, Option<V>>>;
type PendingBulk<V> = Shared<BoxFuture<'static, Option<IndexMap<String, V>>>>;

/// What a bulk loader may return.
///
/// Lists are keyed by each value's key property. Maps are keyed by their own keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch<V> {
    List(Vec<V>),
    Map(IndexMap<String, V>),
}

impl<V> From<Vec<V>> for Batch<V> {
    fn from(values: Vec<V>) -> Self {
        Batch::List(values)
    }
}

impl<V> From<IndexMap<String, V>> for Batch<V> {
    fn from(values: IndexMap<String, V>) -> Self {
        Batch::Map(values)
    }
}

impl<V: Record> Batch<V> {
    /// Pair each value with its key. List items without a key are skipped.
    pub(crate) fn into_keyed(self, key_property: &str) -> Vec<(String, V)> {
        match self {
            Batch::Map(values) => values
                .into_iter()
                .filter(|(key, _)| !key.is_empty())
                .collect(),
            Batch::List(values) => values
                .into_iter()
                .filter_map(|value| match key_of(&value, key_property) {
                    Some(key) => Some((key, value)),
                    None => {
                        warn!(key_property, "Skipping loaded value without a key");
                        None
                    }
                })
                .collect(),
        }
    }
}

pub(crate) struct Loader<V> {
    store: Arc<Store<V>>,
    key_property: Arc<str>,
    load_one: LoadOneFn<V>,
    load_all: Option<LoadAllFn<V>>,
    in_flight: Arc<Mutex<HashMap<String, PendingLoad<V>>>>,
    bulk_in_flight: Arc<Mutex<Option<PendingBulk<V>>>>,
    loaded_once: Arc<AtomicBool>,
    sink: Option<LoadSink<V>>,
    stats: Arc<CacheStats>,
}

impl<V: Record> Loader<V> {
    pub fn new(
        store: Arc<Store<V>>,
        key_property: &str,
        load_one: LoadOneFn<V>,
        load_all: Option<LoadAllFn<V>>,
        sink: Option<LoadSink<V>>,
        stats: Arc<CacheStats>,
    ) -> Self {
        Self {
            store,
            key_property: Arc::from(key_property),
            load_one,
            load_all,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            bulk_in_flight: Arc::new(Mutex::new(None)),
            loaded_once: Arc::new(AtomicBool::new(false)),
            sink,
            stats,
        }
    }

    /// Join a pending load, answer from the store, or start a load.
    pub async fn get(&self, key: &str) -> CacheResult<Option<V>> {
        ensure_key(key)?;

        if let Some(pending) = self.pending(key) {
            debug!(key, "Joining in-flight load");
            return Ok(pending.await);
        }
        if let Some(value) = self.store.get(key) {
            return Ok(Some(value));
        }
        Ok(self.start_load(key).await)
    }

    /// Load `key` regardless of what the store holds, joining any pending load.
    pub async fn load(&self, key: &str) -> CacheResult<Option<V>> {
        ensure_key(key)?;
        Ok(self.start_load(key).await)
    }

    /// Start (or join) a load for `key` without waiting for it.
    ///
    /// Outside a Tokio runtime the load stays registered and the next reader
    /// of `key` drives it.
    pub fn refresh_in_background(&self, key: &str) {
        let _pending = self.start_load(key);
    }

    /// Return the store contents, loading them in bulk when empty or when `refresh` is set.
    ///
    /// Resolves to `None` if the bulk loader fails.
    pub async fn get_all(&self, refresh: bool) -> CacheResult<Option<IndexMap<String, V>>> {
        let load_all = self.load_all.as_ref().ok_or(CacheError::MissingBulkLoader)?;

        let pending = {
            let mut slot = mutex_lock(&self.bulk_in_flight, SOURCE, "get_all");
            if let Some(pending) = slot.clone() {
                pending
            } else if !refresh && !self.store.is_empty() {
                return Ok(Some(self.store.snapshot()));
            } else {
                let pending = self.fetch_all(Arc::clone(load_all)).boxed().shared();
                *slot = Some(pending.clone());
                drive(pending.clone(), "bulk");
                pending
            }
        };

        Ok(pending.await)
    }

    pub fn has_bulk_loader(&self) -> bool {
        self.load_all.is_some()
    }

    pub fn loading_keys(&self) -> usize {
        mutex_lock(&self.in_flight, SOURCE, "loading_keys").len()
    }

    pub fn loading_all(&self) -> bool {
        mutex_lock(&self.bulk_in_flight, SOURCE, "loading_all").is_some()
    }

    pub fn has_loaded_once(&self) -> bool {
        self.loaded_once.load(Ordering::Acquire)
    }

    fn pending(&self, key: &str) -> Option<PendingLoad<V>> {
        mutex_lock(&self.in_flight, SOURCE, "pending").get(key).cloned()
    }

    /// Register the load for `key` before returning it, or hand back the one already registered.
    fn start_load(&self, key: &str) -> PendingLoad<V> {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "start_load");
        if let Some(pending) = in_flight.get(key) {
            return pending.clone();
        }

        let pending = self.fetch_one(key.to_string()).boxed().shared();
        in_flight.insert(key.to_string(), pending.clone());
        drive(pending.clone(), key);
        pending
    }

    fn fetch_one(&self, key: String) -> impl Future<Output = Option<V>> + Send + 'static {
        let load_one = Arc::clone(&self.load_one);
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let sink = self.sink.clone();
        let stats = Arc::clone(&self.stats);

        async move {
            stats.record_load();
            let outcome = load_one(key.clone()).await;

            // Written before the registration goes, so readers always see one of the two.
            let loaded = match outcome {
                Ok(Some(value)) => {
                    store.set(key.clone(), value.clone());
                    if let Some(sink) = &sink {
                        sink(std::slice::from_ref(&value));
                    }
                    Some(value)
                }
                // Not cached, so the next call retries.
                Ok(None) => {
                    debug!(key = %key, "Loader returned no value");
                    None
                }
                Err(err) => {
                    stats.record_load_failure();
                    warn!(key = %key, error = %err, "Single-item load failed");
                    None
                }
            };

            mutex_lock(&in_flight, SOURCE, "fetch_one").remove(&key);
            loaded
        }
    }

    fn fetch_all(
        &self,
        load_all: LoadAllFn<V>,
    ) -> impl Future<Output = Option<IndexMap<String, V>>> + Send + 'static {
        let store = Arc::clone(&self.store);
        let bulk_in_flight = Arc::clone(&self.bulk_in_flight);
        let loaded_once = Arc::clone(&self.loaded_once);
        let key_property = Arc::clone(&self.key_property);
        let sink = self.sink.clone();
        let stats = Arc::clone(&self.stats);

        async move {
            info!("Bulk load started");
            let outcome = load_all().await;

            let loaded = match outcome {
                Ok(batch) => {
                    let items = batch.into_keyed(&key_property);
                    let values: Vec<V> = items.iter().map(|(_, value)| value.clone()).collect();
                    loaded_once.store(true, Ordering::Release);
                    store.apply_batch(items);
                    if let Some(sink) = &sink {
                        sink(&values);
                    }
                    info!(count = values.len(), "Bulk load applied");
                    Some(store.snapshot())
                }
                Err(err) => {
                    stats.record_load_failure();
                    warn!(error = %err, "Bulk load failed");
                    None
                }
            };

            *mutex_lock(&bulk_in_flight, SOURCE, "fetch_all") = None;
            loaded
        }
    }
}

/// Run a fetch to completion on the current runtime even if every caller
/// stops waiting for it. Without a runtime the next caller drives it.
pub(crate) fn drive<T>(pending: Shared<BoxFuture<'static, T>>, what: &str)
where
    T: Clone + Send + Sync + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                pending.await;
            });
        }
        Err(_) => debug!(what, "No runtime to drive fetch"),
    }
}
