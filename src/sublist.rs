//! Derived, predicate-filtered views over the store.
//!
//! A sublist is never written directly. It is recomputed in full from the
//! store's values after every notification, in registration order.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use indexmap::IndexMap;

use crate::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "sublist";

pub(crate) type Predicate<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;

pub(crate) struct SubLists<V> {
    filters: Vec<(String, Predicate<V>)>,
    lists: RwLock<IndexMap<String, Vec<V>>>,
    /// Held from reading the source until the lists are replaced.
    gate: Mutex<()>,
}

impl<V: Clone> SubLists<V> {
    pub fn new(filters: Vec<(String, Predicate<V>)>) -> Self {
        let lists = filters
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();
        Self {
            filters,
            lists: RwLock::new(lists),
            gate: Mutex::new(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Recompute from whatever `read` returns. Concurrent refreshes are
    /// serialized, so a read taken earlier can never overwrite a later one.
    pub fn refresh_from<F>(&self, read: F)
    where
        F: FnOnce() -> Vec<V>,
    {
        let _gate = mutex_lock(&self.gate, SOURCE, "refresh_from");
        self.recompute(&read());
    }

    pub fn recompute(&self, values: &[V]) {
        let fresh: IndexMap<String, Vec<V>> = self
            .filters
            .iter()
            .map(|(name, predicate)| {
                let matching = values.iter().filter(|value| predicate(value)).cloned().collect();
                (name.clone(), matching)
            })
            .collect();
        *rw_write(&self.lists, SOURCE, "recompute") = fresh;
    }

    pub fn get(&self, name: &str) -> Option<Vec<V>> {
        rw_read(&self.lists, SOURCE, "get").get(name).cloned()
    }

    pub fn snapshot(&self) -> IndexMap<String, Vec<V>> {
        rw_read(&self.lists, SOURCE, "snapshot").clone()
    }
}

impl<V> fmt::Debug for SubLists<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|(name, _)| name))
            .finish()
    }
}
