//! The entry store.
//!
//! Holds the authoritative key to entry mapping. An `IndexMap` keeps values
//! in insertion order, which makes sublists and snapshots deterministic.
//! Every operation is synchronous; mutations emit [`CacheEvent::Updated`]
//! once the write lock has been released.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use tokio::time::Instant;

use crate::entry::Entry;
use crate::events::{CacheEvent, Notifier};
use crate::lock::{rw_read, rw_write};
use crate::record::Record;
use crate::stats::CacheStats;

const SOURCE: &str = "storage";

#[derive(Debug)]
pub(crate) struct Store<V> {
    entries: RwLock<IndexMap<String, Entry<V>>>,
    notifier: Notifier,
    stats: Arc<CacheStats>,
}

impl<V: Record> Store<V> {
    pub fn new(stats: Arc<CacheStats>) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            notifier: Notifier::new(),
            stats,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn has(&self, key: &str) -> bool {
        self.read_lock("has").contains_key(key)
    }

    /// Memory-only lookup; never triggers a load.
    pub fn get(&self, key: &str) -> Option<V> {
        self.read_lock("get").get(key).map(|entry| entry.value.clone())
    }

    pub fn entry(&self, key: &str) -> Option<Entry<V>> {
        self.read_lock("entry").get(key).cloned()
    }

    /// Insert or overwrite `key`, stamping it as refreshed now.
    pub fn set(&self, key: String, value: V) {
        self.write_lock("set").insert(key, Entry::new(value));
        self.stats.record_sets(1);
        self.notifier.emit(CacheEvent::Updated);
    }

    /// Write a whole batch under one timestamp and one notification.
    pub fn apply_batch(&self, items: Vec<(String, V)>) {
        let count = items.len() as u64;
        {
            let now = Instant::now();
            let mut entries = self.write_lock("apply_batch");
            for (key, value) in items {
                entries.insert(key, Entry::refreshed_at(value, now));
            }
        }
        self.stats.record_sets(count);
        self.notifier.emit(CacheEvent::Updated);
    }

    /// Remove `key`, returning the value it held.
    pub fn delete(&self, key: &str) -> Option<V> {
        let removed = self.write_lock("delete").shift_remove(key);
        removed.map(|entry| self.removed(entry))
    }

    /// Remove the first value whose `field` renders as `value`.
    pub fn delete_by(&self, field: &str, value: &str) -> Option<V> {
        let removed = {
            let mut entries = self.write_lock("delete_by");
            let index = entries
                .values()
                .position(|entry| entry.value.field(field).as_deref() == Some(value))?;
            entries.shift_remove_index(index).map(|(_, entry)| entry)
        };
        removed.map(|entry| self.removed(entry))
    }

    /// First value whose `field` renders as `value`.
    pub fn find_by(&self, field: &str, value: &str) -> Option<V> {
        self.read_lock("find_by")
            .values()
            .find(|entry| entry.value.field(field).as_deref() == Some(value))
            .map(|entry| entry.value.clone())
    }

    pub fn clear(&self) {
        self.write_lock("clear").clear();
        self.notifier.emit(CacheEvent::Updated);
    }

    pub fn len(&self) -> usize {
        self.read_lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.read_lock("keys").keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.read_lock("values")
            .values()
            .map(|entry| entry.value.clone())
            .collect()
    }

    pub fn snapshot(&self) -> IndexMap<String, V> {
        self.read_lock("snapshot")
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn removed(&self, entry: Entry<V>) -> V {
        self.stats.record_delete();
        self.notifier.emit(CacheEvent::Updated);
        entry.into_value()
    }

    fn read_lock(&self, op: &'static str) -> RwLockReadGuard<'_, IndexMap<String, Entry<V>>> {
        rw_read(&self.entries, SOURCE, op)
    }

    fn write_lock(&self, op: &'static str) -> RwLockWriteGuard<'_, IndexMap<String, Entry<V>>> {
        rw_write(&self.entries, SOURCE, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> Store<Value> {
        Store::new(Arc::new(CacheStats::new()))
    }

    fn count_updates(store: &Store<Value>) -> Arc<AtomicUsize> {
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&updates);
        store.notifier().on(CacheEvent::Updated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        updates
    }

    #[test]
    fn test_basic_set_get() {
        let store = store();
        store.set("k1".to_string(), json!({"_id": "k1"}));

        assert!(store.has("k1"));
        assert_eq!(store.get("k1"), Some(json!({"_id": "k1"})));
        assert!(store.get("k2").is_none());
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let store = store();
        store.set("a".to_string(), json!(1));
        store.set("b".to_string(), json!(2));
        store.set("a".to_string(), json!(3));

        assert_eq!(store.len(), 2);
        assert_eq!(store.keys(), vec!["a", "b"]);
        assert_eq!(store.values(), vec![json!(3), json!(2)]);
    }

    #[test]
    fn test_delete() {
        let store = store();
        store.set("k1".to_string(), json!("v"));

        assert_eq!(store.delete("k1"), Some(json!("v")));
        assert_eq!(store.delete("k1"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_by_removes_first_match_only() {
        let store = store();
        store.set("a".to_string(), json!({"_id": "a", "status": "draft"}));
        store.set("b".to_string(), json!({"_id": "b", "status": "draft"}));

        let removed = store.delete_by("status", "draft");
        assert_eq!(removed, Some(json!({"_id": "a", "status": "draft"})));
        assert_eq!(store.keys(), vec!["b"]);
        assert!(store.delete_by("status", "published").is_none());
    }

    #[test]
    fn test_find_by() {
        let store = store();
        store.set("a".to_string(), json!({"_id": "a", "slug": "hello"}));
        assert_eq!(
            store.find_by("slug", "hello"),
            Some(json!({"_id": "a", "slug": "hello"}))
        );
        assert!(store.find_by("slug", "nope").is_none());
    }

    #[test]
    fn test_one_notification_per_operation() {
        let store = store();
        let updates = count_updates(&store);

        store.set("a".to_string(), json!(1));
        store.apply_batch(vec![
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
            ("d".to_string(), json!(4)),
        ]);
        store.delete("a");
        store.delete("missing");
        store.clear();

        // set + batch + delete + clear; a miss on delete is silent
        assert_eq!(updates.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = Arc::new(store());
        let seen = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&store);
        let counter = Arc::clone(&seen);
        store.notifier().on(CacheEvent::Updated, move |_| {
            if let Some(store) = weak.upgrade() {
                counter.store(store.len(), Ordering::SeqCst);
            }
        });

        store.set("a".to_string(), json!(1));
        store.set("b".to_string(), json!(2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_batch_shares_timestamp() {
        let store = store();
        store.apply_batch(vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]);

        let a = store.entry("a").unwrap();
        let b = store.entry("b").unwrap();
        assert_eq!(a.last_refreshed(), b.last_refreshed());
    }
}
