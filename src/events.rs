//! Change notification.
//!
//! Every mutating cache operation emits [`CacheEvent::Updated`] exactly once.
//! Derived sublists and external observers subscribe here; nothing polls.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "events";

/// Events a cache publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CacheEvent {
    /// The cache contents changed.
    Updated,
}

impl CacheEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEvent::Updated => "updated",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by [`Notifier::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(CacheEvent) + Send + Sync>;

/// An observer list keyed by event.
///
/// Listeners run synchronously, in registration order, on the thread that
/// performed the mutation. They are invoked outside any lock, so a listener
/// may read the cache or (un)subscribe.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<(CacheEvent, ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to `event`.
    pub fn on<F>(&self, event: CacheEvent, listener: F) -> ListenerId
    where
        F: Fn(CacheEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        rw_write(&self.listeners, SOURCE, "on").push((event, id, Arc::new(listener)));
        id
    }

    /// Unsubscribe a listener. Returns `false` if it was not registered for `event`.
    pub fn off(&self, event: CacheEvent, id: ListenerId) -> bool {
        let mut listeners = rw_write(&self.listeners, SOURCE, "off");
        let before = listeners.len();
        listeners.retain(|(e, lid, _)| !(*e == event && *lid == id));
        listeners.len() != before
    }

    /// Invoke every listener registered for `event`.
    pub fn emit(&self, event: CacheEvent) {
        let snapshot: Vec<Listener> = rw_read(&self.listeners, SOURCE, "emit")
            .iter()
            .filter(|(e, _, _)| *e == event)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self, event: CacheEvent) -> usize {
        rw_read(&self.listeners, SOURCE, "listener_count")
            .iter()
            .filter(|(e, _, _)| *e == event)
            .count()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &rw_read(&self.listeners, SOURCE, "debug").len())
            .finish()
    }
}
