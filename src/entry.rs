//! Cache entry with its refresh timestamp.

use std::time::Duration;

use tokio::time::Instant;

/// A single cache entry: the stored value and when it was last confirmed fresh.
///
/// Timestamps come from Tokio's clock so paused-time tests can drive expiry.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub(crate) value: V,
    pub(crate) refreshed_at: Instant,
}

impl<V> Entry<V> {
    /// Create an entry refreshed now.
    pub fn new(value: V) -> Self {
        Self::refreshed_at(value, Instant::now())
    }

    /// Create an entry refreshed at a given instant.
    pub fn refreshed_at(value: V, refreshed_at: Instant) -> Self {
        Self {
            value,
            refreshed_at,
        }
    }

    /// Whether the entry is still fresh under `ttl`. No ttl means never stale.
    pub fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        self.is_fresh_at(ttl, Instant::now())
    }

    /// Whether the entry is fresh at a given time.
    pub fn is_fresh_at(&self, ttl: Option<Duration>, now: Instant) -> bool {
        match ttl {
            Some(ttl) => now < self.refreshed_at + ttl,
            None => true,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn last_refreshed(&self) -> Instant {
        self.refreshed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = Entry::new("v");
        let far_future = Instant::now() + Duration::from_secs(86_400 * 365);
        assert!(entry.is_fresh_at(None, far_future));
    }

    #[test]
    fn test_fresh_until_ttl_elapses() {
        let start = Instant::now();
        let entry = Entry::refreshed_at("v", start);
        let ttl = Some(Duration::from_millis(1000));

        assert!(entry.is_fresh_at(ttl, start + Duration::from_millis(999)));
        assert!(!entry.is_fresh_at(ttl, start + Duration::from_millis(1000)));
        assert!(!entry.is_fresh_at(ttl, start + Duration::from_millis(1100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_follows_tokio_clock() {
        let entry = Entry::new(1u8);
        let ttl = Some(Duration::from_secs(1));
        assert!(entry.is_fresh(ttl));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!entry.is_fresh(ttl));
        assert_eq!(*entry.value(), 1);
    }
}
