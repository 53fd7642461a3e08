//! Error types for the cache.
//!
//! Only structural misuse surfaces as a [`CacheError`]: empty keys, missing
//! collaborator functions, unknown query names. A failed single-item or bulk
//! load is logged and reported as an absent value instead. Named queries are
//! the exception: their failures reach the caller as [`CacheError::QueryFailed`].

use std::sync::Arc;

use thiserror::Error;

/// Error type returned by caller-supplied fetch and query functions.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A key was empty.
    #[error("key is empty")]
    EmptyKey,

    /// The cache was built without a single-item loader.
    #[error("load_one function is not defined; at minimum a single-item loader is required")]
    MissingLoader,

    /// A bulk operation was requested but no bulk loader is configured.
    #[error("load_all function is not defined")]
    MissingBulkLoader,

    /// A named query was requested but the cache has none registered.
    #[error("named queries are not defined")]
    NoNamedQueries,

    /// The requested named query is not registered.
    #[error("query '{0}' is not defined")]
    UnknownQuery(String),

    /// A named query function returned an error.
    #[error("query '{name}' failed: {cause}")]
    QueryFailed {
        name: String,
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A value lacks the field the cache keys values by.
    #[error("value has no '{property}' field to key it by")]
    MissingKeyProperty { property: String },

    /// Periodic refresh was requested outside of a Tokio runtime.
    #[error("periodic refresh requires a running Tokio runtime")]
    NoRuntime,
}

/// A specialized Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Reject empty keys before they reach the store or a loader.
pub(crate) fn ensure_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        Err(CacheError::EmptyKey)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(CacheError::EmptyKey.to_string(), "key is empty");
        assert_eq!(
            CacheError::UnknownQuery("byTag".to_string()).to_string(),
            "query 'byTag' is not defined"
        );
        assert_eq!(
            CacheError::MissingKeyProperty {
                property: "_id".to_string()
            }
            .to_string(),
            "value has no '_id' field to key it by"
        );
    }

    #[test]
    fn test_query_failure_carries_cause() {
        let cause: LoadError = "backend unavailable".into();
        let err = CacheError::QueryFailed {
            name: "byAuthor".to_string(),
            cause: Arc::from(cause),
        };
        assert_eq!(
            err.to_string(),
            "query 'byAuthor' failed: backend unavailable"
        );
        // Cloneable so a single failure can be handed to every waiting caller.
        let copy = err.clone();
        assert!(matches!(copy, CacheError::QueryFailed { .. }));
    }

    #[test]
    fn test_ensure_key() {
        assert!(ensure_key("a").is_ok());
        assert!(matches!(ensure_key(""), Err(CacheError::EmptyKey)));
    }
}
