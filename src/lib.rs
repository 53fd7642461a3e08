//! # megamap
//!
//! A lazily-populated, self-refreshing key/value cache that sits in front of
//! asynchronous fetch functions.
//!
//! ## Features
//!
//! - **In-flight deduplication**: concurrent reads of one key share a single fetch
//! - **Expiry**: entries and named-query results go stale after a configurable interval,
//!   handled either by blocking on a reload or by serving stale while revalidating
//! - **Named queries**: parametrized, cached fetches alongside per-key lookups
//! - **Secondary maps**: dependent caches that mirror every write under their own key
//! - **Sublists**: named, predicate-filtered views recomputed on every change
//! - **Search**: case-insensitive substring search with a fuzzy fallback
//! - **Change notification**: subscribe to `updated` events to react to any mutation
//!
//! ## Quick Start
//!
//! ```rust
//! use megamap::{Cache, CacheConfig, LoadError};
//! use serde_json::{json, Value};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), megamap::CacheError> {
//! let posts = Cache::new(
//!     CacheConfig::<Value>::new()
//!         .load_one(|id| async move {
//!             // Fetch from a backend here.
//!             Ok::<_, LoadError>(Some(json!({ "_id": id, "title": "Hello", "status": "draft" })))
//!         })
//!         .expiry_interval(Duration::from_secs(60))
//!         .searchable_fields(["title"])
//!         .sublist("drafts", |post: &Value| post["status"] == "draft"),
//! )?;
//!
//! let post = posts.get("p1").await?;
//! assert_eq!(post.unwrap()["title"], "Hello");
//!
//! // Served from memory until it expires.
//! assert!(posts.has("p1"));
//! assert_eq!(posts.sublist("drafts").map(|d| d.len()), Some(1));
//! assert_eq!(posts.search_items("helo").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! A fetch that fails or finds nothing resolves to `Ok(None)` and is logged
//! through `tracing`; the next read retries. Structural misuse (an empty key,
//! a missing loader, an unknown query) is an `Err`. Named queries return
//! their failures to the caller.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod events;
pub mod expiry;
pub mod loader;
pub mod record;
pub mod search;
pub mod stats;

pub use cache::{Cache, Query};
pub use config::{CacheConfig, DEFAULT_KEY_PROPERTY};
pub use entry::Entry;
pub use error::{CacheError, CacheResult, LoadError};
pub use events::{CacheEvent, ListenerId, Notifier};
pub use expiry::{ExpiryStrategy, QueryOutput};
pub use loader::Batch;
pub use record::Record;
pub use stats::{CacheStats, LoadingStatus, StatsSnapshot};

// Internal modules - not part of public API

pub(crate) mod lock;
pub(crate) mod storage;
pub(crate) mod sublist;

pub mod cli;
pub use cli::{Cli, DemoCommand};
