//! Field access for cached values.
//!
//! The cache never inspects values beyond reading named fields: the key
//! property, the searchable fields, and the field passed to `get_by` or
//! `delete_by`. [`Record`] is that seam.

use serde_json::Value;

/// A value that can be stored in a [`Cache`](crate::Cache).
///
/// `field` renders the named field as text, or returns `None` when the value
/// has no such field. The rendering is what keys, searches and field lookups
/// compare against.
///
/// ```
/// use megamap::Record;
/// use serde_json::json;
///
/// let post = json!({ "_id": "p1", "title": "Hello", "views": 3 });
/// assert_eq!(post.field("_id").as_deref(), Some("p1"));
/// assert_eq!(post.field("views").as_deref(), Some("3"));
/// assert_eq!(post.field("missing"), None);
/// ```
pub trait Record: Clone + Send + Sync + 'static {
    fn field(&self, name: &str) -> Option<String>;
}

impl Record for Value {
    fn field(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Derive the cache key of `value` from `property`; empty renderings do not count.
pub(crate) fn key_of<V: Record>(value: &V, property: &str) -> Option<String> {
    value.field(property).filter(|key| !key.is_empty())
}
