//! In-process mock post backend with artificial latency.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use megamap::{LoadError, QueryOutput};
use serde_json::{json, Value};

const TAGS: [&str; 4] = ["fake", "mock", "dummy", "tag1"];

pub struct Catalog {
    posts: RwLock<Vec<Value>>,
    latency: Duration,
    generation: AtomicU64,
}

impl Catalog {
    /// Eight fixed posts plus three generated ones.
    pub fn seeded(latency: Duration) -> Arc<Self> {
        let statuses = ["published", "draft", "draft", "published"];
        let mut posts: Vec<Value> = (1..=8)
            .map(|n| {
                json!({
                    "_id": format!("key{n}"),
                    "title": format!("Post number {n}"),
                    "slug": format!("post-{n}"),
                    "status": statuses[n % statuses.len()],
                    "author": format!("0000{}", n % 3 + 1),
                    "tags": TAGS[..(n % 3) + 1],
                })
            })
            .collect();
        posts.extend((101..=103).map(|n| fake_post(&n.to_string(), 0)));

        Arc::new(Self {
            posts: RwLock::new(posts),
            latency,
            generation: AtomicU64::new(0),
        })
    }

    /// Single post by id. Unknown ids get a generated post.
    pub async fn fetch_one(&self, id: String) -> Result<Option<Value>, LoadError> {
        self.delay().await;
        if id.starts_with("missing") {
            return Ok(None);
        }
        let found = self
            .read()?
            .iter()
            .find(|post| post["_id"] == id.as_str())
            .cloned();
        let generation = self.generation.load(Ordering::Relaxed);
        Ok(Some(found.unwrap_or_else(|| fake_post(&id, generation))))
    }

    /// Every post. Each call bumps the generation so refreshes are visible.
    pub async fn fetch_all(&self) -> Result<Vec<Value>, LoadError> {
        self.delay().await;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut posts = self.read()?.clone();
        for post in &mut posts {
            post["generation"] = json!(generation);
        }
        Ok(posts)
    }

    pub async fn by_field(&self, field: &str, value: &str) -> Result<QueryOutput<Value>, LoadError> {
        self.delay().await;
        let matching: Vec<Value> = self
            .read()?
            .iter()
            .filter(|post| post[field] == value)
            .cloned()
            .collect();
        if matching.is_empty() {
            return Err(format!("no post with {field} = {value}").into());
        }
        Ok(QueryOutput::Many(matching))
    }

    pub async fn by_tag(&self, tag: &str) -> Result<QueryOutput<Value>, LoadError> {
        self.delay().await;
        let matching: Vec<Value> = self
            .read()?
            .iter()
            .filter(|post| {
                post["tags"]
                    .as_array()
                    .is_some_and(|tags| tags.iter().any(|t| t == tag))
            })
            .cloned()
            .collect();
        Ok(QueryOutput::Many(matching))
    }

    async fn delay(&self) {
        tokio::time::sleep(self.latency).await;
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Value>>, LoadError> {
        self.posts
            .read()
            .map_err(|_| LoadError::from("catalog lock poisoned"))
    }
}

fn fake_post(id: &str, generation: u64) -> Value {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let seed = hasher.finish() as usize;

    json!({
        "_id": id,
        "title": format!("Post {id}"),
        "slug": format!("fake-post-{id}"),
        "status": if seed % 2 == 0 { "published" } else { "draft" },
        "author": format!("0000{}", seed % 3 + 1),
        "tags": TAGS[..(seed % 3) + 1],
        "content": format!("Content for fake-post-{id} (generation {generation})"),
    })
}
