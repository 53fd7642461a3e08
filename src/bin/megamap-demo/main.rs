//! megamap demo.
//!
//! Wires a cache to an in-process post catalogue with simulated latency.
//!
//! ```bash
//! cargo run --bin megamap-demo -- get key1 key2
//! cargo run --bin megamap-demo -- --expiry-ms 1000 search "post numbr"
//! RUST_LOG=megamap=debug cargo run --bin megamap-demo -- watch --updates 2
//! ```

mod catalog;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use megamap::{Cache, CacheConfig, Cli, DemoCommand, LoadError};

use catalog::Catalog;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let catalog = Catalog::seeded(cli.latency());

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut config = post_config(&catalog)
        .expiry_interval(cli.expiry())
        .expiry_strategy(cli.expiry_strategy())
        .on_updated(move || {
            let _ = updates_tx.send(());
        });
    if let DemoCommand::Watch { refresh_ms, .. } = &cli.command {
        config = config.refresh_interval(Duration::from_millis(*refresh_ms));
    }
    let posts = Cache::new(config)?;

    match cli.command {
        DemoCommand::Get { ids } => {
            // Every id twice; duplicates share the in-flight fetch.
            let lookups = ids.iter().chain(ids.iter()).map(|id| posts.get(id));
            let results = join_all(lookups).await;
            for (id, result) in ids.iter().zip(results) {
                match result? {
                    Some(post) => println!("{id}: {}", post["title"]),
                    None => println!("{id}: (not found)"),
                }
            }
        }
        DemoCommand::List { refresh } => {
            posts.get_all(false).await?;
            if refresh {
                posts.force_refresh().await?;
            }
            for (key, post) in posts.entries() {
                println!("{key}\t{}\t{}", post["status"], post["title"]);
            }
        }
        DemoCommand::Search { query } => {
            posts.get_all(false).await?;
            let found = posts.search_items(&query);
            if found.is_empty() {
                println!("no match for {query:?}");
            }
            for post in found {
                println!("{}\t{}", post["_id"], post["title"]);
            }
        }
        DemoCommand::Sublist { name } => {
            posts.get_all(false).await?;
            match posts.sublist(&name) {
                Some(items) => {
                    for post in items {
                        println!("{}\t{}", post["_id"], post["title"]);
                    }
                }
                None => println!("unknown sublist {name:?}, try one of {:?}", posts.sublists().keys()),
            }
        }
        DemoCommand::Query { name, args } => {
            let output = posts.query(&name)?.run(args).await?;
            for post in output.values() {
                println!("{}\t{}", post["_id"], post["title"]);
            }
            println!("{} cached post(s)", posts.len());
        }
        DemoCommand::Watch { updates, .. } => {
            let mut seen = 0;
            while seen < updates && updates_rx.recv().await.is_some() {
                seen += 1;
                info!(update = seen, posts = posts.len(), "Catalogue refreshed");
            }
        }
    }

    let stats = posts.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        loads = stats.loads,
        load_failures = stats.load_failures,
        query_hits = stats.query_hits,
        query_misses = stats.query_misses,
        "Cache stats"
    );
    Ok(())
}

fn post_config(catalog: &Arc<Catalog>) -> CacheConfig<Value> {
    let one = Arc::clone(catalog);
    let all = Arc::clone(catalog);
    let slug = Arc::clone(catalog);
    let tag = Arc::clone(catalog);
    let author = Arc::clone(catalog);

    CacheConfig::new()
        .load_one(move |id| {
            let catalog = Arc::clone(&one);
            async move { catalog.fetch_one(id).await }
        })
        .load_all(move || {
            let catalog = Arc::clone(&all);
            async move { catalog.fetch_all().await }
        })
        .named_query("by-slug", move |_, args| {
            let catalog = Arc::clone(&slug);
            async move { catalog.by_field("slug", first(&args)?).await }
        })
        .named_query("by-tag", move |_, args| {
            let catalog = Arc::clone(&tag);
            async move { catalog.by_tag(first(&args)?).await }
        })
        .named_query("by-author", move |_, args| {
            let catalog = Arc::clone(&author);
            async move { catalog.by_field("author", first(&args)?).await }
        })
        .searchable_fields(["title", "slug"])
        .sublist("published", |post: &Value| post["status"] == "published")
        .sublist("draft", |post: &Value| post["status"] == "draft")
}

fn first(args: &[String]) -> Result<&str, LoadError> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| LoadError::from("query needs one argument"))
}
