//! Command-line interface definitions.
//!
//! This module defines the CLI of the demo binary using clap. The demo
//! wires a cache to an in-process mock post catalogue.

use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::expiry::ExpiryStrategy;

/// megamap demo.
///
/// Exercises the cache against a simulated slow post backend.
#[derive(Parser, Debug)]
#[command(name = "megamap-demo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Simulated backend latency in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub latency_ms: u64,

    /// How long entries stay fresh, in milliseconds. 0 disables expiry.
    #[arg(long, default_value_t = 0)]
    pub expiry_ms: u64,

    /// Serve expired entries immediately and reload them in the background.
    #[arg(long)]
    pub stale_while_revalidate: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: DemoCommand,
}

impl Cli {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn expiry_strategy(&self) -> ExpiryStrategy {
        if self.stale_while_revalidate {
            ExpiryStrategy::StaleWhileRevalidate
        } else {
            ExpiryStrategy::BlockAndRefresh
        }
    }
}

/// Available demo commands.
#[derive(Subcommand, Debug)]
pub enum DemoCommand {
    /// Get posts by id.
    ///
    /// Every id is requested twice concurrently; the backend sees one fetch per id.
    Get {
        /// The ids to look up.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Load and print every post.
    List {
        /// Reload even if posts are already cached.
        #[arg(long)]
        refresh: bool,
    },

    /// Search titles and slugs, with a fuzzy fallback.
    Search {
        /// The text to look for.
        query: String,
    },

    /// Print a derived sublist (published, draft).
    Sublist {
        /// The sublist name.
        name: String,
    },

    /// Run a named query (by-slug, by-tag, by-author).
    Query {
        /// The query name.
        name: String,
        /// Query arguments.
        args: Vec<String>,
    },

    /// Refresh periodically and report every update.
    Watch {
        /// Refresh period in milliseconds.
        #[arg(long, default_value_t = 500)]
        refresh_ms: u64,
        /// Number of updates to report before exiting.
        #[arg(long, default_value_t = 3)]
        updates: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get() {
        let cli = Cli::parse_from(["test", "get", "key1", "key2"]);
        match cli.command {
            DemoCommand::Get { ids } => assert_eq!(ids, vec!["key1", "key2"]),
            _ => panic!("Expected Get command"),
        }
    }

    #[test]
    fn test_get_requires_an_id() {
        assert!(Cli::try_parse_from(["test", "get"]).is_err());
    }

    #[test]
    fn test_parse_list_refresh() {
        let cli = Cli::parse_from(["test", "list", "--refresh"]);
        assert!(matches!(cli.command, DemoCommand::List { refresh: true }));
    }

    #[test]
    fn test_parse_query_args() {
        let cli = Cli::parse_from(["test", "query", "by-tag", "mock"]);
        match cli.command {
            DemoCommand::Query { name, args } => {
                assert_eq!(name, "by-tag");
                assert_eq!(args, vec!["mock"]);
            }
            _ => panic!("Expected Query command"),
        }
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::parse_from([
            "test",
            "--expiry-ms",
            "1000",
            "--stale-while-revalidate",
            "sublist",
            "draft",
        ]);
        assert_eq!(cli.expiry(), Duration::from_millis(1000));
        assert_eq!(cli.latency(), Duration::from_millis(50));
        assert_eq!(cli.expiry_strategy(), ExpiryStrategy::StaleWhileRevalidate);
    }

    #[test]
    fn test_parse_watch_defaults() {
        let cli = Cli::parse_from(["test", "watch"]);
        match cli.command {
            DemoCommand::Watch {
                refresh_ms,
                updates,
            } => {
                assert_eq!(refresh_ms, 500);
                assert_eq!(updates, 3);
            }
            _ => panic!("Expected Watch command"),
        }
    }
}
