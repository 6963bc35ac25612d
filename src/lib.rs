//! egonet - ego-network collection for rate-limited social APIs
//!
//! Given a handful of seed ("ego") accounts, egonet resolves their profiles,
//! collects friends and followers, records list memberships, optionally
//! builds the full relationship graph among everyone it found, and gathers
//! tweets by search, timeline or live stream. Everything is written to
//! `SQLite` as it is collected.
//!
//! # Modules
//!
//! - [`api`] - Remote API trait, typed records, and the HTTP adapter
//! - [`client`] - Rate-limit waits and bounded retries around the API
//! - [`paginate`] - Local page slicing and remote cursor iteration
//! - [`profiles`] - Ego resolution and ID hydration
//! - [`relations`] - Friend/follower ID sets and edges
//! - [`ego`] - Ego-network orchestration
//! - [`tweets`] - Search and timeline collection
//! - [`stream`] - Live stream listener
//! - [`storage`] - `SQLite` persistence
//! - [`cli`] - Command-line interface definitions

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod ego;
pub mod error;
pub mod logging;
#[doc(hidden)]
pub mod mock;
pub mod model;
pub mod paginate;
pub mod profiles;
pub mod relations;
pub mod storage;
pub mod stream;
pub mod tweets;

pub use api::{HttpApi, RemoteApi};
pub use cli::*;
pub use client::{RateLimitedClient, RetryPolicy, Sleeper, ThreadSleeper};
pub use config::Config;
pub use ego::{EgoNetworkBuilder, NetworkOptions, NetworkReport};
pub use error::{ApiError, EgonetError, Result, StoreError, format_error};
pub use model::*;
pub use profiles::{Population, ProfileResolver, Resolution};
pub use relations::RelationCollector;
pub use storage::{RecordSink, Storage};
pub use stream::{StopHandle, StreamListener};
pub use tweets::{SearchWindow, TweetCollector};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "egonet.db";

/// Get the default data directory for egonet
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("egonet")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an integer with thousands separators.
#[must_use]
pub fn format_number(value: i64) -> String {
    let abs = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(abs.len() + abs.len() / 3);

    for (idx, ch) in abs.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut formatted: String = out.chars().rev().collect();
    if value < 0 {
        formatted.insert(0, '-');
    }
    formatted
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_count(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}
