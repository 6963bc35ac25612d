//! Typed records returned by the remote API.
//!
//! Field names follow the REST v1.1 JSON payloads so the HTTP adapter can
//! deserialize straight into these types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A user object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteUser {
    pub id: i64,
    pub screen_name: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "profile_image_url_https")]
    pub profile_image_url: Option<String>,
    pub lang: Option<String>,
    pub location: Option<String>,
    pub default_profile_image: bool,
    pub verified: bool,
    pub friends_count: i64,
    pub followers_count: i64,
    pub protected: bool,
}

/// A list summary as returned by membership/subscription endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: i64,
    pub name: String,
    pub full_name: String,
}

/// The author block embedded in a status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUser {
    pub id: i64,
    pub screen_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagEntity {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEntity {
    pub screen_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub expanded_url: Option<String>,
}

/// Entities extracted by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    pub hashtags: Vec<HashtagEntity>,
    pub user_mentions: Vec<MentionEntity>,
    pub urls: Vec<UrlEntity>,
}

/// A raw status record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub id: i64,
    #[serde(alias = "full_text")]
    pub text: String,
    pub created_at: String,
    pub user: Option<StatusUser>,
    pub retweeted_status: Option<Box<Status>>,
    pub entities: Option<Entities>,
    pub favorite_count: i64,
    pub retweet_count: i64,
    pub source: Option<String>,
    pub coordinates: Option<serde_json::Value>,
    pub in_reply_to_screen_name: Option<String>,
    pub quoted_status_id: Option<i64>,
}

/// One page of a cursor-paginated result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation for the next page; `None` at the end.
    pub next_cursor: Option<i64>,
}

impl<T> Page<T> {
    pub const fn new(items: Vec<T>, next_cursor: Option<i64>) -> Self {
        Self { items, next_cursor }
    }

    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// How a user is addressed in a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserRef {
    Id(i64),
    ScreenName(String),
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::ScreenName(name) => write!(f, "@{name}"),
        }
    }
}

/// Parameters of one search request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Only results newer than this ID.
    pub since_id: Option<i64>,
    /// Only results at or older than this ID.
    pub max_id: Option<i64>,
    /// Results per page, at most 100.
    pub count: u32,
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub lang: Option<String>,
}

/// An event delivered by a push feed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Status(Box<Status>),
    /// Keep-alive with no payload.
    Heartbeat,
    /// Nothing arrived within the feed's poll interval.
    Idle,
    /// Delivery problem (disconnect, timeout, undecodable message).
    Error(String),
    /// The remote side ended the session.
    Closed,
}

/// A push feed of statuses.
pub trait StatusFeed: Send {
    /// Block until the next event arrives or the feed's poll interval passes.
    fn next_event(&mut self) -> StreamEvent;

    /// Close the underlying connection.
    fn close(&mut self);
}
