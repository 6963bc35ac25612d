//! Data models for collected social-graph data.
//!
//! Every record is a collection-time snapshot tagged with the [`TaskId`] of the
//! run that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::types::RemoteUser;

/// Caller-supplied identifier correlating records to one collection run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user profile snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub screen_name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub avatar_url: Option<String>,
    pub language: Option<String>,
    pub location: Option<String>,
    pub uses_default_avatar: bool,
    pub verified: bool,
    pub friends_count: i64,
    pub followers_count: i64,
    /// Account inaccessible to non-follower API calls.
    pub is_protected: bool,
    /// Excluded from expansion because of the follower ceiling.
    pub exceeds_follower_ceiling: bool,
    pub task_id: TaskId,
}

impl UserProfile {
    /// Snapshot a remote user for the given task.
    #[must_use]
    pub fn from_remote(user: &RemoteUser, task_id: &TaskId) -> Self {
        Self {
            user_id: user.id,
            screen_name: user.screen_name.clone(),
            display_name: user.name.clone(),
            description: user.description.clone().filter(|d| !d.is_empty()),
            created_at: user.created_at.as_deref().and_then(parse_api_date),
            url: user.url.clone(),
            avatar_url: user.profile_image_url.clone(),
            language: user.lang.clone(),
            location: user.location.clone().filter(|l| !l.is_empty()),
            uses_default_avatar: user.default_profile_image,
            verified: user.verified,
            friends_count: user.friends_count,
            followers_count: user.followers_count,
            is_protected: user.protected,
            exceeds_follower_ceiling: false,
            task_id: task_id.clone(),
        }
    }
}

/// Which collection direction produced an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The subject follows the target.
    Friend,
    /// The target follows the subject.
    Follower,
}

impl RelationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Friend => "friend",
            Self::Follower => "follower",
        }
    }

    /// Plural label used in log lines ("friends", "followers").
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Friend => "friends",
            Self::Follower => "followers",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friend" | "friends" => Ok(Self::Friend),
            "follower" | "followers" => Ok(Self::Follower),
            _ => Err(format!("Invalid relation kind: {s}")),
        }
    }
}

/// A directed edge between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub kind: RelationKind,
    pub task_id: TaskId,
}

/// A list and the ego users attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListInfo {
    pub list_id: i64,
    pub name: String,
    pub full_name: String,
    pub members: Vec<i64>,
    pub subscribers: Vec<i64>,
    pub task_id: TaskId,
}

/// How an ego user relates to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListRole {
    Member,
    Subscriber,
}

/// A normalized status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub tweet_id: i64,
    pub author_id: i64,
    pub author_screen_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub is_retweet: bool,
    pub mentions: Vec<String>,
    pub hashtags: Vec<String>,
    pub links: Vec<String>,
    pub favorite_count: i64,
    pub retweet_count: i64,
    pub source: Option<String>,
    pub coordinates: Option<serde_json::Value>,
    pub in_reply_to_screen_name: Option<String>,
    pub quoted_status_id: Option<i64>,
    pub task_id: TaskId,
}

/// Aggregate counts for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub users_count: i64,
    pub distinct_users_count: i64,
    pub friend_edges_count: i64,
    pub follower_edges_count: i64,
    pub lists_count: i64,
    pub tweets_count: i64,
    pub first_tweet_date: Option<DateTime<Utc>>,
    pub last_tweet_date: Option<DateTime<Utc>>,
}

/// Parse the API's date format: "Fri Jan 09 15:12:21 +0000 2026".
#[must_use]
pub fn parse_api_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(date_str, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_parse_api_date() {
        let dt = parse_api_date("Fri Jan 09 15:12:21 +0000 2026").unwrap();
        assert_eq!(dt.year(), 2026);
        assert_eq!(dt.day(), 9);
        assert!(parse_api_date("2026-01-09").is_none());
    }

    #[test]
    fn test_relation_kind_roundtrip_names() {
        assert_eq!("friends".parse::<RelationKind>().unwrap(), RelationKind::Friend);
        assert_eq!("follower".parse::<RelationKind>().unwrap(), RelationKind::Follower);
        assert!("enemy".parse::<RelationKind>().is_err());
        assert_eq!(RelationKind::Follower.plural(), "followers");
    }

    #[test]
    fn test_profile_from_remote_drops_empty_text() {
        let remote = RemoteUser {
            id: 7,
            screen_name: "alice".into(),
            name: "Alice".into(),
            description: Some(String::new()),
            location: Some(String::new()),
            followers_count: 12,
            ..RemoteUser::default()
        };
        let profile = UserProfile::from_remote(&remote, &TaskId::new("t1"));
        assert_eq!(profile.user_id, 7);
        assert_eq!(profile.description, None);
        assert_eq!(profile.location, None);
        assert!(!profile.exceeds_follower_ceiling);
        assert_eq!(profile.task_id.as_str(), "t1");
    }
}
