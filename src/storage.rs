//! `SQLite` storage for collected graph data.
//!
//! The engine writes through the [`RecordSink`] trait one record at a time,
//! so everything persisted so far survives an interrupted run. [`Storage`] is
//! the `SQLite` implementation; it also offers the read helpers the CLI and
//! tests use for reporting.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{ListInfo, RelationKind, Relationship, TaskId, TaskStats, Tweet, UserProfile};

const SCHEMA_VERSION: i32 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for collected records.
pub trait RecordSink {
    /// Append a profile snapshot. The same user may be saved many times per task.
    fn save_user(&mut self, user: &UserProfile) -> StoreResult<()>;

    fn save_relationship(&mut self, relationship: &Relationship) -> StoreResult<()>;

    /// Insert or update a list, adding its member and subscriber sets.
    fn upsert_list(&mut self, list: &ListInfo) -> StoreResult<()>;

    fn add_list_member(&mut self, list_id: i64, user_id: i64, task_id: &TaskId) -> StoreResult<()>;

    fn add_list_subscriber(
        &mut self,
        list_id: i64,
        user_id: i64,
        task_id: &TaskId,
    ) -> StoreResult<()>;

    /// Insert or replace a tweet for the task.
    fn save_tweet(&mut self, tweet: &Tweet) -> StoreResult<()>;

    /// Drop and re-establish the underlying connection.
    fn reconnect(&mut self) -> StoreResult<()>;
}

impl<K: RecordSink + ?Sized> RecordSink for &mut K {
    fn save_user(&mut self, user: &UserProfile) -> StoreResult<()> {
        (**self).save_user(user)
    }

    fn save_relationship(&mut self, relationship: &Relationship) -> StoreResult<()> {
        (**self).save_relationship(relationship)
    }

    fn upsert_list(&mut self, list: &ListInfo) -> StoreResult<()> {
        (**self).upsert_list(list)
    }

    fn add_list_member(&mut self, list_id: i64, user_id: i64, task_id: &TaskId) -> StoreResult<()> {
        (**self).add_list_member(list_id, user_id, task_id)
    }

    fn add_list_subscriber(
        &mut self,
        list_id: i64,
        user_id: i64,
        task_id: &TaskId,
    ) -> StoreResult<()> {
        (**self).add_list_subscriber(list_id, user_id, task_id)
    }

    fn save_tweet(&mut self, tweet: &Tweet) -> StoreResult<()> {
        (**self).save_tweet(tweet)
    }

    fn reconnect(&mut self) -> StoreResult<()> {
        (**self).reconnect()
    }
}

/// Save one record under the store retry policy.
///
/// A transient failure triggers a reconnect and up to `retries` more attempts;
/// anything else abandons the record. Returns whether the record was saved.
pub fn persist<S, F>(sink: &mut S, retries: u32, record: &dyn Display, mut save: F) -> bool
where
    S: RecordSink + ?Sized,
    F: FnMut(&mut S) -> StoreResult<()>,
{
    let mut attempt = 0;
    loop {
        match save(sink) {
            Ok(()) => return true,
            Err(StoreError::Transient(reason)) if attempt < retries => {
                attempt += 1;
                warn!(record = %record, %reason, "Transient store failure, reconnecting");
                if let Err(e) = sink.reconnect() {
                    warn!(record = %record, error = %e, "Reconnect failed, abandoning record");
                    return false;
                }
            }
            Err(StoreError::Encoding(reason)) => {
                warn!(record = %record, %reason, "Record cannot be encoded, skipping");
                return false;
            }
            Err(e) => {
                warn!(record = %record, error = %e, "Failed to save record, skipping");
                return false;
            }
        }
    }
}

/// `SQLite` storage manager
pub struct Storage {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Self::connect(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let storage = Self {
            conn,
            path: Some(path),
        };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        let storage = Self { conn, path: None };
        storage.migrate()?;
        Ok(storage)
    }

    fn connect(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        // Several collection runs may share one file.
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        Ok(conn)
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version();
        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Ok(())
    }

    fn schema_version(&self) -> i32 {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .map(|v| v.parse().unwrap_or(0))
            .unwrap_or_default()
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- One row per snapshot; no uniqueness on user_id.
            CREATE TABLE IF NOT EXISTS users (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                screen_name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                description TEXT,
                created_at TEXT,
                url TEXT,
                avatar_url TEXT,
                language TEXT,
                location TEXT,
                uses_default_avatar INTEGER NOT NULL DEFAULT 0,
                verified INTEGER NOT NULL DEFAULT 0,
                friends_count INTEGER NOT NULL DEFAULT 0,
                followers_count INTEGER NOT NULL DEFAULT 0,
                is_protected INTEGER NOT NULL DEFAULT 0,
                exceeds_follower_ceiling INTEGER NOT NULL DEFAULT 0,
                task_id TEXT NOT NULL,
                collected_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_task ON users(task_id, user_id);

            CREATE TABLE IF NOT EXISTS relationships (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_user_id INTEGER NOT NULL,
                to_user_id INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('friend', 'follower')),
                task_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_relationships_task ON relationships(task_id, kind);

            CREATE TABLE IF NOT EXISTS lists (
                list_id INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL,
                PRIMARY KEY (list_id, task_id)
            );

            CREATE TABLE IF NOT EXISTS list_members (
                list_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                PRIMARY KEY (list_id, user_id, task_id)
            );

            CREATE TABLE IF NOT EXISTS list_subscribers (
                list_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                PRIMARY KEY (list_id, user_id, task_id)
            );

            CREATE TABLE IF NOT EXISTS tweets (
                tweet_id INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                author_screen_name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                is_retweet INTEGER NOT NULL DEFAULT 0,
                mentions_json TEXT NOT NULL,
                hashtags_json TEXT NOT NULL,
                links_json TEXT NOT NULL,
                favorite_count INTEGER NOT NULL DEFAULT 0,
                retweet_count INTEGER NOT NULL DEFAULT 0,
                source TEXT,
                coordinates_json TEXT,
                in_reply_to_screen_name TEXT,
                quoted_status_id INTEGER,
                PRIMARY KEY (tweet_id, task_id)
            );
            CREATE INDEX IF NOT EXISTS idx_tweets_created_at ON tweets(task_id, created_at);
            ",
        )?;
        Ok(())
    }

    // =========================================================================
    // Read helpers
    // =========================================================================

    /// Counts and tweet date bounds for one task.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn task_stats(&self, task_id: &TaskId) -> Result<TaskStats> {
        let query = r"
            SELECT
                (SELECT COUNT(*) FROM users WHERE task_id = ?1),
                (SELECT COUNT(DISTINCT user_id) FROM users WHERE task_id = ?1),
                (SELECT COUNT(*) FROM relationships WHERE task_id = ?1 AND kind = 'friend'),
                (SELECT COUNT(*) FROM relationships WHERE task_id = ?1 AND kind = 'follower'),
                (SELECT COUNT(*) FROM lists WHERE task_id = ?1),
                (SELECT COUNT(*) FROM tweets WHERE task_id = ?1),
                (SELECT MIN(created_at) FROM tweets WHERE task_id = ?1),
                (SELECT MAX(created_at) FROM tweets WHERE task_id = ?1)
        ";

        Ok(self
            .conn
            .query_row(query, params![task_id.as_str()], |row| {
                Ok(TaskStats {
                    users_count: row.get(0)?,
                    distinct_users_count: row.get(1)?,
                    friend_edges_count: row.get(2)?,
                    follower_edges_count: row.get(3)?,
                    lists_count: row.get(4)?,
                    tweets_count: row.get(5)?,
                    first_tweet_date: parse_rfc3339_opt(row.get(6)?),
                    last_tweet_date: parse_rfc3339_opt(row.get(7)?),
                })
            })
            .context("Failed to compute task statistics")?)
    }

    /// Every task id present in the database, alphabetically.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn task_ids(&self) -> Result<Vec<TaskId>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT task_id FROM users
            UNION SELECT task_id FROM relationships
            UNION SELECT task_id FROM tweets
            ORDER BY 1
            ",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(TaskId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Profile snapshots of a task in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn users_for_task(&self, task_id: &TaskId) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT user_id, screen_name, display_name, description, created_at, url,
                   avatar_url, language, location, uses_default_avatar, verified,
                   friends_count, followers_count, is_protected, exceeds_follower_ceiling
            FROM users WHERE task_id = ? ORDER BY row_id
            ",
        )?;
        let users = stmt
            .query_map(params![task_id.as_str()], |row| {
                Ok(UserProfile {
                    user_id: row.get(0)?,
                    screen_name: row.get(1)?,
                    display_name: row.get(2)?,
                    description: row.get(3)?,
                    created_at: parse_rfc3339_opt(row.get(4)?),
                    url: row.get(5)?,
                    avatar_url: row.get(6)?,
                    language: row.get(7)?,
                    location: row.get(8)?,
                    uses_default_avatar: row.get(9)?,
                    verified: row.get(10)?,
                    friends_count: row.get(11)?,
                    followers_count: row.get(12)?,
                    is_protected: row.get(13)?,
                    exceeds_follower_ceiling: row.get(14)?,
                    task_id: task_id.clone(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Edges of a task in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn relationships_for_task(&self, task_id: &TaskId) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn.prepare(
            "SELECT from_user_id, to_user_id, kind FROM relationships WHERE task_id = ? ORDER BY row_id",
        )?;
        let rows = stmt
            .query_map(params![task_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(from_user_id, to_user_id, kind)| {
                let kind: RelationKind = kind.parse().map_err(anyhow::Error::msg)?;
                Ok(Relationship {
                    from_user_id,
                    to_user_id,
                    kind,
                    task_id: task_id.clone(),
                })
            })
            .collect()
    }

    /// Tweets of a task, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tweets_for_task(&self, task_id: &TaskId) -> Result<Vec<Tweet>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT tweet_id, author_id, author_screen_name, text, created_at, is_retweet,
                   mentions_json, hashtags_json, links_json, favorite_count, retweet_count,
                   source, coordinates_json, in_reply_to_screen_name, quoted_status_id
            FROM tweets WHERE task_id = ? ORDER BY tweet_id DESC
            ",
        )?;
        let tweets = stmt
            .query_map(params![task_id.as_str()], |row| {
                let coordinates: Option<String> = row.get(12)?;
                Ok(Tweet {
                    tweet_id: row.get(0)?,
                    author_id: row.get(1)?,
                    author_screen_name: row.get(2)?,
                    text: row.get(3)?,
                    created_at: parse_rfc3339_opt(row.get(4)?).unwrap_or_default(),
                    is_retweet: row.get(5)?,
                    mentions: json_list(&row.get::<_, String>(6)?),
                    hashtags: json_list(&row.get::<_, String>(7)?),
                    links: json_list(&row.get::<_, String>(8)?),
                    favorite_count: row.get(9)?,
                    retweet_count: row.get(10)?,
                    source: row.get(11)?,
                    coordinates: coordinates.and_then(|c| serde_json::from_str(&c).ok()),
                    in_reply_to_screen_name: row.get(13)?,
                    quoted_status_id: row.get(14)?,
                    task_id: task_id.clone(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tweets)
    }

    /// Lists of a task with their member and subscriber sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn lists_for_task(&self, task_id: &TaskId) -> Result<Vec<ListInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT list_id, name, full_name FROM lists WHERE task_id = ? ORDER BY list_id")?;
        let rows = stmt
            .query_map(params![task_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(list_id, name, full_name)| {
                Ok(ListInfo {
                    list_id,
                    name,
                    full_name,
                    members: self.list_members(list_id, task_id)?,
                    subscribers: self.list_subscribers(list_id, task_id)?,
                    task_id: task_id.clone(),
                })
            })
            .collect()
    }

    /// Ego users that are members of a list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_members(&self, list_id: i64, task_id: &TaskId) -> Result<Vec<i64>> {
        self.list_users("list_members", list_id, task_id)
    }

    /// Ego users that subscribe to a list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_subscribers(&self, list_id: i64, task_id: &TaskId) -> Result<Vec<i64>> {
        self.list_users("list_subscribers", list_id, task_id)
    }

    fn list_users(&self, table: &str, list_id: i64, task_id: &TaskId) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT user_id FROM {table} WHERE list_id = ? AND task_id = ? ORDER BY user_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![list_id, task_id.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Newest stored tweet id for a task, used to resume searches.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_tweet_id(&self, task_id: &TaskId) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT MAX(tweet_id) FROM tweets WHERE task_id = ?",
                params![task_id.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten())
    }
}

impl RecordSink for Storage {
    fn save_user(&mut self, user: &UserProfile) -> StoreResult<()> {
        self.conn.execute(
            r"
            INSERT INTO users
            (user_id, screen_name, display_name, description, created_at, url, avatar_url,
             language, location, uses_default_avatar, verified, friends_count,
             followers_count, is_protected, exceeds_follower_ceiling, task_id, collected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                user.user_id,
                user.screen_name,
                user.display_name,
                user.description,
                user.created_at.map(|d| d.to_rfc3339()),
                user.url,
                user.avatar_url,
                user.language,
                user.location,
                user.uses_default_avatar,
                user.verified,
                user.friends_count,
                user.followers_count,
                user.is_protected,
                user.exceeds_follower_ceiling,
                user.task_id.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_relationship(&mut self, relationship: &Relationship) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO relationships (from_user_id, to_user_id, kind, task_id) VALUES (?, ?, ?, ?)",
            params![
                relationship.from_user_id,
                relationship.to_user_id,
                relationship.kind.as_str(),
                relationship.task_id.as_str(),
            ],
        )?;
        Ok(())
    }

    fn upsert_list(&mut self, list: &ListInfo) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        {
            tx.execute(
                r"
                INSERT INTO lists (list_id, task_id, name, full_name) VALUES (?, ?, ?, ?)
                ON CONFLICT (list_id, task_id)
                DO UPDATE SET name = excluded.name, full_name = excluded.full_name
                ",
                params![list.list_id, list.task_id.as_str(), list.name, list.full_name],
            )?;

            let mut members = tx.prepare_cached(
                "INSERT OR IGNORE INTO list_members (list_id, user_id, task_id) VALUES (?, ?, ?)",
            )?;
            for user_id in &list.members {
                members.execute(params![list.list_id, user_id, list.task_id.as_str()])?;
            }

            let mut subscribers = tx.prepare_cached(
                "INSERT OR IGNORE INTO list_subscribers (list_id, user_id, task_id) VALUES (?, ?, ?)",
            )?;
            for user_id in &list.subscribers {
                subscribers.execute(params![list.list_id, user_id, list.task_id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add_list_member(&mut self, list_id: i64, user_id: i64, task_id: &TaskId) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO list_members (list_id, user_id, task_id) VALUES (?, ?, ?)",
            params![list_id, user_id, task_id.as_str()],
        )?;
        Ok(())
    }

    fn add_list_subscriber(
        &mut self,
        list_id: i64,
        user_id: i64,
        task_id: &TaskId,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO list_subscribers (list_id, user_id, task_id) VALUES (?, ?, ?)",
            params![list_id, user_id, task_id.as_str()],
        )?;
        Ok(())
    }

    fn save_tweet(&mut self, tweet: &Tweet) -> StoreResult<()> {
        let coordinates = tweet
            .coordinates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r"
            INSERT OR REPLACE INTO tweets
            (tweet_id, task_id, author_id, author_screen_name, text, created_at, is_retweet,
             mentions_json, hashtags_json, links_json, favorite_count, retweet_count, source,
             coordinates_json, in_reply_to_screen_name, quoted_status_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                tweet.tweet_id,
                tweet.task_id.as_str(),
                tweet.author_id,
                tweet.author_screen_name,
                tweet.text,
                tweet.created_at.to_rfc3339(),
                tweet.is_retweet,
                serde_json::to_string(&tweet.mentions)?,
                serde_json::to_string(&tweet.hashtags)?,
                serde_json::to_string(&tweet.links)?,
                tweet.favorite_count,
                tweet.retweet_count,
                tweet.source,
                coordinates,
                tweet.in_reply_to_screen_name,
                tweet.quoted_status_id,
            ],
        )?;
        Ok(())
    }

    fn reconnect(&mut self) -> StoreResult<()> {
        // An in-memory database cannot be reopened without losing its contents.
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        debug!(path = %path.display(), "Reconnecting to database");
        self.conn = Self::connect(&path)?;
        Ok(())
    }
}

fn parse_rfc3339_opt(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn task() -> TaskId {
        TaskId::new("t1")
    }

    fn profile(user_id: i64, name: &str) -> UserProfile {
        UserProfile {
            user_id,
            screen_name: name.to_string(),
            display_name: name.to_uppercase(),
            description: Some("bio 🦀".into()),
            created_at: Utc.with_ymd_and_hms(2012, 3, 4, 5, 6, 7).single(),
            url: None,
            avatar_url: None,
            language: Some("en".into()),
            location: None,
            uses_default_avatar: false,
            verified: true,
            friends_count: 3,
            followers_count: 4,
            is_protected: false,
            exceeds_follower_ceiling: false,
            task_id: task(),
        }
    }

    fn tweet(tweet_id: i64, text: &str) -> Tweet {
        Tweet {
            tweet_id,
            author_id: 1,
            author_screen_name: "alice".into(),
            text: text.into(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 9, 15, 12, 21).single().unwrap(),
            is_retweet: false,
            mentions: vec!["bob".into()],
            hashtags: vec!["rust".into()],
            links: vec!["https://example.com".into()],
            favorite_count: 2,
            retweet_count: 1,
            source: Some("web".into()),
            coordinates: Some(serde_json::json!({"type": "Point", "coordinates": [4.9, 52.3]})),
            in_reply_to_screen_name: None,
            quoted_status_id: Some(77),
            task_id: task(),
        }
    }

    #[test]
    fn test_create_database() {
        let storage = Storage::open_memory().unwrap();
        assert_eq!(storage.schema_version(), SCHEMA_VERSION);
        assert_eq!(storage.task_stats(&task()).unwrap(), TaskStats::default());
    }

    #[test]
    fn test_open_file_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("egonet.db");
        let mut storage = Storage::open(&path).unwrap();
        storage.save_user(&profile(1, "alice")).unwrap();
        storage.reconnect().unwrap();
        assert_eq!(storage.users_for_task(&task()).unwrap().len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_user_snapshots_are_not_merged() {
        let mut storage = Storage::open_memory().unwrap();
        storage.save_user(&profile(1, "alice")).unwrap();
        storage.save_user(&profile(1, "alice")).unwrap();
        storage.save_user(&profile(2, "bob")).unwrap();

        let stats = storage.task_stats(&task()).unwrap();
        assert_eq!(stats.users_count, 3);
        assert_eq!(stats.distinct_users_count, 2);

        let users = storage.users_for_task(&task()).unwrap();
        assert_eq!(users[0], profile(1, "alice"));
    }

    #[test]
    fn test_relationships_keep_duplicates() {
        let mut storage = Storage::open_memory().unwrap();
        let edge = Relationship {
            from_user_id: 1,
            to_user_id: 2,
            kind: RelationKind::Follower,
            task_id: task(),
        };
        storage.save_relationship(&edge).unwrap();
        storage.save_relationship(&edge).unwrap();

        let edges = storage.relationships_for_task(&task()).unwrap();
        assert_eq!(edges, vec![edge.clone(), edge]);
        assert_eq!(storage.task_stats(&task()).unwrap().follower_edges_count, 2);
    }

    #[test]
    fn test_list_upsert_accumulates_sets() {
        let mut storage = Storage::open_memory().unwrap();
        let mut list = ListInfo {
            list_id: 9,
            name: "rustaceans".into(),
            full_name: "@carol/rustaceans".into(),
            members: vec![1],
            subscribers: vec![],
            task_id: task(),
        };
        storage.upsert_list(&list).unwrap();

        list.name = "crabs".into();
        list.members = vec![1, 2];
        list.subscribers = vec![3];
        storage.upsert_list(&list).unwrap();
        storage.add_list_member(9, 4, &task()).unwrap();
        storage.add_list_subscriber(9, 3, &task()).unwrap();

        let lists = storage.lists_for_task(&task()).unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, "crabs");
        assert_eq!(lists[0].members, vec![1, 2, 4]);
        assert_eq!(lists[0].subscribers, vec![3]);
    }

    #[test]
    fn test_tweet_upsert_per_task() {
        let mut storage = Storage::open_memory().unwrap();
        storage.save_tweet(&tweet(10, "first")).unwrap();
        storage.save_tweet(&tweet(10, "edited")).unwrap();
        storage.save_tweet(&tweet(11, "second")).unwrap();

        let mut other = tweet(10, "other task");
        other.task_id = TaskId::new("t2");
        storage.save_tweet(&other).unwrap();

        let tweets = storage.tweets_for_task(&task()).unwrap();
        assert_eq!(tweets.len(), 2);
        assert_eq!(tweets[0].tweet_id, 11);
        assert_eq!(tweets[1].text, "edited");
        assert_eq!(tweets[1], tweet(10, "edited"));
        assert_eq!(storage.latest_tweet_id(&task()).unwrap(), Some(11));
        assert_eq!(storage.task_ids().unwrap(), vec![task(), TaskId::new("t2")]);
    }

    #[test]
    fn test_stats_date_range() {
        let mut storage = Storage::open_memory().unwrap();
        let mut early = tweet(1, "early");
        early.created_at = Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).single().unwrap();
        storage.save_tweet(&early).unwrap();
        storage.save_tweet(&tweet(2, "late")).unwrap();

        let stats = storage.task_stats(&task()).unwrap();
        assert_eq!(stats.tweets_count, 2);
        assert_eq!(stats.first_tweet_date, Some(early.created_at));
        assert_eq!(stats.last_tweet_date, Some(tweet(2, "late").created_at));
    }

    struct FlakySink {
        inner: Storage,
        failures: Vec<StoreError>,
        reconnects: u32,
    }

    impl RecordSink for FlakySink {
        fn save_user(&mut self, user: &UserProfile) -> StoreResult<()> {
            match self.failures.pop() {
                Some(err) => Err(err),
                None => self.inner.save_user(user),
            }
        }
        fn save_relationship(&mut self, r: &Relationship) -> StoreResult<()> {
            self.inner.save_relationship(r)
        }
        fn upsert_list(&mut self, list: &ListInfo) -> StoreResult<()> {
            self.inner.upsert_list(list)
        }
        fn add_list_member(&mut self, l: i64, u: i64, t: &TaskId) -> StoreResult<()> {
            self.inner.add_list_member(l, u, t)
        }
        fn add_list_subscriber(&mut self, l: i64, u: i64, t: &TaskId) -> StoreResult<()> {
            self.inner.add_list_subscriber(l, u, t)
        }
        fn save_tweet(&mut self, tweet: &Tweet) -> StoreResult<()> {
            self.inner.save_tweet(tweet)
        }
        fn reconnect(&mut self) -> StoreResult<()> {
            self.reconnects += 1;
            Ok(())
        }
    }

    fn flaky(failures: Vec<StoreError>) -> FlakySink {
        FlakySink {
            inner: Storage::open_memory().unwrap(),
            failures,
            reconnects: 0,
        }
    }

    #[test]
    fn test_persist_retries_once_after_reconnect() {
        let mut sink = flaky(vec![StoreError::Transient("locked".into())]);
        let user = profile(1, "alice");
        assert!(persist(&mut sink, 1, &"user 1", |s| s.save_user(&user)));
        assert_eq!(sink.reconnects, 1);
        assert_eq!(sink.inner.users_for_task(&task()).unwrap().len(), 1);
    }

    #[test]
    fn test_persist_abandons_after_second_transient() {
        let mut sink = flaky(vec![
            StoreError::Transient("locked".into()),
            StoreError::Transient("locked".into()),
        ]);
        let user = profile(1, "alice");
        assert!(!persist(&mut sink, 1, &"user 1", |s| s.save_user(&user)));
        assert_eq!(sink.reconnects, 1);
        assert!(sink.inner.users_for_task(&task()).unwrap().is_empty());
    }

    #[test]
    fn test_persist_skips_encoding_failures() {
        let mut sink = flaky(vec![StoreError::Encoding("bad text".into())]);
        let user = profile(1, "alice");
        assert!(!persist(&mut sink, 1, &"user 1", |s| s.save_user(&user)));
        assert_eq!(sink.reconnects, 0);

        // The next record is unaffected.
        assert!(persist(&mut sink, 1, &"user 1", |s| s.save_user(&user)));
    }
}
