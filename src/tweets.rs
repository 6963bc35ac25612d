//! Search- and timeline-based tweet collection.
//!
//! Searches page backwards: every page lowers the `max_id` watermark to one
//! below the oldest status seen, until a page comes back empty or the cap is
//! reached. Timelines use the same watermark as their cursor.

use chrono::{Days, NaiveDate};
use itertools::Itertools;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::types::{SearchRequest, Status, UserRef};
use crate::api::{RemoteApi, SEARCH_PAGE_SIZE};
use crate::client::{RateLimitedClient, Sleeper};
use crate::error::{ApiResult, NormalizeError};
use crate::model::{TaskId, Tweet, parse_api_date};
use crate::paginate::{CursorPages, paginate};
use crate::storage::{RecordSink, persist};

/// Free-text terms per search request.
pub const TERMS_PER_QUERY: usize = 10;

/// Screen names per search request; each expands to `from:n OR to:n`.
pub const NAMES_PER_QUERY: usize = 5;

/// Query of the language sample: common short Dutch and English words.
pub const SAMPLE_QUERY: &str = "en OR of OR is OR het OR de";

pub const SAMPLE_LANG: &str = "nl";

/// Batch search terms into OR-joined queries of quoted terms. Blank terms
/// are dropped.
#[must_use]
pub fn term_queries(terms: &[String]) -> Vec<String> {
    let terms = terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty());
    paginate(terms, TERMS_PER_QUERY)
        .map(|batch| batch.iter().map(|t| format!("\"{t}\"")).join(" OR "))
        .collect()
}

/// Batch screen names into `from:n OR to:n` queries.
#[must_use]
pub fn name_queries(names: &[String]) -> Vec<String> {
    let names = names
        .iter()
        .map(|n| n.trim().trim_start_matches('@'))
        .filter(|n| !n.is_empty());
    paginate(names, NAMES_PER_QUERY)
        .map(|batch| batch.iter().map(|n| format!("from:{n} OR to:{n}")).join(" OR "))
        .collect()
}

/// Turn a raw status into a tweet record.
///
/// A retweet keeps the retweeted status's text, which the API does not
/// truncate, and is flagged as such. Links prefer the expanded URL.
///
/// # Errors
///
/// Fails when the status has no author or an unreadable date.
pub fn normalize_status(status: &Status, task_id: &TaskId) -> Result<Tweet, NormalizeError> {
    let author = status
        .user
        .as_ref()
        .ok_or(NormalizeError::MissingAuthor { id: status.id })?;
    let created_at = parse_api_date(&status.created_at).ok_or_else(|| NormalizeError::BadDate {
        id: status.id,
        raw: status.created_at.clone(),
    })?;

    let (text, is_retweet) = match &status.retweeted_status {
        Some(original) => (original.text.clone(), true),
        None => (status.text.clone(), false),
    };

    let entities = status.entities.clone().unwrap_or_default();
    Ok(Tweet {
        tweet_id: status.id,
        author_id: author.id,
        author_screen_name: author.screen_name.clone(),
        text,
        created_at,
        is_retweet,
        mentions: entities.user_mentions.into_iter().map(|m| m.screen_name).collect(),
        hashtags: entities.hashtags.into_iter().map(|h| h.text).collect(),
        links: entities
            .urls
            .into_iter()
            .filter_map(|u| u.expanded_url.or(u.url))
            .collect(),
        favorite_count: status.favorite_count,
        retweet_count: status.retweet_count,
        source: status.source.clone(),
        coordinates: status.coordinates.clone(),
        in_reply_to_screen_name: status.in_reply_to_screen_name.clone(),
        quoted_status_id: status.quoted_status_id,
        task_id: task_id.clone(),
    })
}

/// Bounds of a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchWindow {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    /// Only statuses newer than this ID.
    pub since_id: Option<i64>,
    pub lang: Option<String>,
}

impl SearchWindow {
    /// The last `days` days up to and including `today`.
    #[must_use]
    pub fn recent(today: NaiveDate, days: u64) -> Self {
        Self {
            since: today.checked_sub_days(Days::new(days)),
            until: today.checked_add_days(Days::new(1)),
            ..Self::default()
        }
    }

    fn request(&self, query: &str, max_id: Option<i64>, count: u32) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            since_id: self.since_id,
            max_id,
            count,
            since: self.since,
            until: self.until,
            lang: self.lang.clone(),
        }
    }
}

/// Counts for one collection call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub queries: usize,
    pub pages: usize,
    pub fetched: usize,
    pub saved: usize,
    pub skipped: usize,
    /// Queries or users given up on, with the reason.
    pub abandoned: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TweetCollector {
    task_id: TaskId,
    store_retries: u32,
    page_delay: Duration,
    max_tweets: u64,
}

impl TweetCollector {
    pub const fn new(task_id: TaskId, store_retries: u32, page_delay: Duration, max_tweets: u64) -> Self {
        Self {
            task_id,
            store_retries,
            page_delay,
            max_tweets,
        }
    }

    /// Search for statuses containing any of `terms`.
    ///
    /// # Errors
    ///
    /// Returns a fatal API error; any other failure abandons only the query
    /// it hit and is listed in [`CollectionStats::abandoned`].
    pub fn search_terms<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        terms: &[String],
        window: &SearchWindow,
    ) -> ApiResult<CollectionStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        self.search_queries(client, sink, &term_queries(terms), window)
    }

    /// Search for statuses from or to any of `names`.
    pub fn search_names<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        names: &[String],
        window: &SearchWindow,
    ) -> ApiResult<CollectionStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        self.search_queries(client, sink, &name_queries(names), window)
    }

    /// A language sample: one search for `query` restricted to `lang`.
    pub fn collect_sample<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        query: &str,
        lang: &str,
    ) -> ApiResult<CollectionStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let window = SearchWindow {
            lang: Some(lang.to_string()),
            ..SearchWindow::default()
        };
        self.search_queries(client, sink, &[query.to_string()], &window)
    }

    fn search_queries<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        queries: &[String],
        window: &SearchWindow,
    ) -> ApiResult<CollectionStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let mut stats = CollectionStats::default();
        for query in queries {
            stats.queries += 1;
            let collected = self.search_backwards(client, sink, query, window, &mut stats)?;
            info!(task = %self.task_id, query, collected, "Search finished");
        }
        Ok(stats)
    }

    /// Page one query backwards. Returns the number of statuses fetched.
    fn search_backwards<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        query: &str,
        window: &SearchWindow,
        stats: &mut CollectionStats,
    ) -> ApiResult<u64>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let label = format!("search {query}");
        let mut max_id = None;
        let mut collected: u64 = 0;

        while collected < self.max_tweets {
            let remaining = self.max_tweets - collected;
            let count = u32::try_from(remaining).map_or(SEARCH_PAGE_SIZE, |r| r.min(SEARCH_PAGE_SIZE));
            let request = window.request(query, max_id, count);

            let statuses = match client.with_retry(&label, |c| c.search(&request)) {
                Ok(statuses) => statuses,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(task = %self.task_id, query, error = %err, "Abandoning search");
                    stats.abandoned.push(format!("{label}: {err}"));
                    break;
                }
            };
            if statuses.is_empty() {
                break;
            }

            stats.pages += 1;
            collected += statuses.len() as u64;
            max_id = statuses.iter().map(|s| s.id).min().map(|id| id - 1);
            self.store_page(sink, &statuses, stats);
            debug!(query, collected, ?max_id, "Search page stored");
            client.pause(self.page_delay);
        }
        Ok(collected)
    }

    /// Collect the timeline of each named user.
    ///
    /// # Errors
    ///
    /// Returns a fatal API error; other failures abandon only that user.
    pub fn timeline<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        names: &[String],
    ) -> ApiResult<CollectionStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let mut stats = CollectionStats::default();
        let names = names
            .iter()
            .map(|n| n.trim().trim_start_matches('@'))
            .filter(|n| !n.is_empty());

        for name in names {
            stats.queries += 1;
            let user = UserRef::ScreenName(name.to_string());
            let label = format!("timeline of {user}");

            let walked = client.with_retry(&label, |c| {
                for page in CursorPages::new(|cursor| c.user_timeline_page(&user, cursor)) {
                    let statuses = page?;
                    stats.pages += 1;
                    self.store_page(sink, &statuses, &mut stats);
                    c.pause(self.page_delay);
                }
                Ok(())
            });
            match walked {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(task = %self.task_id, user = name, error = %err, "Abandoning timeline");
                    stats.abandoned.push(format!("{label}: {err}"));
                }
            }
        }
        Ok(stats)
    }

    fn store_page<K: RecordSink + ?Sized>(
        &self,
        sink: &mut K,
        statuses: &[Status],
        stats: &mut CollectionStats,
    ) {
        for status in statuses {
            stats.fetched += 1;
            let saved = match normalize_status(status, &self.task_id) {
                Ok(tweet) => persist(sink, self.store_retries, &format_args!("tweet {}", tweet.tweet_id), |s| {
                    s.save_tweet(&tweet)
                }),
                Err(err) => {
                    warn!(task = %self.task_id, error = %err, "Skipping status");
                    false
                }
            };
            if saved {
                stats.saved += 1;
            } else {
                stats.skipped += 1;
            }
        }
    }
}
