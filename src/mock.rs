//! In-memory stand-ins for the remote API and the wall clock.
//!
//! Test support only. Used by the unit tests and the integration tests;
//! nothing in the collection engine depends on this module, and it is left
//! out of the documented API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::api::types::{
    ListSummary, Page, RemoteUser, SearchRequest, Status, StatusFeed, StatusUser, StreamEvent,
    UserRef,
};
use crate::api::{RateLimitInfo, RemoteApi};
use crate::client::Sleeper;
use crate::error::{ApiError, ApiResult};

/// Records every requested sleep instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

/// A scripted [`RemoteApi`].
///
/// Users, ID pages, lists, search results and timelines are configured up
/// front. Failures can be queued per endpoint (`"friends/ids"`) or per
/// endpoint and subject (`"friends/ids:42"`, `"users/show:alice"`); each queued
/// failure is consumed by the next matching call. Every call is logged.
#[derive(Default)]
pub struct MockApi {
    users: HashMap<i64, RemoteUser>,
    friends: HashMap<i64, Vec<Vec<i64>>>,
    followers: HashMap<i64, Vec<Vec<i64>>>,
    memberships: HashMap<i64, Vec<Vec<ListSummary>>>,
    subscriptions: HashMap<i64, Vec<Vec<ListSummary>>>,
    searches: HashMap<String, Vec<Status>>,
    timelines: HashMap<i64, Vec<Status>>,
    timeline_page_size: usize,
    stream: Mutex<Option<Vec<StreamEvent>>>,
    stream_closed: Arc<AtomicBool>,
    failures: Mutex<HashMap<String, VecDeque<ApiError>>>,
    delayed: Mutex<Vec<(String, usize, ApiError)>>,
    calls: Mutex<Vec<String>>,
    searches_seen: Mutex<Vec<SearchRequest>>,
    auth_count: Mutex<u32>,
    rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl MockApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeline_page_size: 200,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_user(self, id: i64, screen_name: &str, friends: i64, followers: i64) -> Self {
        self.with_profile(RemoteUser {
            id,
            screen_name: screen_name.to_string(),
            name: screen_name.to_string(),
            friends_count: friends,
            followers_count: followers,
            ..RemoteUser::default()
        })
    }

    #[must_use]
    pub fn with_protected_user(self, id: i64, screen_name: &str, friends: i64, followers: i64) -> Self {
        self.with_profile(RemoteUser {
            id,
            screen_name: screen_name.to_string(),
            name: screen_name.to_string(),
            friends_count: friends,
            followers_count: followers,
            protected: true,
            ..RemoteUser::default()
        })
    }

    #[must_use]
    pub fn with_profile(mut self, user: RemoteUser) -> Self {
        self.users.insert(user.id, user);
        self
    }

    /// Friend ID pages of a user, in cursor order.
    #[must_use]
    pub fn with_friends(mut self, id: i64, pages: Vec<Vec<i64>>) -> Self {
        self.friends.insert(id, pages);
        self
    }

    #[must_use]
    pub fn with_followers(mut self, id: i64, pages: Vec<Vec<i64>>) -> Self {
        self.followers.insert(id, pages);
        self
    }

    #[must_use]
    pub fn with_memberships(mut self, id: i64, pages: Vec<Vec<ListSummary>>) -> Self {
        self.memberships.insert(id, pages);
        self
    }

    #[must_use]
    pub fn with_subscriptions(mut self, id: i64, pages: Vec<Vec<ListSummary>>) -> Self {
        self.subscriptions.insert(id, pages);
        self
    }

    /// Results for one exact query string; served newest first, honoring
    /// `count`, `max_id` and `since_id`.
    #[must_use]
    pub fn with_search(mut self, query: &str, mut statuses: Vec<Status>) -> Self {
        statuses.sort_by(|a, b| b.id.cmp(&a.id));
        self.searches.insert(query.to_string(), statuses);
        self
    }

    #[must_use]
    pub fn with_timeline(mut self, user_id: i64, mut statuses: Vec<Status>, page_size: usize) -> Self {
        statuses.sort_by(|a, b| b.id.cmp(&a.id));
        self.timelines.insert(user_id, statuses);
        self.timeline_page_size = page_size.max(1);
        self
    }

    /// Events delivered by the next [`RemoteApi::open_stream`].
    #[must_use]
    pub fn with_stream(self, events: Vec<StreamEvent>) -> Self {
        *self.stream.lock() = Some(events);
        self
    }

    /// Queue a failure for the next call matching `key`.
    pub fn fail_next(&self, key: &str, error: ApiError) {
        self.failures
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    /// Let `successes` more calls matching `key` through, then fail the next one.
    pub fn fail_after(&self, key: &str, successes: usize, error: ApiError) {
        self.delayed.lock().push((key.to_string(), successes, error));
    }

    pub fn set_rate_limit(&self, info: Option<RateLimitInfo>) {
        *self.rate_limit.lock() = info;
    }

    /// Every call so far, as `endpoint:subject`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn calls_to(&self, endpoint: &str) -> usize {
        let prefix = format!("{endpoint}:");
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    #[must_use]
    pub fn calls_for(&self, endpoint: &str, subject: &str) -> usize {
        let key = format!("{endpoint}:{subject}");
        self.calls.lock().iter().filter(|c| **c == key).count()
    }

    #[must_use]
    pub fn searches(&self) -> Vec<SearchRequest> {
        self.searches_seen.lock().clone()
    }

    #[must_use]
    pub fn auth_count(&self) -> u32 {
        *self.auth_count.lock()
    }

    #[must_use]
    pub fn stream_closed(&self) -> bool {
        self.stream_closed.load(Ordering::SeqCst)
    }

    fn record(&self, endpoint: &str, subject: &str) -> ApiResult<()> {
        self.calls.lock().push(format!("{endpoint}:{subject}"));

        let keys = [format!("{endpoint}:{subject}"), endpoint.to_string()];
        let mut failures = self.failures.lock();
        for key in &keys {
            if let Some(err) = failures.get_mut(key).and_then(VecDeque::pop_front) {
                return Err(err);
            }
        }

        let mut delayed = self.delayed.lock();
        let mut fired = None;
        for (index, (key, successes, _)) in delayed.iter_mut().enumerate() {
            if !keys.contains(key) {
                continue;
            }
            if *successes == 0 {
                fired = Some(index);
                break;
            }
            *successes -= 1;
        }
        match fired {
            Some(index) => Err(delayed.remove(index).2),
            None => Ok(()),
        }
    }

    fn resolve(&self, user: &UserRef) -> ApiResult<i64> {
        match user {
            UserRef::Id(id) if self.users.contains_key(id) => Ok(*id),
            UserRef::ScreenName(name) => self
                .find_by_name(name)
                .map(|u| u.id)
                .ok_or_else(|| ApiError::not_found(format!("user {user}"))),
            UserRef::Id(_) => Err(ApiError::not_found(format!("user {user}"))),
        }
    }

    fn find_by_name(&self, name: &str) -> Option<&RemoteUser> {
        self.users
            .values()
            .find(|u| u.screen_name.eq_ignore_ascii_case(name))
    }

    fn subject(user: &UserRef) -> String {
        match user {
            UserRef::Id(id) => id.to_string(),
            UserRef::ScreenName(name) => name.to_lowercase(),
        }
    }

    fn cursor_page<T: Clone>(
        pages: Option<&Vec<Vec<T>>>,
        cursor: Option<i64>,
    ) -> Page<T> {
        let Some(pages) = pages else {
            return Page::last(Vec::new());
        };
        let index = usize::try_from(cursor.unwrap_or(0)).unwrap_or(0);
        let items = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| i64::try_from(index + 1).unwrap_or(i64::MAX));
        Page::new(items, next)
    }
}

impl RemoteApi for MockApi {
    fn authenticate(&mut self) -> ApiResult<()> {
        *self.auth_count.lock() += 1;
        self.record("authenticate", "")
    }

    fn verify_credentials(&self) -> ApiResult<()> {
        self.record("account/verify_credentials", "")
    }

    fn get_user(&self, screen_name: &str) -> ApiResult<RemoteUser> {
        self.record("users/show", &screen_name.to_lowercase())?;
        self.find_by_name(screen_name)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("user @{screen_name}")))
    }

    fn lookup_user_ids(&self, ids: &[i64]) -> ApiResult<Vec<RemoteUser>> {
        self.record("users/lookup", &ids.len().to_string())?;
        Ok(ids.iter().filter_map(|id| self.users.get(id).cloned()).collect())
    }

    fn lookup_screen_names(&self, names: &[String]) -> ApiResult<Vec<RemoteUser>> {
        self.record("users/lookup", &names.len().to_string())?;
        Ok(names
            .iter()
            .filter_map(|n| self.find_by_name(n).cloned())
            .collect())
    }

    fn friend_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        self.record("friends/ids", &Self::subject(user))?;
        let id = self.resolve(user)?;
        Ok(Self::cursor_page(self.friends.get(&id), cursor))
    }

    fn follower_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        self.record("followers/ids", &Self::subject(user))?;
        let id = self.resolve(user)?;
        Ok(Self::cursor_page(self.followers.get(&id), cursor))
    }

    fn list_memberships(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<ListSummary>> {
        self.record("lists/memberships", &Self::subject(user))?;
        let id = self.resolve(user)?;
        Ok(Self::cursor_page(self.memberships.get(&id), cursor))
    }

    fn list_subscriptions(
        &self,
        user: &UserRef,
        cursor: Option<i64>,
    ) -> ApiResult<Page<ListSummary>> {
        self.record("lists/subscriptions", &Self::subject(user))?;
        let id = self.resolve(user)?;
        Ok(Self::cursor_page(self.subscriptions.get(&id), cursor))
    }

    fn search(&self, request: &SearchRequest) -> ApiResult<Vec<Status>> {
        self.record("search/tweets", &request.query)?;
        self.searches_seen.lock().push(request.clone());

        let count = usize::try_from(request.count.max(1)).unwrap_or(usize::MAX);
        Ok(self
            .searches
            .get(&request.query)
            .map(|all| {
                all.iter()
                    .filter(|s| request.max_id.is_none_or(|max| s.id <= max))
                    .filter(|s| request.since_id.is_none_or(|since| s.id > since))
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn user_timeline(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<Status>> {
        self.record("statuses/user_timeline", &Self::subject(user))?;
        let id = self.resolve(user)?;
        let items: Vec<Status> = self
            .timelines
            .get(&id)
            .map(|all| {
                all.iter()
                    .filter(|s| cursor.is_none_or(|max| s.id <= max))
                    .take(self.timeline_page_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let next = items.iter().map(|s| s.id).min().map(|id| id - 1);
        Ok(Page::new(items, next))
    }

    fn open_stream(&self, track: &[String]) -> ApiResult<Box<dyn StatusFeed>> {
        self.record("statuses/filter", &track.join(","))?;
        let events = self.stream.lock().take().unwrap_or_default();
        Ok(Box::new(MockFeed {
            events: events.into(),
            closed: Arc::clone(&self.stream_closed),
        }))
    }

    fn rate_limit(&self) -> Option<RateLimitInfo> {
        *self.rate_limit.lock()
    }
}

struct MockFeed {
    events: VecDeque<StreamEvent>,
    closed: Arc<AtomicBool>,
}

impl StatusFeed for MockFeed {
    fn next_event(&mut self) -> StreamEvent {
        if self.closed.load(Ordering::SeqCst) {
            return StreamEvent::Closed;
        }
        self.events.pop_front().unwrap_or(StreamEvent::Closed)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A status authored by `screen_name`, dated 2026-01-09.
#[must_use]
pub fn status(id: i64, author_id: i64, screen_name: &str, text: &str) -> Status {
    Status {
        id,
        text: text.to_string(),
        created_at: "Fri Jan 09 15:12:21 +0000 2026".to_string(),
        user: Some(StatusUser {
            id: author_id,
            screen_name: screen_name.to_string(),
        }),
        ..Status::default()
    }
}

/// A list summary.
#[must_use]
pub fn list(id: i64, owner: &str, name: &str) -> ListSummary {
    ListSummary {
        id,
        name: name.to_string(),
        full_name: format!("@{owner}/{name}"),
    }
}
