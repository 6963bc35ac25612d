//! Rate-limit aware wrapper around a [`RemoteApi`].
//!
//! Two layers of recovery:
//!
//! - every call goes through [`RateLimitedClient::api_call`], which waits out
//!   rate-limit windows (proactively, from the last observed headers, and
//!   reactively on a `RateLimited` response) so callers never see them;
//! - [`RateLimitedClient::with_retry`] runs one logical sub-operation under a
//!   bounded retry budget, re-authenticating after each transient failure.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::types::{ListSummary, Page, RemoteUser, SearchRequest, Status, StatusFeed, UserRef};
use crate::api::{RateLimitInfo, RemoteApi};
use crate::config::RetryConfig;
use crate::error::{ApiError, ApiResult};
use crate::model::{ListRole, RelationKind};

/// Source of blocking waits.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry budget for one sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

/// Extra wait after a window resets, so the first call lands inside the new window.
const RESET_SLACK: Duration = Duration::from_secs(5);

pub struct RateLimitedClient<A, S = ThreadSleeper> {
    api: A,
    sleeper: S,
    policy: RetryPolicy,
    clock: fn() -> u64,
}

impl<A: RemoteApi> RateLimitedClient<A, ThreadSleeper> {
    pub fn new(api: A, policy: RetryPolicy) -> Self {
        Self::with_sleeper(api, policy, ThreadSleeper)
    }
}

impl<A: RemoteApi, S: Sleeper> RateLimitedClient<A, S> {
    pub fn with_sleeper(api: A, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            api,
            sleeper,
            policy,
            clock: unix_now,
        }
    }

    /// Replace the wall clock used for proactive rate-limit waits.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub const fn api(&self) -> &A {
        &self.api
    }

    pub const fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Courtesy delay between page fetches.
    pub fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }

    /// Establish the session. Failure here is the only fatal startup error.
    pub fn authenticate(&mut self) -> ApiResult<()> {
        self.api.authenticate()
    }

    /// Confirm the session is accepted before a run starts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Fatal`] for rejected credentials, or the retry
    /// outcome of a connection that never answers.
    pub fn verify_credentials(&mut self) -> ApiResult<()> {
        self.with_retry("verify credentials", |c| {
            c.api_call("account/verify_credentials", |api| api.verify_credentials())
        })
    }

    /// Issue one remote call, absorbing rate-limit waits.
    pub fn api_call<T>(&self, label: &str, call: impl Fn(&A) -> ApiResult<T>) -> ApiResult<T> {
        loop {
            self.wait_for_window(label);
            match call(&self.api) {
                Err(ApiError::RateLimited { retry_after }) => {
                    warn!(
                        call = label,
                        wait_secs = retry_after.as_secs(),
                        "Rate limited, waiting for the window to reset"
                    );
                    self.sleeper.sleep(retry_after);
                }
                other => return other,
            }
        }
    }

    fn wait_for_window(&self, label: &str) {
        let Some(info) = self.api.rate_limit() else {
            return;
        };
        if let Some(wait) = proactive_wait(&info, (self.clock)()) {
            info!(
                call = label,
                wait_secs = wait.as_secs(),
                "Rate-limit window used up, sleeping until reset"
            );
            self.sleeper.sleep(wait);
        }
    }

    /// Run one logical sub-operation under the retry budget.
    ///
    /// `attempt → success | retryable (wait, reauth, retry) | permanent (abandon)`.
    /// The attempt counter is local to this call.
    ///
    /// # Errors
    ///
    /// Returns the permanent error unchanged, [`ApiError::Exhausted`] when the
    /// budget runs out, or the re-authentication error if that fails.
    pub fn with_retry<T>(
        &mut self,
        label: &str,
        mut operation: impl FnMut(&Self) -> ApiResult<T>,
    ) -> ApiResult<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match operation(self) {
                Ok(value) => return Ok(value),
                Err(ApiError::RateLimited { retry_after }) => {
                    // Does not count against the budget.
                    attempt -= 1;
                    self.sleeper.sleep(retry_after);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(operation = label, error = %err, "Not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= self.policy.max_attempts => {
                    warn!(
                        operation = label,
                        attempts = attempt,
                        error = %err,
                        "Retry budget exhausted, abandoning"
                    );
                    return Err(ApiError::Exhausted {
                        operation: label.to_string(),
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        backoff_secs = self.policy.backoff.as_secs(),
                        error = %err,
                        "Transient failure, backing off"
                    );
                    self.sleeper.sleep(self.policy.backoff);
                    self.api.authenticate()?;
                }
            }
        }
    }

    pub fn get_user(&self, screen_name: &str) -> ApiResult<RemoteUser> {
        self.api_call("users/show", |api| api.get_user(screen_name))
    }

    pub fn lookup_user_ids(&self, ids: &[i64]) -> ApiResult<Vec<RemoteUser>> {
        self.api_call("users/lookup", |api| api.lookup_user_ids(ids))
    }

    pub fn lookup_screen_names(&self, names: &[String]) -> ApiResult<Vec<RemoteUser>> {
        self.api_call("users/lookup", |api| api.lookup_screen_names(names))
    }

    /// One page of friend or follower IDs.
    pub fn ids_page(&self, kind: RelationKind, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        match kind {
            RelationKind::Friend => self.api_call("friends/ids", |api| api.friend_ids(user, cursor)),
            RelationKind::Follower => {
                self.api_call("followers/ids", |api| api.follower_ids(user, cursor))
            }
        }
    }

    /// One page of lists the user belongs to or subscribes to.
    pub fn lists_page(
        &self,
        role: ListRole,
        user: &UserRef,
        cursor: Option<i64>,
    ) -> ApiResult<Page<ListSummary>> {
        match role {
            ListRole::Member => {
                self.api_call("lists/memberships", |api| api.list_memberships(user, cursor))
            }
            ListRole::Subscriber => {
                self.api_call("lists/subscriptions", |api| api.list_subscriptions(user, cursor))
            }
        }
    }

    pub fn search(&self, request: &SearchRequest) -> ApiResult<Vec<Status>> {
        self.api_call("search/tweets", |api| api.search(request))
    }

    pub fn user_timeline_page(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<Status>> {
        self.api_call("statuses/user_timeline", |api| api.user_timeline(user, cursor))
    }

    pub fn open_stream(&self, track: &[String]) -> ApiResult<Box<dyn StatusFeed>> {
        self.api_call("statuses/filter", |api| api.open_stream(track))
    }
}

/// How long to sleep before calling into an exhausted window.
fn proactive_wait(info: &RateLimitInfo, now: u64) -> Option<Duration> {
    if !info.is_exhausted() {
        return None;
    }
    info.time_until_reset(now).map(|d| d + RESET_SLACK)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
