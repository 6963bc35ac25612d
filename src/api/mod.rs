//! The remote API capability surface.
//!
//! The engine talks to the social-graph service only through [`RemoteApi`].
//! [`http::HttpApi`] is the adapter for the REST v1.1 service; tests plug in
//! scripted fakes.

pub mod feed;
pub mod http;
mod oauth;
pub mod types;

use std::time::Duration;

use crate::error::ApiResult;
use types::{ListSummary, Page, RemoteUser, SearchRequest, Status, StatusFeed, UserRef};

pub use http::HttpApi;

/// Maximum number of users a single lookup call accepts.
pub const LOOKUP_BATCH_SIZE: usize = 100;

/// Maximum number of statuses a single search call returns.
pub const SEARCH_PAGE_SIZE: u32 = 100;

/// Narrow, typed view of the remote service.
pub trait RemoteApi {
    /// Establish (or replace) the authenticated session.
    fn authenticate(&mut self) -> ApiResult<()>;

    /// Check the session against the service. Rejected credentials are
    /// reported as [`ApiError::Fatal`](crate::error::ApiError::Fatal).
    fn verify_credentials(&self) -> ApiResult<()>;

    fn get_user(&self, screen_name: &str) -> ApiResult<RemoteUser>;

    /// Resolve up to [`LOOKUP_BATCH_SIZE`] user IDs.
    fn lookup_user_ids(&self, ids: &[i64]) -> ApiResult<Vec<RemoteUser>>;

    /// Resolve up to [`LOOKUP_BATCH_SIZE`] screen names.
    fn lookup_screen_names(&self, names: &[String]) -> ApiResult<Vec<RemoteUser>>;

    fn friend_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>>;

    fn follower_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>>;

    fn list_memberships(&self, user: &UserRef, cursor: Option<i64>)
    -> ApiResult<Page<ListSummary>>;

    fn list_subscriptions(
        &self,
        user: &UserRef,
        cursor: Option<i64>,
    ) -> ApiResult<Page<ListSummary>>;

    fn search(&self, request: &SearchRequest) -> ApiResult<Vec<Status>>;

    fn user_timeline(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<Status>>;

    fn open_stream(&self, track: &[String]) -> ApiResult<Box<dyn StatusFeed>>;

    /// Rate-limit window observed on the most recent call, if the transport reports one.
    fn rate_limit(&self) -> Option<RateLimitInfo> {
        None
    }
}

/// Rate limit window reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Maximum number of requests allowed in the window
    pub limit: Option<u32>,

    /// Remaining requests in the current window
    pub remaining: Option<u32>,

    /// Unix timestamp when the window resets
    pub reset: Option<u64>,
}

impl RateLimitInfo {
    /// Check if the window is used up.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Duration until the window resets, relative to `now` (unix seconds).
    #[must_use]
    pub fn time_until_reset(&self, now: u64) -> Option<Duration> {
        let reset = self.reset?;
        (reset > now).then(|| Duration::from_secs(reset - now))
    }
}
