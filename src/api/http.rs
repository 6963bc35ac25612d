//! REST v1.1 adapter for [`RemoteApi`] over `reqwest::blocking`.

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::feed::ChannelFeed;
use super::oauth::{OAuthSigner, percent_encode};
use super::types::{
    ListSummary, Page, RemoteUser, SearchRequest, Status, StatusFeed, StreamEvent, UserRef,
};
use super::{RateLimitInfo, RemoteApi};
use crate::config::{ApiConfig, Credentials};
use crate::error::{ApiError, ApiResult};

/// Wait applied to a 429 that carries no usable reset header (one window).
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

const IDS_PAGE_SIZE: &str = "5000";
const TIMELINE_PAGE_SIZE: &str = "200";
const LIST_PAGE_SIZE: &str = "1000";

/// Error codes meaning the keys themselves are bad.
const CREDENTIAL_ERROR_CODES: [i64; 3] = [32, 89, 215];
const RATE_LIMIT_CODE: i64 = 88;
const NOT_FOUND_CODES: [i64; 2] = [34, 50];

/// Blocking HTTP client for the REST v1.1 service.
pub struct HttpApi {
    client: Client,
    stream_client: Client,
    base_url: String,
    stream_url: String,
    timeout: Duration,
    credentials: Credentials,
    signer: Option<OAuthSigner>,
    last_rate_limit: Mutex<Option<RateLimitInfo>>,
}

impl HttpApi {
    /// Build an adapter. No request is made until [`RemoteApi::authenticate`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Fatal`] if the HTTP client cannot be constructed.
    pub fn new(api: &ApiConfig, credentials: Credentials) -> ApiResult<Self> {
        let timeout = Duration::from_secs(api.timeout_secs.max(1));
        Ok(Self {
            client: build_client(Some(timeout))?,
            stream_client: build_client(None)?,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            stream_url: api.stream_url.trim_end_matches('/').to_string(),
            timeout,
            credentials,
            signer: None,
            last_rate_limit: Mutex::new(None),
        })
    }

    fn signer(&self) -> ApiResult<&OAuthSigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| ApiError::fatal("request issued before authenticate()"))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/1.1/{path}.json", self.base_url)
    }

    #[instrument(skip(self, params), level = "debug")]
    fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(String, String)]) -> ApiResult<T> {
        let url = self.endpoint(path);
        let auth = self.signer()?.sign("GET", &url, params)?;

        let response = self
            .client
            .get(with_query(&url, params))
            .header(AUTHORIZATION, auth)
            .send()
            .map_err(network_error)?;

        self.handle_response(response)
    }

    fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        let rate_limit = rate_limit_from_headers(response.headers());
        if let Some(info) = rate_limit {
            if info.is_exhausted() {
                debug!(reset = ?info.reset, "Rate limit window exhausted");
            }
            *self.last_rate_limit.lock() = Some(info);
        }

        let body = response.text().map_err(network_error)?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ApiError::transient(format!("undecodable response: {e}")));
        }

        Err(classify_failure(status, &body, rate_limit, now_unix()))
    }

    fn cursor_params(user: &UserRef, cursor: Option<i64>, count: &str) -> Vec<(String, String)> {
        let mut params = user_params(user);
        params.push(("cursor".into(), cursor.unwrap_or(-1).to_string()));
        params.push(("count".into(), count.into()));
        params
    }

    fn list_page(&self, path: &str, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<ListSummary>> {
        #[derive(Deserialize)]
        struct ListsResponse {
            #[serde(default)]
            lists: Vec<ListSummary>,
            #[serde(default)]
            next_cursor: i64,
        }

        let params = Self::cursor_params(user, cursor, LIST_PAGE_SIZE);
        let response: ListsResponse = self.get_json(path, &params)?;
        Ok(Page::new(response.lists, next_cursor(response.next_cursor)))
    }

    fn id_page(&self, path: &str, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        #[derive(Deserialize)]
        struct IdsResponse {
            #[serde(default)]
            ids: Vec<i64>,
            #[serde(default)]
            next_cursor: i64,
        }

        let params = Self::cursor_params(user, cursor, IDS_PAGE_SIZE);
        let response: IdsResponse = self.get_json(path, &params)?;
        Ok(Page::new(response.ids, next_cursor(response.next_cursor)))
    }

    fn lookup(&self, params: &[(String, String)]) -> ApiResult<Vec<RemoteUser>> {
        match self.get_json("users/lookup", params) {
            // No match at all comes back as a 404.
            Err(ApiError::NotFound { .. }) => Ok(Vec::new()),
            other => other,
        }
    }
}

impl RemoteApi for HttpApi {
    fn authenticate(&mut self) -> ApiResult<()> {
        self.signer = Some(OAuthSigner::new(&self.credentials)?);
        self.client = build_client(Some(self.timeout))?;
        self.stream_client = build_client(None)?;
        *self.last_rate_limit.lock() = None;
        debug!("Session (re)authenticated");
        Ok(())
    }

    fn verify_credentials(&self) -> ApiResult<()> {
        let params = [("skip_status".to_string(), "true".to_string())];
        match self.get_json::<serde_json::Value>("account/verify_credentials", &params) {
            Ok(_) => Ok(()),
            Err(err) if err.is_retryable() || err.is_fatal() => Err(err),
            Err(err) => Err(ApiError::fatal(format!("credentials rejected: {err}"))),
        }
    }

    fn get_user(&self, screen_name: &str) -> ApiResult<RemoteUser> {
        self.get_json(
            "users/show",
            &[("screen_name".into(), screen_name.to_string())],
        )
    }

    fn lookup_user_ids(&self, ids: &[i64]) -> ApiResult<Vec<RemoteUser>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
        self.lookup(&[("user_id".into(), joined)])
    }

    fn lookup_screen_names(&self, names: &[String]) -> ApiResult<Vec<RemoteUser>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.lookup(&[("screen_name".into(), names.join(","))])
    }

    fn friend_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        self.id_page("friends/ids", user, cursor)
    }

    fn follower_ids(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<i64>> {
        self.id_page("followers/ids", user, cursor)
    }

    fn list_memberships(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<ListSummary>> {
        self.list_page("lists/memberships", user, cursor)
    }

    fn list_subscriptions(
        &self,
        user: &UserRef,
        cursor: Option<i64>,
    ) -> ApiResult<Page<ListSummary>> {
        self.list_page("lists/subscriptions", user, cursor)
    }

    fn search(&self, request: &SearchRequest) -> ApiResult<Vec<Status>> {
        #[derive(Deserialize)]
        struct SearchResponse {
            #[serde(default)]
            statuses: Vec<Status>,
        }

        let response: SearchResponse = self.get_json("search/tweets", &search_params(request))?;
        Ok(response.statuses)
    }

    fn user_timeline(&self, user: &UserRef, cursor: Option<i64>) -> ApiResult<Page<Status>> {
        let mut params = user_params(user);
        params.push(("count".into(), TIMELINE_PAGE_SIZE.into()));
        params.push(("tweet_mode".into(), "extended".into()));
        params.push(("include_rts".into(), "true".into()));
        if let Some(max_id) = cursor {
            params.push(("max_id".into(), max_id.to_string()));
        }

        let statuses: Vec<Status> = self.get_json("statuses/user_timeline", &params)?;
        Ok(timeline_page(statuses))
    }

    fn open_stream(&self, track: &[String]) -> ApiResult<Box<dyn StatusFeed>> {
        let url = format!("{}/1.1/statuses/filter.json", self.stream_url);
        let params = vec![("track".to_string(), track.join(","))];
        let auth = self.signer()?.sign("POST", &url, &params)?;

        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let response = self
            .stream_client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            let rate_limit = rate_limit_from_headers(response.headers());
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status, &body, rate_limit, now_unix()));
        }

        debug!(tracked = track.len(), "Stream connected");
        let mut reader = LineReader::new(response);
        let feed = ChannelFeed::spawn("stream-reader", move || reader.next_event())
            .map_err(|e| ApiError::transient(format!("cannot start stream reader: {e}")))?;
        Ok(Box::new(feed))
    }

    fn rate_limit(&self) -> Option<RateLimitInfo> {
        *self.last_rate_limit.lock()
    }
}

/// Reads the line-delimited status stream. A read error is reported once and
/// ends the stream.
struct LineReader<R> {
    reader: Option<BufReader<R>>,
}

impl<R: Read> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: Some(BufReader::new(inner)),
        }
    }

    fn next_event(&mut self) -> StreamEvent {
        let Some(reader) = self.reader.as_mut() else {
            return StreamEvent::Closed;
        };

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                self.reader = None;
                StreamEvent::Closed
            }
            Ok(_) => parse_stream_line(&line),
            Err(e) => {
                self.reader = None;
                StreamEvent::Error(format!("stream read failed: {e}"))
            }
        }
    }
}

/// Interpret one line of the filter stream.
fn parse_stream_line(line: &str) -> StreamEvent {
    let line = line.trim();
    if line.is_empty() {
        return StreamEvent::Heartbeat;
    }

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return StreamEvent::Error(format!("undecodable stream message: {e}")),
    };

    if value.get("disconnect").is_some() {
        warn!(message = %value["disconnect"], "Stream disconnected by remote");
        return StreamEvent::Closed;
    }

    let is_status = value.get("id").is_some()
        && (value.get("text").is_some() || value.get("full_text").is_some());
    if !is_status {
        // delete / limit / warning notices
        debug!(notice = %line, "Stream control message");
        return StreamEvent::Heartbeat;
    }

    match serde_json::from_value::<Status>(value) {
        Ok(status) => StreamEvent::Status(Box::new(status)),
        Err(e) => StreamEvent::Error(format!("undecodable status: {e}")),
    }
}

fn build_client(timeout: Option<Duration>) -> ApiResult<Client> {
    let mut builder = Client::builder()
        .user_agent(format!("egonet/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30));
    builder = builder.timeout(timeout);
    builder
        .build()
        .map_err(|e| ApiError::fatal(format!("cannot build HTTP client: {e}")))
}

fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::transient(format!("network error: {err}"))
}

fn with_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{url}?{query}")
}

fn user_params(user: &UserRef) -> Vec<(String, String)> {
    match user {
        UserRef::Id(id) => vec![("user_id".into(), id.to_string())],
        UserRef::ScreenName(name) => vec![("screen_name".into(), name.clone())],
    }
}

/// The API ends cursor chains with `0`.
const fn next_cursor(raw: i64) -> Option<i64> {
    if raw == 0 { None } else { Some(raw) }
}

fn search_params(request: &SearchRequest) -> Vec<(String, String)> {
    let mut query = request.query.clone();
    if let Some(since) = request.since {
        query.push_str(&format!(" since:{}", since.format("%Y-%m-%d")));
    }

    let mut params = vec![
        ("q".to_string(), query),
        ("count".to_string(), request.count.clamp(1, super::SEARCH_PAGE_SIZE).to_string()),
        ("result_type".to_string(), "recent".to_string()),
        ("include_entities".to_string(), "true".to_string()),
        ("tweet_mode".to_string(), "extended".to_string()),
    ];
    if let Some(until) = request.until {
        params.push(("until".into(), until.format("%Y-%m-%d").to_string()));
    }
    if let Some(lang) = &request.lang {
        params.push(("lang".into(), lang.clone()));
    }
    if let Some(since_id) = request.since_id {
        params.push(("since_id".into(), since_id.to_string()));
    }
    if let Some(max_id) = request.max_id {
        params.push(("max_id".into(), max_id.to_string()));
    }
    params
}

/// Timelines page backwards: the next page ends just below the oldest status seen.
fn timeline_page(statuses: Vec<Status>) -> Page<Status> {
    let next = statuses.iter().map(|s| s.id).min().map(|id| id - 1);
    Page::new(statuses, next)
}

fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    let info = RateLimitInfo {
        limit: read("x-rate-limit-limit").and_then(|v| u32::try_from(v).ok()),
        remaining: read("x-rate-limit-remaining").and_then(|v| u32::try_from(v).ok()),
        reset: read("x-rate-limit-reset"),
    };
    (info != RateLimitInfo::default()).then_some(info)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Map a non-success response onto the failure taxonomy.
fn classify_failure(
    status: StatusCode,
    body: &str,
    rate_limit: Option<RateLimitInfo>,
    now: u64,
) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let codes: Vec<i64> = parsed.errors.iter().map(|e| e.code).collect();

    let mut messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
    if let Some(error) = parsed.error.as_deref() {
        messages.push(error);
    }
    let message = if messages.is_empty() {
        format!("HTTP {}: {}", status.as_u16(), body.trim())
    } else {
        format!("HTTP {}: {}", status.as_u16(), messages.join("; "))
    };

    if status == StatusCode::TOO_MANY_REQUESTS || codes.contains(&RATE_LIMIT_CODE) {
        let retry_after = rate_limit
            .and_then(|info| info.time_until_reset(now))
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
        return ApiError::RateLimited { retry_after };
    }

    if codes.iter().any(|c| CREDENTIAL_ERROR_CODES.contains(c)) {
        return ApiError::fatal(message);
    }

    // "Not authorized" / "page does not exist" end the sub-operation.
    if let err @ ApiError::Permanent { .. } = ApiError::classify(message.clone()) {
        return err;
    }

    if status == StatusCode::NOT_FOUND || codes.iter().any(|c| NOT_FOUND_CODES.contains(c)) {
        return ApiError::not_found(message);
    }

    if status.is_server_error() {
        ApiError::transient(message)
    } else {
        ApiError::permanent(message)
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_rate_limit_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-limit", HeaderValue::from_static("15"));
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1700000000"));

        let info = rate_limit_from_headers(&headers).unwrap();
        assert_eq!(info.limit, Some(15));
        assert!(info.is_exhausted());
        assert_eq!(info.reset, Some(1_700_000_000));

        assert!(rate_limit_from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_classify_rate_limit_uses_reset() {
        let info = RateLimitInfo {
            limit: Some(15),
            remaining: Some(0),
            reset: Some(1_000),
        };
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "", Some(info), 900);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(100)));

        let body = r#"{"errors":[{"code":88,"message":"Rate limit exceeded"}]}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body, None, 0);
        assert_eq!(err.retry_after(), Some(DEFAULT_RATE_LIMIT_WAIT));
    }

    #[test]
    fn test_classify_credentials_fatal() {
        let body = r#"{"errors":[{"code":32,"message":"Could not authenticate you."}]}"#;
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, body, None, 0),
            ApiError::Fatal { .. }
        ));
    }

    #[test]
    fn test_classify_not_authorized_is_permanent() {
        let body = r#"{"request":"/1.1/friends/ids.json","error":"Not authorized."}"#;
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, body, None, 0),
            ApiError::Permanent { .. }
        ));

        let body = r#"{"errors":[{"code":34,"message":"Sorry, that page does not exist."}]}"#;
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, body, None, 0),
            ApiError::Permanent { .. }
        ));
    }

    #[test]
    fn test_classify_not_found_and_server_errors() {
        let body = r#"{"errors":[{"code":50,"message":"User not found."}]}"#;
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, body, None, 0),
            ApiError::NotFound { .. }
        ));

        let err = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "Over capacity", None, 0);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_with_query_encodes_rfc3986() {
        let url = with_query(
            "https://api.example/1.1/search/tweets.json",
            &[("q".into(), "\"a b\" OR c".into())],
        );
        assert_eq!(
            url,
            "https://api.example/1.1/search/tweets.json?q=%22a%20b%22%20OR%20c"
        );
    }

    #[test]
    fn test_search_params_window() {
        let request = SearchRequest {
            query: "\"rust\"".into(),
            max_id: Some(99),
            count: 500,
            since: NaiveDate::from_ymd_opt(2026, 1, 2),
            until: NaiveDate::from_ymd_opt(2026, 1, 9),
            lang: Some("nl".into()),
            ..SearchRequest::default()
        };
        let params = search_params(&request);
        let get = |k: &str| params.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("q"), Some("\"rust\" since:2026-01-02"));
        assert_eq!(get("until"), Some("2026-01-09"));
        assert_eq!(get("count"), Some("100"));
        assert_eq!(get("max_id"), Some("99"));
        assert_eq!(get("lang"), Some("nl"));
        assert_eq!(get("since_id"), None);
    }

    #[test]
    fn test_timeline_page_cursor() {
        let statuses = vec![
            Status {
                id: 30,
                ..Status::default()
            },
            Status {
                id: 12,
                ..Status::default()
            },
        ];
        assert_eq!(timeline_page(statuses).next_cursor, Some(11));
        assert_eq!(timeline_page(Vec::new()).next_cursor, None);
    }

    #[test]
    fn test_next_cursor_zero_ends() {
        assert_eq!(next_cursor(0), None);
        assert_eq!(next_cursor(1_234), Some(1_234));
    }

    #[test]
    fn test_parse_stream_lines() {
        assert_eq!(parse_stream_line("\r\n"), StreamEvent::Heartbeat);
        assert_eq!(
            parse_stream_line(r#"{"delete":{"status":{"id":1}}}"#),
            StreamEvent::Heartbeat
        );
        assert_eq!(
            parse_stream_line(r#"{"disconnect":{"code":7,"reason":"admin"}}"#),
            StreamEvent::Closed
        );
        assert!(matches!(parse_stream_line("{not json"), StreamEvent::Error(_)));

        let line = r#"{"id":5,"text":"hi","created_at":"Fri Jan 09 15:12:21 +0000 2026","user":{"id":1,"screen_name":"alice"}}"#;
        match parse_stream_line(line) {
            StreamEvent::Status(status) => {
                assert_eq!(status.id, 5);
                assert_eq!(status.user.unwrap().screen_name, "alice");
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    struct BrokenSocket;

    impl Read for BrokenSocket {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    #[test]
    fn test_line_reader_reports_read_error_once() {
        let mut reader = LineReader::new(BrokenSocket);
        assert!(matches!(reader.next_event(), StreamEvent::Error(_)));
        assert_eq!(reader.next_event(), StreamEvent::Closed);
        assert_eq!(reader.next_event(), StreamEvent::Closed);
    }

    #[test]
    fn test_line_reader_splits_lines() {
        let body = "\r\n{\"id\":5,\"text\":\"hi\",\"created_at\":\"x\",\"user\":{\"id\":1,\"screen_name\":\"a\"}}\r\n";
        let mut reader = LineReader::new(std::io::Cursor::new(body.as_bytes().to_vec()));
        assert_eq!(reader.next_event(), StreamEvent::Heartbeat);
        assert!(matches!(reader.next_event(), StreamEvent::Status(_)));
        assert_eq!(reader.next_event(), StreamEvent::Closed);
    }

    #[test]
    fn test_requests_require_authentication() {
        let api = HttpApi::new(&ApiConfig::default(), Credentials::default()).unwrap();
        assert!(matches!(api.get_user("alice"), Err(ApiError::Fatal { .. })));
    }
}
