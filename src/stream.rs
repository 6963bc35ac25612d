//! Push-based status listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::api::RemoteApi;
use crate::api::types::{StatusFeed, StreamEvent};
use crate::client::{RateLimitedClient, Sleeper};
use crate::error::ApiResult;
use crate::model::TaskId;
use crate::storage::{RecordSink, persist};
use crate::tweets::normalize_status;

/// Shared stop signal for a running listener.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub statuses: usize,
    pub saved: usize,
    pub skipped: usize,
    pub heartbeats: usize,
    pub errors: usize,
    /// Whether the session ended on the stop signal rather than a remote close.
    pub stopped: bool,
}

pub struct StreamListener {
    task_id: TaskId,
    store_retries: u32,
    stop: StopHandle,
}

impl StreamListener {
    pub const fn new(task_id: TaskId, store_retries: u32, stop: StopHandle) -> Self {
        Self {
            task_id,
            store_retries,
            stop,
        }
    }

    /// Track `names` until the remote side closes the session or the stop
    /// signal fires.
    ///
    /// # Errors
    ///
    /// Returns the error of opening the feed once its retries are spent.
    pub fn listen<A, S, K>(
        &self,
        client: &mut RateLimitedClient<A, S>,
        sink: &mut K,
        names: &[String],
    ) -> ApiResult<StreamStats>
    where
        A: RemoteApi,
        S: Sleeper,
        K: RecordSink + ?Sized,
    {
        let track: Vec<String> = names
            .iter()
            .map(|n| n.trim().trim_start_matches('@').to_string())
            .filter(|n| !n.is_empty())
            .collect();

        let mut feed = client.with_retry("open stream", |c| c.open_stream(&track))?;
        info!(task = %self.task_id, tracked = track.len(), "Stream opened");
        Ok(self.consume(feed.as_mut(), sink))
    }

    /// Drain `feed` into `sink`. Delivery errors are logged and skipped.
    pub fn consume<K: RecordSink + ?Sized>(
        &self,
        feed: &mut dyn StatusFeed,
        sink: &mut K,
    ) -> StreamStats {
        let mut stats = StreamStats::default();
        loop {
            if self.stop.is_stopped() {
                feed.close();
                stats.stopped = true;
                info!(task = %self.task_id, saved = stats.saved, "Stream stopped");
                break;
            }

            match feed.next_event() {
                StreamEvent::Status(status) => {
                    // A status that arrives after the stop signal is dropped.
                    if self.stop.is_stopped() {
                        continue;
                    }
                    stats.statuses += 1;
                    let saved = match normalize_status(&status, &self.task_id) {
                        Ok(tweet) => persist(
                            sink,
                            self.store_retries,
                            &format_args!("tweet {}", tweet.tweet_id),
                            |s| s.save_tweet(&tweet),
                        ),
                        Err(err) => {
                            warn!(task = %self.task_id, error = %err, "Skipping streamed status");
                            false
                        }
                    };
                    if saved {
                        stats.saved += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
                StreamEvent::Heartbeat => {
                    stats.heartbeats += 1;
                    trace!("Stream keep-alive");
                }
                StreamEvent::Idle => {}
                StreamEvent::Error(message) => {
                    stats.errors += 1;
                    warn!(task = %self.task_id, %message, "Stream delivery error");
                }
                StreamEvent::Closed => {
                    debug!(task = %self.task_id, "Stream closed by remote");
                    break;
                }
            }
        }
        stats
    }
}
