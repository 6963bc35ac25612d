//! A [`StatusFeed`] fed through a channel by a background reader.
//!
//! The blocking socket read happens on its own thread, so the consumer wakes
//! up every poll interval even when the connection is silent. A connection
//! that stays silent past the stall timeout is treated as closed.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{debug, warn};

use super::types::{StatusFeed, StreamEvent};

/// How often an idle feed returns control to its consumer.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Silence after which the connection is given up. Keep-alives arrive every
/// 30 seconds on a healthy stream.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(90);

const EVENT_BUFFER: usize = 256;

pub struct ChannelFeed {
    events: Option<Receiver<StreamEvent>>,
    poll: Duration,
    stall_timeout: Duration,
    last_activity: Instant,
}

impl ChannelFeed {
    pub fn new(events: Receiver<StreamEvent>) -> Self {
        Self::with_timeouts(events, POLL_INTERVAL, STALL_TIMEOUT)
    }

    pub fn with_timeouts(events: Receiver<StreamEvent>, poll: Duration, stall_timeout: Duration) -> Self {
        Self {
            events: Some(events),
            poll,
            stall_timeout,
            last_activity: Instant::now(),
        }
    }

    /// Run `read` on a named thread, forwarding each event until it yields
    /// [`StreamEvent::Closed`] or the feed is dropped.
    ///
    /// # Errors
    ///
    /// Returns the error of spawning the reader thread.
    pub fn spawn<F>(name: &str, mut read: F) -> std::io::Result<Self>
    where
        F: FnMut() -> StreamEvent + Send + 'static,
    {
        let (tx, rx) = bounded(EVENT_BUFFER);
        thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                let event = read();
                let closed = matches!(event, StreamEvent::Closed);
                if tx.send(event).is_err() || closed {
                    debug!("Stream reader finished");
                    break;
                }
            }
        })?;
        Ok(Self::new(rx))
    }
}

impl StatusFeed for ChannelFeed {
    fn next_event(&mut self) -> StreamEvent {
        let Some(events) = &self.events else {
            return StreamEvent::Closed;
        };

        match events.recv_timeout(self.poll) {
            Ok(event) => {
                self.last_activity = Instant::now();
                if matches!(event, StreamEvent::Closed) {
                    self.events = None;
                }
                event
            }
            Err(RecvTimeoutError::Timeout) => {
                let silent = self.last_activity.elapsed();
                if silent < self.stall_timeout {
                    return StreamEvent::Idle;
                }
                warn!(silent_secs = silent.as_secs(), "Stream stalled, closing");
                self.events = None;
                StreamEvent::Closed
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.events = None;
                StreamEvent::Closed
            }
        }
    }

    // A reader blocked in a socket read notices on its next send.
    fn close(&mut self) {
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_silent_feed_goes_idle_then_closes() {
        let (_tx, rx) = bounded::<StreamEvent>(1);
        let mut feed =
            ChannelFeed::with_timeouts(rx, Duration::from_millis(10), Duration::from_millis(60));

        let started = Instant::now();
        let mut idle = 0;
        loop {
            match feed.next_event() {
                StreamEvent::Idle => idle += 1,
                StreamEvent::Closed => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(idle >= 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(feed.next_event(), StreamEvent::Closed);
    }

    #[test]
    fn test_reader_stops_after_closed() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let mut script = vec![
            StreamEvent::Closed,
            StreamEvent::Error("connection reset".into()),
            StreamEvent::Heartbeat,
        ];
        let mut feed = ChannelFeed::spawn("test-reader", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            script.pop().unwrap_or(StreamEvent::Closed)
        })
        .unwrap();

        let mut seen = Vec::new();
        loop {
            match feed.next_event() {
                StreamEvent::Idle => {}
                StreamEvent::Closed => break,
                other => seen.push(other),
            }
        }
        assert_eq!(
            seen,
            vec![StreamEvent::Heartbeat, StreamEvent::Error("connection reset".into())]
        );
        assert_eq!(feed.next_event(), StreamEvent::Closed);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_close_ends_the_feed() {
        let (tx, rx) = bounded(4);
        tx.send(StreamEvent::Heartbeat).unwrap();
        let mut feed = ChannelFeed::new(rx);
        feed.close();
        assert_eq!(feed.next_event(), StreamEvent::Closed);
    }
}
