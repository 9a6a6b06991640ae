//! Process local stream hub. Every encoded line of a turn is buffered under its stream id so
//! a client that reconnects gets everything sent so far and then follows the live output.
//!
//! Subscribers read the shared buffer by index and are woken through a `watch` channel that
//! carries the line count, so a slow reader falls behind but never misses a line.
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// How long a finished stream can still be replayed
pub const RETENTION: Duration = Duration::from_secs(5 * 60);

struct Lines {
    buffer: Vec<String>,
    /// Present while the stream is live; dropping it wakes every waiting subscriber
    live: Option<watch::Sender<usize>>,
    finished_at: Option<Instant>,
}

struct SharedStream {
    lines: Mutex<Lines>,
}

impl SharedStream {
    fn lock(&self) -> MutexGuard<'_, Lines> {
        // every update is a single step, so the data is consistent even after a panic
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expired(&self, retention: Duration) -> bool {
        match self.lock().finished_at {
            Some(finished) => finished.elapsed() >= retention,
            None => false,
        }
    }
}

enum Step {
    Line(String),
    Wait,
    Done,
}

/// Next line for a subscriber positioned at `next`, waiting for the publisher when caught up
async fn next_line(
    shared: Arc<SharedStream>,
    next: usize,
    mut changes: watch::Receiver<usize>,
) -> Option<(String, (Arc<SharedStream>, usize, watch::Receiver<usize>))> {
    loop {
        // mark the current count as seen before looking, so a push in between still wakes us
        changes.borrow_and_update();
        let step = {
            let lines = shared.lock();
            match lines.buffer.get(next) {
                Some(line) => Step::Line(line.clone()),
                None if lines.live.is_none() => Step::Done,
                None => Step::Wait,
            }
        };

        match step {
            Step::Line(line) => return Some((line, (shared, next + 1, changes))),
            Step::Done => return None,
            // an error means the publisher finished; the next pass drains what is left
            Step::Wait => {
                let _ = changes.changed().await;
            }
        }
    }
}

#[derive(Clone)]
pub struct StreamHub {
    entries: Arc<Mutex<HashMap<String, Arc<SharedStream>>>>,
    retention: Duration,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    pub fn new() -> Self {
        Self::with_retention(RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SharedStream>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(&self, entries: &mut HashMap<String, Arc<SharedStream>>) {
        entries.retain(|_, shared| !shared.expired(self.retention));
    }

    /// Start a stream. Lines pushed through the returned publisher reach every subscriber.
    pub fn create(&self, stream_id: &str) -> StreamPublisher {
        let (tx, _) = watch::channel(0);
        let shared = Arc::new(SharedStream {
            lines: Mutex::new(Lines {
                buffer: Vec::new(),
                live: Some(tx),
                finished_at: None,
            }),
        });

        let mut entries = self.lock();
        self.prune(&mut entries);
        entries.insert(stream_id.to_string(), shared.clone());

        StreamPublisher { shared }
    }

    /// Replay of everything published so far, followed by live lines until the stream ends.
    /// None when the stream is unknown or has expired.
    pub fn subscribe(&self, stream_id: &str) -> Option<BoxStream<'static, String>> {
        let shared = {
            let mut entries = self.lock();
            self.prune(&mut entries);
            entries.get(stream_id)?.clone()
        };

        let changes = {
            let lines = shared.lock();
            match &lines.live {
                Some(tx) => tx.subscribe(),
                None => return Some(stream::iter(lines.buffer.clone()).boxed()),
            }
        };

        Some(
            stream::unfold((shared, 0, changes), |(shared, next, changes)| {
                next_line(shared, next, changes)
            })
            .boxed(),
        )
    }

    #[cfg(test)]
    pub fn contains(&self, stream_id: &str) -> bool {
        let mut entries = self.lock();
        self.prune(&mut entries);
        entries.contains_key(stream_id)
    }
}

/// Write side of one hub stream; finishes the stream when dropped
pub struct StreamPublisher {
    shared: Arc<SharedStream>,
}

impl StreamPublisher {
    pub fn push(&self, line: String) {
        let mut lines = self.shared.lock();
        lines.buffer.push(line);
        let count = lines.buffer.len();
        if let Some(tx) = &lines.live {
            tx.send_replace(count);
        }
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        let mut lines = self.shared.lock();
        lines.live = None;
        lines.finished_at = Some(Instant::now());
    }
}
