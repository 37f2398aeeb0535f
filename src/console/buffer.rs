//! Bounded, replayable console history with live fan-out

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Retention limits for a console buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Maximum number of chunks kept for replay
    pub max_entries: usize,
    /// Chunks older than this are dropped
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
    /// Live chunks a listener may fall behind before it is detached
    pub listener_backlog: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_entries: 2000,
            max_age: None,
            listener_backlog: 1024,
        }
    }
}

/// One captured chunk of workload output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    /// Unix epoch milliseconds, strictly increasing within one buffer
    pub timestamp: i64,
    pub text: String,
}

/// Result of a replay request
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleReplay {
    pub entries: Vec<ConsoleEntry>,
    /// Pass back as `since` to receive only newer output
    pub epoch: i64,
}

/// A live listener attached to a [`ConsoleBuffer`].
///
/// The retained history is queued first, followed by every later write.
/// Dropping the subscription detaches it; the buffer notices on its next
/// write. A listener that falls more than `listener_backlog` chunks behind
/// is detached by the buffer: `recv` drains what was queued, then returns
/// `None`.
pub struct ConsoleSubscription {
    receiver: mpsc::Receiver<Arc<ConsoleEntry>>,
}

impl ConsoleSubscription {
    pub async fn recv(&mut self) -> Option<Arc<ConsoleEntry>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ConsoleEntry>> {
        self.receiver.try_recv().ok()
    }
}

struct Inner {
    entries: VecDeque<Arc<ConsoleEntry>>,
    listeners: Vec<mpsc::Sender<Arc<ConsoleEntry>>>,
    last_timestamp: i64,
}

pub struct ConsoleBuffer {
    config: ConsoleConfig,
    inner: Mutex<Inner>,
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(ConsoleConfig::default())
    }
}

impl ConsoleBuffer {
    pub fn new(config: ConsoleConfig) -> Self {
        let capacity = config.max_entries.min(4096);
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                listeners: Vec::new(),
                last_timestamp: 0,
            }),
        }
    }

    fn clock() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a panicking writer cannot leave the deque half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a chunk and broadcast it to every live listener
    pub fn write(&self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut inner = self.lock();
        let timestamp = Self::clock().max(inner.last_timestamp + 1);
        inner.last_timestamp = timestamp;

        let entry = Arc::new(ConsoleEntry {
            timestamp,
            text: text.to_string(),
        });

        inner
            .listeners
            .retain(|listener| match listener.try_send(Arc::clone(&entry)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Detaching console listener that fell behind");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("Pruned disconnected console listener");
                    false
                }
            });

        inner.entries.push_back(entry);
        self.enforce_limits(&mut inner, timestamp);
    }

    fn enforce_limits(&self, inner: &mut Inner, now: i64) {
        while inner.entries.len() > self.config.max_entries {
            inner.entries.pop_front();
        }
        if let Some(max_age) = self.config.max_age {
            let cutoff = now - max_age.as_millis() as i64;
            while inner
                .entries
                .front()
                .is_some_and(|entry| entry.timestamp < cutoff)
            {
                inner.entries.pop_front();
            }
        }
    }

    /// A timestamp greater than every retained entry
    pub fn now(&self) -> i64 {
        let inner = self.lock();
        Self::clock().max(inner.last_timestamp + 1)
    }

    /// Every retained chunk written at or after `since`
    pub fn read_from(&self, since: i64) -> ConsoleReplay {
        let mut inner = self.lock();
        let epoch = Self::clock().max(inner.last_timestamp + 1);
        self.enforce_limits(&mut inner, epoch);

        let entries = inner
            .entries
            .iter()
            .filter(|entry| entry.timestamp >= since)
            .map(|entry| ConsoleEntry::clone(entry))
            .collect();

        ConsoleReplay { entries, epoch }
    }

    /// Replay flattened into a single string
    pub fn read_text_from(&self, since: i64) -> (String, i64) {
        let replay = self.read_from(since);
        let text = replay
            .entries
            .iter()
            .map(|entry| entry.text.as_str())
            .collect::<String>();
        (text, replay.epoch)
    }

    /// Attach a live listener, seeded with the retained history
    pub fn subscribe(&self) -> ConsoleSubscription {
        let mut inner = self.lock();
        let capacity = inner.entries.len() + self.config.listener_backlog.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        for entry in &inner.entries {
            // sized for the whole history and the receiver is held right here
            let _ = sender.try_send(Arc::clone(entry));
        }
        inner.listeners.push(sender);
        ConsoleSubscription { receiver }
    }

    /// Listeners attached as of the last write (closed ones linger until then)
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_from_zero_returns_all_in_order() {
        let buffer = ConsoleBuffer::default();
        for i in 0..5 {
            buffer.write(&format!("line {i}\n"));
        }

        let replay = buffer.read_from(0);
        let texts: Vec<_> = replay.entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["line 0\n", "line 1\n", "line 2\n", "line 3\n", "line 4\n"]);
        assert!(replay
            .entries
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    #[test]
    fn test_replay_from_now_is_empty() {
        let buffer = ConsoleBuffer::default();
        buffer.write("a");
        buffer.write("b");

        let now = buffer.now();
        assert!(buffer.read_from(now).entries.is_empty());

        let epoch = buffer.read_from(0).epoch;
        assert!(buffer.read_from(epoch).entries.is_empty());

        buffer.write("c");
        let replay = buffer.read_from(epoch);
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.entries[0].text, "c");
    }

    #[test]
    fn test_max_entries_bound() {
        let buffer = ConsoleBuffer::new(ConsoleConfig {
            max_entries: 3,
            max_age: None,
            ..Default::default()
        });
        for i in 0..10 {
            buffer.write(&i.to_string());
        }
        let (text, _) = buffer.read_text_from(0);
        assert_eq!(text, "789");
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_request_older_than_retained_is_not_an_error() {
        let buffer = ConsoleBuffer::new(ConsoleConfig {
            max_entries: 2,
            max_age: None,
            ..Default::default()
        });
        buffer.write("1");
        let first = buffer.read_from(0).entries[0].timestamp;
        buffer.write("2");
        buffer.write("3");

        let replay = buffer.read_from(first);
        assert_eq!(replay.entries.len(), 2);
        assert_eq!(replay.entries[0].text, "2");
    }

    #[test]
    fn test_max_age_drops_stale_entries() {
        let buffer = ConsoleBuffer::new(ConsoleConfig {
            max_entries: 100,
            max_age: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        buffer.write("old");
        std::thread::sleep(Duration::from_millis(120));
        buffer.write("new");

        let (text, _) = buffer.read_text_from(0);
        assert_eq!(text, "new");
    }

    #[test]
    fn test_empty_write_ignored() {
        let buffer = ConsoleBuffer::default();
        buffer.write("");
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_gets_history_once_then_live() {
        let buffer = ConsoleBuffer::default();
        buffer.write("one");
        buffer.write("two");

        let mut subscription = buffer.subscribe();
        assert_eq!(subscription.recv().await.unwrap().text, "one");
        assert_eq!(subscription.recv().await.unwrap().text, "two");
        assert!(subscription.try_recv().is_none());

        buffer.write("three");
        assert_eq!(subscription.recv().await.unwrap().text, "three");
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_dropped_listener_is_pruned_without_affecting_others() {
        let buffer = ConsoleBuffer::default();
        let gone = buffer.subscribe();
        let mut alive = buffer.subscribe();
        assert_eq!(buffer.listener_count(), 2);

        drop(gone);
        buffer.write("hello");

        assert_eq!(buffer.listener_count(), 1);
        assert_eq!(alive.recv().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn test_lagging_listener_detached_others_unaffected() {
        let buffer = ConsoleBuffer::new(ConsoleConfig {
            listener_backlog: 4,
            ..Default::default()
        });
        buffer.write("history");
        let mut slow = buffer.subscribe();
        let mut fast = buffer.subscribe();

        for i in 0..10 {
            buffer.write(&i.to_string());
            while let Some(entry) = fast.try_recv() {
                assert!(!entry.text.is_empty());
            }
        }
        assert_eq!(buffer.listener_count(), 1);

        // queued chunks are still delivered before the end of the stream
        let mut received = Vec::new();
        while let Some(entry) = slow.recv().await {
            received.push(entry.text.clone());
        }
        assert_eq!(received, vec!["history", "0", "1", "2", "3"]);

        buffer.write("after");
        assert_eq!(fast.recv().await.unwrap().text, "after");
    }
}
