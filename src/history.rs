//! Bounded per-room message history.
//!
//! Retains the last [`HISTORY_CAP`] messages with FIFO eviction. History is
//! replayed verbatim to newly joined participants, and the tail
//! [`CONTEXT_WINDOW`] serves as the recent-context window handed to the
//! moderation evaluator.

use std::collections::VecDeque;

use tracing::debug;

use crate::message::Message;

/// Maximum messages retained per room.
pub const HISTORY_CAP: usize = 100;

/// Size of the recent-context window fed to the evaluator.
pub const CONTEXT_WINDOW: usize = 10;

/// Ordered, bounded message history for one room.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: VecDeque<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, evicting the oldest entries past the cap.
    pub fn append(&mut self, message: Message) {
        self.entries.push_back(message);
        while self.entries.len() > HISTORY_CAP {
            let evicted = self.entries.pop_front();
            if let Some(m) = evicted {
                debug!(id = %m.id, "evicted oldest message past history cap");
            }
        }
    }

    /// Full retained history, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    /// The last [`CONTEXT_WINDOW`] messages, oldest first.
    pub fn recent_window(&self) -> Vec<Message> {
        let skip = self.entries.len().saturating_sub(CONTEXT_WINDOW);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently appended message.
    pub fn last(&self) -> Option<&Message> {
        self.entries.back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, MessageSequence};

    fn log_with(n: usize) -> MessageLog {
        let mut log = MessageLog::new();
        let mut seq = MessageSequence::new();
        for i in 0..n {
            log.append(Message::user(seq.next_id(), "alice", &format!("m{}", i)));
        }
        log
    }

    #[test]
    fn test_cap_holds_after_many_appends() {
        let log = log_with(350);
        assert_eq!(log.len(), HISTORY_CAP);
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let log = log_with(HISTORY_CAP + 5);
        let history = log.history();
        assert_eq!(history.len(), HISTORY_CAP);
        // Oldest 5 evicted: history starts at id 6.
        assert_eq!(history.first().unwrap().id, MessageId(6));
        assert_eq!(history.last().unwrap().id, MessageId(105));
    }

    #[test]
    fn test_history_is_ordered_and_replayable() {
        let log = log_with(20);
        let first = log.history();
        let second = log.history();
        // Replaying history mutates nothing.
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
        }
        assert!(first.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_recent_window_is_last_ten() {
        let log = log_with(25);
        let window = log.recent_window();
        assert_eq!(window.len(), CONTEXT_WINDOW);
        assert_eq!(window.first().unwrap().id, MessageId(16));
        assert_eq!(window.last().unwrap().id, MessageId(25));
    }

    #[test]
    fn test_recent_window_short_history() {
        let log = log_with(3);
        assert_eq!(log.recent_window().len(), 3);
        assert!(log_with(0).recent_window().is_empty());
    }
}
