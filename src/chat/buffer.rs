//! Bounded, deduplicated chat message buffer.

use crate::api::ChatMessage;
use std::collections::HashSet;
use std::collections::VecDeque;

/// Rolling window of the most recent chat messages for one subscription.
///
/// Holds at most `capacity` messages, evicting the oldest when a live append
/// overflows. Messages are deduplicated by id across the lifetime of the
/// buffer; the seen-set is not trimmed on eviction, so a message that
/// scrolled out of the window cannot reappear if history and the live feed
/// overlap.
#[derive(Debug)]
pub struct MessageBuffer {
    messages: VecDeque<ChatMessage>,
    seen: HashSet<String>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            seen: HashSet::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Appends a live message at the tail. Returns false for duplicates.
    pub fn push_live(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
        true
    }

    /// Seeds the buffer with a history page, sorted by timestamp ascending
    /// so the newest message sits at the tail. Duplicates of anything
    /// already seen are dropped. Returns how many messages were admitted.
    pub fn seed_history(&mut self, mut page: Vec<ChatMessage>) -> usize {
        page.sort_by_key(|m| m.created_at);
        let mut admitted = 0;
        for message in page {
            if self.push_live(message) {
                admitted += 1;
            }
        }
        admitted
    }

    /// Marks an id as seen without storing the message. Used for messages
    /// routed to the scrollback transcript so the live window cannot
    /// re-admit them.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use pretty_assertions::assert_eq;

    fn msg(id: &str, at_secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            author: "viewer".to_string(),
            content: format!("hello {id}"),
            created_at: Timestamp::from_second(at_secs).unwrap(),
        }
    }

    #[test]
    fn overflow_evicts_the_oldest() {
        let mut buffer = MessageBuffer::new(3);
        for i in 0..5 {
            assert!(buffer.push_live(msg(&format!("m{i}"), i)));
        }
        let ids: Vec<_> = buffer.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn window_holds_the_last_hundred_of_a_longer_run() {
        let mut buffer = MessageBuffer::new(100);
        for i in 0..150 {
            assert!(buffer.push_live(msg(&format!("m{i}"), i)));
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.messages().next().unwrap().id, "m50");
        assert_eq!(buffer.messages().last().unwrap().id, "m149");
    }

    #[test]
    fn duplicates_are_dropped_even_after_eviction() {
        let mut buffer = MessageBuffer::new(2);
        assert!(buffer.push_live(msg("a", 1)));
        assert!(buffer.push_live(msg("b", 2)));
        assert!(buffer.push_live(msg("c", 3))); // evicts "a"
        assert!(!buffer.push_live(msg("a", 1)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn history_is_sorted_oldest_first() {
        let mut buffer = MessageBuffer::new(10);
        let admitted = buffer.seed_history(vec![msg("late", 30), msg("early", 10), msg("mid", 20)]);
        assert_eq!(admitted, 3);
        let ids: Vec<_> = buffer.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid", "late"]);
    }

    #[test]
    fn history_overlapping_live_is_deduplicated() {
        let mut buffer = MessageBuffer::new(10);
        assert!(buffer.push_live(msg("x", 5)));
        let admitted = buffer.seed_history(vec![msg("x", 5), msg("y", 1)]);
        assert_eq!(admitted, 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn mark_seen_blocks_later_live_delivery() {
        let mut buffer = MessageBuffer::new(10);
        assert!(buffer.mark_seen("scrollback-1"));
        assert!(!buffer.push_live(msg("scrollback-1", 1)));
        assert!(buffer.is_empty());
    }
}
