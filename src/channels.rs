//! The rotating channel list and its single-writer access rules.
//!
//! The playback session controller is the only component that mutates the
//! list (marking channels offline, applying refreshed metadata). Everyone
//! else reads cloned snapshots, keyed by slug rather than by position, so a
//! stale index can never leak across an insertion or removal.

use crate::api::LiveDetail;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use url::Url;

/// One entry in the channel rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Stable identity; everything else is display metadata.
    pub slug: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub viewer_count: u64,
    pub is_live: bool,
    pub started_at: Option<Timestamp>,
    pub thumbnail: Option<Url>,
}

impl Channel {
    /// A live channel with only a slug, for tests and ad-hoc wiring.
    pub fn live(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: None,
            category: None,
            viewer_count: 0,
            is_live: true,
            started_at: None,
            thumbnail: None,
        }
    }
}

/// Ordered collection of channels, owned by the playback controller.
#[derive(Debug, Default)]
pub struct ChannelList {
    channels: Vec<Channel>,
}

impl ChannelList {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Cloned snapshot of a single channel, for handing to other components.
    pub fn snapshot(&self, index: usize) -> Option<Channel> {
        self.channels.get(index).cloned()
    }

    pub fn position(&self, slug: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.slug == slug)
    }

    /// Replaces the whole list, e.g. after a directory refresh.
    pub fn replace(&mut self, channels: Vec<Channel>) {
        self.channels = channels;
    }

    /// Steps `delta` entries from `current`, wrapping at both ends.
    ///
    /// Returns `current` unchanged when the list is empty.
    pub fn step(&self, current: usize, delta: isize) -> usize {
        let len = self.channels.len();
        if len == 0 {
            return current;
        }
        let len = len as isize;
        let current = (current as isize).min(len - 1);
        (current + delta).rem_euclid(len) as usize
    }

    /// Marks a channel as confirmed offline, clearing its live metadata.
    pub fn mark_offline(&mut self, slug: &str) {
        if let Some(channel) = self.channels.iter_mut().find(|c| c.slug == slug) {
            channel.is_live = false;
            channel.viewer_count = 0;
            channel.title = None;
            channel.category = None;
            channel.started_at = None;
        }
    }

    /// Applies refreshed liveness detail to a channel in place.
    pub fn apply_refresh(&mut self, slug: &str, detail: &LiveDetail) {
        if let Some(channel) = self.channels.iter_mut().find(|c| c.slug == slug) {
            channel.is_live = detail.is_live;
            channel.viewer_count = detail.viewer_count;
            channel.title = detail.title.clone();
            channel.category = detail.category.clone();
            channel.started_at = detail.started_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn list(n: usize) -> ChannelList {
        ChannelList::new((0..n).map(|i| Channel::live(format!("ch{i}"))).collect())
    }

    #[test]
    fn step_wraps_in_both_directions() {
        let channels = list(3);
        assert_eq!(channels.step(0, 1), 1);
        assert_eq!(channels.step(2, 1), 0);
        assert_eq!(channels.step(0, -1), 2);
        assert_eq!(channels.step(1, -4), 0);
        assert_eq!(channels.step(0, 7), 1);
    }

    #[test]
    fn step_on_empty_list_is_identity() {
        let channels = ChannelList::default();
        assert_eq!(channels.step(5, 1), 5);
    }

    #[test]
    fn step_clamps_out_of_range_current() {
        // the list may have shrunk under a stale index
        let channels = list(2);
        assert_eq!(channels.step(9, 1), 0);
    }

    #[test]
    fn mark_offline_clears_live_metadata() {
        let mut channels = list(2);
        channels.apply_refresh(
            "ch1",
            &LiveDetail {
                is_live: true,
                title: Some("speedrun".into()),
                category: Some("games".into()),
                viewer_count: 420,
                started_at: None,
            },
        );
        channels.mark_offline("ch1");

        let ch = channels.snapshot(1).unwrap();
        assert!(!ch.is_live);
        assert_eq!(ch.viewer_count, 0);
        assert_eq!(ch.title, None);
        assert_eq!(ch.category, None);
    }

    #[test]
    fn apply_refresh_unknown_slug_is_a_no_op() {
        let mut channels = list(1);
        channels.apply_refresh(
            "nope",
            &LiveDetail {
                is_live: false,
                title: None,
                category: None,
                viewer_count: 0,
                started_at: None,
            },
        );
        assert!(channels.snapshot(0).unwrap().is_live);
    }
}
