//! Subscription registry
//!
//! Tracks the topics this client asked the hub to forward so they can be
//! re-sent after every successful (re)connect. A topic is only recorded once
//! its frame made it into the outbound queue.

use std::collections::HashSet;

use parking_lot::Mutex;
use taibai_core::Envelope;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::outbound::{discard_pending, OutboundQueue};

/// Outcome of [`SubscriptionRegistry::restart`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Restart {
    pub discarded: usize,
    pub replayed: usize,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(false)` if the topic was already tracked and nothing was sent
    pub fn subscribe(&self, topic: &str, queue: &OutboundQueue) -> Result<bool> {
        let mut topics = self.topics.lock();
        if topics.contains(topic) {
            return Ok(false);
        }
        queue.try_enqueue_envelope(&Envelope::subscribe(topic))?;
        topics.insert(topic.to_string());
        Ok(true)
    }

    /// Returns `Ok(false)` if the topic was not tracked
    pub fn unsubscribe(&self, topic: &str, queue: &OutboundQueue) -> Result<bool> {
        let mut topics = self.topics.lock();
        if !topics.contains(topic) {
            return Ok(false);
        }
        queue.try_enqueue_envelope(&Envelope::unsubscribe(topic))?;
        topics.remove(topic);
        Ok(true)
    }

    /// Re-send a subscribe frame per tracked topic, best-effort.
    ///
    /// Returns how many frames were enqueued.
    pub fn replay(&self, queue: &OutboundQueue) -> usize {
        replay_topics(&self.topics.lock(), queue)
    }

    /// Begin a fresh connection's outbound stream.
    ///
    /// Frames queued before this point are discarded, then every tracked
    /// topic is replayed. The topic lock is held throughout, so a concurrent
    /// `subscribe` is either discarded and replayed, or sent after the replay
    /// as a new topic; never both.
    pub(crate) fn restart(
        &self,
        queue: &OutboundQueue,
        pending: &mut mpsc::Receiver<String>,
    ) -> Restart {
        let topics = self.topics.lock();
        let discarded = discard_pending(pending);
        let replayed = replay_topics(&topics, queue);
        Restart {
            discarded,
            replayed,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.lock().is_empty()
    }
}

fn replay_topics(topics: &HashSet<String>, queue: &OutboundQueue) -> usize {
    let mut sent = 0;
    for topic in topics {
        match queue.try_enqueue_envelope(&Envelope::subscribe(topic.as_str())) {
            Ok(()) => sent += 1,
            Err(e) => debug!(topic = %topic, error = %e, "Dropped subscription replay"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn drain(queue: &OutboundQueue) -> Vec<Envelope> {
        let mut rx = queue.receiver().try_lock().unwrap();
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(taibai_core::decode(text.as_bytes()).unwrap());
        }
        frames
    }

    #[test]
    fn test_duplicate_subscribe_sends_once() {
        let queue = OutboundQueue::new(8);
        let subs = SubscriptionRegistry::new();
        assert!(subs.subscribe("room.1", &queue).unwrap());
        assert!(!subs.subscribe("room.1", &queue).unwrap());
        let frames = drain(&queue);
        assert_eq!(frames, vec![Envelope::subscribe("room.1")]);
    }

    #[test]
    fn test_subscribe_unsubscribe_subscribe_order() {
        let queue = OutboundQueue::new(8);
        let subs = SubscriptionRegistry::new();
        subs.subscribe("t", &queue).unwrap();
        subs.unsubscribe("t", &queue).unwrap();
        subs.subscribe("t", &queue).unwrap();
        assert_eq!(
            drain(&queue),
            vec![
                Envelope::subscribe("t"),
                Envelope::unsubscribe("t"),
                Envelope::subscribe("t"),
            ]
        );
        assert!(subs.contains("t"));
    }

    #[test]
    fn test_unsubscribe_untracked_is_noop() {
        let queue = OutboundQueue::new(8);
        let subs = SubscriptionRegistry::new();
        assert!(!subs.unsubscribe("never", &queue).unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_leaves_set_unchanged() {
        let queue = OutboundQueue::new(1);
        let subs = SubscriptionRegistry::new();
        subs.subscribe("a", &queue).unwrap();
        assert!(matches!(subs.subscribe("b", &queue), Err(Error::QueueFull)));
        assert!(!subs.contains("b"));

        // Retry succeeds once there is room
        drain(&queue);
        assert!(subs.subscribe("b", &queue).unwrap());

        assert!(matches!(subs.unsubscribe("a", &queue), Err(Error::QueueFull)));
        assert!(subs.contains("a"));
    }

    #[test]
    fn test_replay_resends_every_topic_once() {
        let queue = OutboundQueue::new(8);
        let subs = SubscriptionRegistry::new();
        for topic in ["a", "b", "c"] {
            subs.subscribe(topic, &queue).unwrap();
        }
        drain(&queue);

        assert_eq!(subs.replay(&queue), 3);
        let mut topics: Vec<String> = drain(&queue)
            .into_iter()
            .inspect(|env| assert_eq!(env.kind, "subscribe"))
            .map(|env| env.event)
            .collect();
        topics.sort();
        assert_eq!(topics, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_replay_is_best_effort() {
        let queue = OutboundQueue::new(4);
        let subs = SubscriptionRegistry::new();
        for topic in ["a", "b", "c"] {
            subs.subscribe(topic, &queue).unwrap();
        }
        // Queue has room for one more frame only
        assert_eq!(subs.replay(&queue), 1);
        assert_eq!(subs.len(), 3);
    }

    #[tokio::test]
    async fn test_restart_replaces_stale_frames() {
        let queue = OutboundQueue::new(3);
        let subs = SubscriptionRegistry::new();
        subs.subscribe("a", &queue).unwrap();
        subs.subscribe("b", &queue).unwrap();
        queue.try_enqueue("left over".into()).unwrap();
        assert!(matches!(subs.subscribe("c", &queue), Err(Error::QueueFull)));

        let restart = {
            let mut pending = queue.receiver().lock().await;
            subs.restart(&queue, &mut pending)
        };
        assert_eq!(
            restart,
            Restart {
                discarded: 3,
                replayed: 2
            }
        );

        let mut topics: Vec<String> = drain(&queue).into_iter().map(|env| env.event).collect();
        topics.sort();
        assert_eq!(topics, vec!["a", "b"]);
    }
}
