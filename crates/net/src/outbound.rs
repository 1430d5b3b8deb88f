//! Bounded outbound queue
//!
//! Any producer hands encoded frames to the single writer loop through this
//! queue. Enqueueing never waits: a full queue is reported as
//! [`Error::QueueFull`] and the frame is dropped.

use taibai_core::{encode, Envelope};
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};

pub struct OutboundQueue {
    tx: mpsc::Sender<String>,
    /// Held by the active writer for as long as its connection lives
    rx: Mutex<mpsc::Receiver<String>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn try_enqueue(&self, frame: String) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            // Unreachable while the queue owns its receiver
            mpsc::error::TrySendError::Closed(_) => Error::Cancelled,
        })
    }

    pub fn try_enqueue_envelope(&self, envelope: &Envelope) -> Result<()> {
        self.try_enqueue(encode(envelope)?)
    }

    /// Frames waiting for the writer
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub(crate) fn receiver(&self) -> &Mutex<mpsc::Receiver<String>> {
        &self.rx
    }
}

/// Drop every frame still waiting in `pending`
pub(crate) fn discard_pending(pending: &mut mpsc::Receiver<String>) -> usize {
    let mut dropped = 0;
    while pending.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_is_rejected_not_blocked() {
        let queue = OutboundQueue::new(3);
        for i in 0..3 {
            queue.try_enqueue(format!("frame-{}", i)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert!(matches!(
            queue.try_enqueue("one too many".into()),
            Err(Error::QueueFull)
        ));
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = OutboundQueue::new(8);
        queue.try_enqueue_envelope(&Envelope::subscribe("a")).unwrap();
        queue.try_enqueue_envelope(&Envelope::unsubscribe("a")).unwrap();

        let mut rx = queue.receiver().lock().await;
        let first = taibai_core::decode(rx.recv().await.unwrap().as_bytes()).unwrap();
        let second = taibai_core::decode(rx.recv().await.unwrap().as_bytes()).unwrap();
        assert_eq!(first.kind, "subscribe");
        assert_eq!(second.kind, "unsubscribe");
        drop(rx);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_discard_pending_frees_capacity() {
        let queue = OutboundQueue::new(2);
        queue.try_enqueue("stale-1".into()).unwrap();
        queue.try_enqueue("stale-2".into()).unwrap();

        let mut rx = queue.receiver().lock().await;
        assert_eq!(discard_pending(&mut rx), 2);
        assert_eq!(discard_pending(&mut rx), 0);
        drop(rx);

        assert!(queue.is_empty());
        queue.try_enqueue("fresh".into()).unwrap();
    }
}
