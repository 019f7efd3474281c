//! Inbound frame queue.
//!
//! Bridges the reader thread (producer) and a main-thread pump (consumer)
//! for engines that must receive frames on the caller's thread. Frames are
//! only removed by [`InboundQueue::drain`]; insertion order is delivery
//! order.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Lock-protected FIFO of received text frames.
#[derive(Debug, Default)]
pub struct InboundQueue {
    frames: Mutex<VecDeque<String>>,
}

impl InboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame.
    pub fn push(&self, frame: String) {
        self.frames
            .lock()
            .expect("inbound queue lock poisoned")
            .push_back(frame);
    }

    /// Take every queued frame, oldest first.
    ///
    /// The lock is held only for the swap, so the producer is never blocked
    /// while the consumer processes frames.
    pub fn drain(&self) -> Vec<String> {
        let taken = std::mem::take(
            &mut *self.frames.lock().expect("inbound queue lock poisoned"),
        );
        taken.into()
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.frames.lock().expect("inbound queue lock poisoned").len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_preserves_insertion_order() {
        let queue = InboundQueue::new();
        queue.push("one".to_string());
        queue.push("two".to_string());
        queue.push("three".to_string());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec!["one", "two", "three"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_empty_returns_nothing() {
        let queue = InboundQueue::new();
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_concurrent_producer_and_consumer_lose_nothing() {
        let queue = Arc::new(InboundQueue::new());
        let producer_queue = Arc::clone(&queue);

        let producer = thread::spawn(move || {
            for i in 0..5_000 {
                producer_queue.push(i.to_string());
            }
        });

        let mut received = Vec::new();
        while received.len() < 5_000 {
            received.extend(queue.drain());
            thread::yield_now();
        }
        producer.join().unwrap();

        let expected: Vec<String> = (0..5_000).map(|i| i.to_string()).collect();
        assert_eq!(received, expected);
    }
}
