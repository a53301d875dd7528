use std::collections::VecDeque;

/// Outbound frames held while the transport is not open.
///
/// Bounded FIFO; once full, new frames are rejected and the queued ones kept.
#[derive(Debug)]
pub struct PendingQueue {
    frames: VecDeque<String>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Returns `false` when the frame was dropped because the queue is full.
    pub fn push(&mut self, frame: String) -> bool {
        if self.frames.len() >= self.capacity {
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    /// Puts a frame back at the head after a failed transmit.
    pub fn requeue(&mut self, frame: String) {
        self.frames.push_front(frame);
    }

    pub fn pop(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_fifo_order() {
        let mut q = PendingQueue::new(8);
        for m in ["m1", "m2", "m3"] {
            assert!(q.push(m.to_string()));
        }
        let drained: Vec<String> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, vec!["m1", "m2", "m3"]);
        assert!(q.is_empty());
    }

    #[test]
    fn overflow_drops_newest() {
        let mut q = PendingQueue::new(2);
        assert!(q.push("m1".into()));
        assert!(q.push("m2".into()));
        assert!(!q.push("m3".into()));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().as_deref(), Some("m1"));
        assert_eq!(q.pop().as_deref(), Some("m2"));
    }

    #[test]
    fn requeue_goes_to_front() {
        let mut q = PendingQueue::new(4);
        q.push("a".into());
        q.push("b".into());
        let head = q.pop().unwrap();
        q.requeue(head);
        assert_eq!(q.pop().as_deref(), Some("a"));
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let mut q = PendingQueue::new(0);
        assert!(!q.push("x".into()));
        assert_eq!(q.len(), 0);
    }
}
