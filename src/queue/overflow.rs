use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initial reservation; the deque grows on demand up to `capacity`
const INITIAL_RESERVE: usize = 1024;

/// Bounded FIFO absorbing ticks the distribution loop could not send
///
/// Both the producer adapter (primary full) and the distribution loop
/// (failed send) push here, so it is multi-producer. The lock is held only
/// for a single push or pop.
pub struct OverflowQueue<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    /// Deepest the queue has been since creation
    high_water: AtomicUsize,
}

impl<T> OverflowQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(INITIAL_RESERVE))),
            capacity,
            high_water: AtomicUsize::new(0),
        }
    }

    /// Non-blocking append. Hands the item back when the queue is full.
    pub fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut queue = self.queue.lock();

        if queue.len() >= self.capacity {
            return Err(item);
        }

        queue.push_back(item);
        self.high_water.fetch_max(queue.len(), Ordering::Relaxed);
        Ok(())
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_when_full() {
        let queue = OverflowQueue::new(2);

        assert!(queue.try_enqueue("a").is_ok());
        assert!(queue.try_enqueue("b").is_ok());
        assert_eq!(queue.try_enqueue("c"), Err("c"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_and_high_water() {
        let queue = OverflowQueue::new(10);

        for i in 0..4 {
            queue.try_enqueue(i).unwrap();
        }
        assert_eq!(queue.try_dequeue(), Some(0));
        assert_eq!(queue.try_dequeue(), Some(1));
        queue.try_enqueue(4).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.high_water(), 4);
        assert_eq!(queue.try_dequeue(), Some(2));
    }

    #[test]
    fn test_concurrent_producers_respect_capacity() {
        let queue = std::sync::Arc::new(OverflowQueue::new(1000));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = std::sync::Arc::clone(&queue);
                std::thread::spawn(move || {
                    (0..500).filter(|i| queue.try_enqueue(t * 1000 + i).is_ok()).count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 1000);
        assert_eq!(queue.len(), 1000);
    }
}
