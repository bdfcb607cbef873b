use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Padding to prevent false sharing between the two cursors
#[repr(align(64))]
struct CacheLinePadded<T>(T);

/// Storage shared by the producer and consumer halves
struct Shared<T> {
    /// Slot storage, sized to the next power of two above `capacity`
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,

    /// Logical capacity; may be smaller than the slot count
    capacity: usize,

    /// Mask for fast modulo: index & mask == index % slots
    index_mask: usize,

    /// Next sequence to write (only modified by the producer)
    write_cursor: CacheLinePadded<AtomicU64>,

    /// Next sequence to read (only modified by the consumer)
    read_cursor: CacheLinePadded<AtomicU64>,
}

// Safety: a slot is only touched by the producer before the write cursor
// passes it and by the consumer after; the cursors are the only shared state.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn len(&self) -> usize {
        let write = self.write_cursor.0.load(Ordering::Acquire);
        let read = self.read_cursor.0.load(Ordering::Acquire);
        write.saturating_sub(read) as usize
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let read = *self.read_cursor.0.get_mut();
        let write = *self.write_cursor.0.get_mut();

        for sequence in read..write {
            let index = (sequence as usize) & self.index_mask;
            // Safety: every sequence in [read, write) was written and never read.
            unsafe { self.buffer[index].get_mut().assume_init_drop() };
        }
    }
}

/// Create a bounded lock-free single-producer/single-consumer ring
///
/// Exactly `capacity` items fit; the slot array is rounded up to a power of
/// two so indexing stays a bitwise AND.
pub fn ring_buffer<T>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
    assert!(capacity > 0, "Capacity must be greater than 0");

    let slots = capacity.next_power_of_two();
    let buffer: Vec<UnsafeCell<MaybeUninit<T>>> = (0..slots)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let shared = Arc::new(Shared {
        buffer: buffer.into_boxed_slice(),
        capacity,
        index_mask: slots - 1,
        write_cursor: CacheLinePadded(AtomicU64::new(0)),
        read_cursor: CacheLinePadded(AtomicU64::new(0)),
    });

    (
        RingProducer {
            shared: Arc::clone(&shared),
            cached_read: 0,
        },
        RingConsumer {
            shared,
            cached_write: 0,
        },
    )
}

/// Writing half. Not `Clone`: there is exactly one producer.
pub struct RingProducer<T> {
    shared: Arc<Shared<T>>,
    /// Last observed read cursor, refreshed only when the ring looks full
    cached_read: u64,
}

impl<T> RingProducer<T> {
    /// Non-blocking enqueue. Hands the item back when the ring is full.
    #[inline]
    pub fn try_enqueue(&mut self, item: T) -> Result<(), T> {
        let shared = &*self.shared;
        let write = shared.write_cursor.0.load(Ordering::Relaxed);

        if write - self.cached_read >= shared.capacity as u64 {
            self.cached_read = shared.read_cursor.0.load(Ordering::Acquire);
            if write - self.cached_read >= shared.capacity as u64 {
                return Err(item);
            }
        }

        let index = (write as usize) & shared.index_mask;
        // Safety: the slot at `write` is outside [read, write) so the consumer
        // is not looking at it.
        unsafe {
            (*shared.buffer[index].get()).write(item);
        }
        shared.write_cursor.0.store(write + 1, Ordering::Release);

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// Reading half. Not `Clone`: there is exactly one consumer.
pub struct RingConsumer<T> {
    shared: Arc<Shared<T>>,
    /// Last observed write cursor, refreshed only when the ring looks empty
    cached_write: u64,
}

impl<T> RingConsumer<T> {
    /// Non-blocking dequeue in FIFO order
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read_cursor.0.load(Ordering::Relaxed);

        if read >= self.cached_write {
            self.cached_write = shared.write_cursor.0.load(Ordering::Acquire);
            if read >= self.cached_write {
                return None;
            }
        }

        let index = (read as usize) & shared.index_mask;
        // Safety: read < write, and the Acquire load above makes the
        // producer's write of this slot visible.
        let item = unsafe { (*shared.buffer[index].get()).assume_init_read() };
        shared.read_cursor.0.store(read + 1, Ordering::Release);

        Some(item)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_exact_capacity_for_non_power_of_two() {
        let (mut producer, _consumer) = ring_buffer::<u32>(1000);

        for i in 0..1000 {
            assert!(producer.try_enqueue(i).is_ok());
        }

        assert_eq!(producer.try_enqueue(1000), Err(1000));
        assert_eq!(producer.len(), 1000);
        assert_eq!(producer.capacity(), 1000);
    }

    #[test]
    fn test_fifo_order() {
        let (mut producer, mut consumer) = ring_buffer(8);

        for i in 0..5 {
            producer.try_enqueue(i).unwrap();
        }

        let drained: Vec<i32> = std::iter::from_fn(|| consumer.try_dequeue()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(consumer.try_dequeue().is_none());
    }

    #[test]
    fn test_slot_reuse_after_wraparound() {
        let (mut producer, mut consumer) = ring_buffer(3);

        for round in 0..10 {
            for i in 0..3 {
                producer.try_enqueue(round * 10 + i).unwrap();
            }
            assert!(producer.try_enqueue(999).is_err());
            for i in 0..3 {
                assert_eq!(consumer.try_dequeue(), Some(round * 10 + i));
            }
        }

        assert!(consumer.is_empty());
    }

    #[test]
    fn test_single_producer_single_consumer() {
        let (mut producer, mut consumer) = ring_buffer::<u64>(1024);
        const COUNT: u64 = 100_000;

        let writer = thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                if producer.try_enqueue(next).is_ok() {
                    next += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            if let Some(value) = consumer.try_dequeue() {
                assert_eq!(value, expected);
                expected += 1;
            }
        }

        writer.join().unwrap();
        assert!(consumer.try_dequeue().is_none());
    }

    #[derive(Debug)]
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unread_items_dropped_with_ring() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (mut producer, mut consumer) = ring_buffer(4);

        for _ in 0..3 {
            producer.try_enqueue(DropCounter(Arc::clone(&drops))).unwrap();
        }
        drop(consumer.try_dequeue());
        assert_eq!(drops.load(std::sync::atomic::Ordering::SeqCst), 1);

        drop(producer);
        drop(consumer);
        assert_eq!(drops.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
