use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CloseHandle, Publisher, Result, Subscriber, TransportError};
use crate::models::Envelope;

struct State {
    envelopes: VecDeque<Envelope>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    hwm: usize,
}

impl Shared {
    fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// In-process transport pair with the same send semantics as the network
/// publishers: bounded at `hwm`, waiting at most `send_timeout` for room
pub fn channel(hwm: usize, send_timeout: Duration) -> (MemoryPublisher, MemorySubscriber) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            envelopes: VecDeque::new(),
            closed: false,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        hwm: hwm.max(1),
    });

    (
        MemoryPublisher {
            shared: Arc::clone(&shared),
            send_timeout,
        },
        MemorySubscriber { shared },
    )
}

pub struct MemoryPublisher {
    shared: Arc<Shared>,
    send_timeout: Duration,
}

impl MemoryPublisher {
    pub fn depth(&self) -> usize {
        self.shared.state.lock().envelopes.len()
    }
}

impl Publisher for MemoryPublisher {
    fn send(&self, envelope: Envelope) -> Result<()> {
        let mut state = self.shared.state.lock();
        let deadline = Instant::now() + self.send_timeout;

        while state.envelopes.len() >= self.shared.hwm && !state.closed {
            if self.send_timeout.is_zero() {
                return Err(TransportError::QueueFull);
            }
            if self.shared.not_full.wait_until(&mut state, deadline).timed_out() {
                if state.envelopes.len() >= self.shared.hwm {
                    return Err(TransportError::Timeout);
                }
                break;
            }
        }

        if state.closed {
            return Err(TransportError::Closed);
        }

        state.envelopes.push_back(envelope);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }
}

impl Drop for MemoryPublisher {
    fn drop(&mut self) {
        self.shared.close();
    }
}

pub struct MemorySubscriber {
    shared: Arc<Shared>,
}

impl Subscriber for MemorySubscriber {
    /// Drains whatever was queued before close, then returns `Ok(None)`
    fn recv(&mut self) -> Result<Option<Envelope>> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(envelope) = state.envelopes.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Ok(Some(envelope));
            }
            if state.closed {
                return Ok(None);
            }
            self.shared.not_empty.wait(&mut state);
        }
    }

    fn close_handle(&self) -> CloseHandle {
        let shared = Arc::clone(&self.shared);
        CloseHandle::new(move || shared.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    fn envelope(payload: &'static str) -> Envelope {
        Envelope::new(MessageType::MarketData, payload)
    }

    #[test]
    fn test_fifo_delivery() {
        let (publisher, mut subscriber) = channel(8, Duration::from_millis(10));

        publisher.send(envelope("a")).unwrap();
        publisher.send(envelope("b")).unwrap();

        assert_eq!(subscriber.recv().unwrap().unwrap().payload().as_ref(), b"a");
        assert_eq!(subscriber.recv().unwrap().unwrap().payload().as_ref(), b"b");
    }

    #[test]
    fn test_hwm_timeout_and_queue_full() {
        let (publisher, _subscriber) = channel(1, Duration::from_millis(20));
        publisher.send(envelope("a")).unwrap();

        let started = Instant::now();
        assert!(matches!(publisher.send(envelope("b")), Err(TransportError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(15));

        let (publisher, _subscriber) = channel(1, Duration::ZERO);
        publisher.send(envelope("a")).unwrap();
        assert!(matches!(publisher.send(envelope("b")), Err(TransportError::QueueFull)));
    }

    #[test]
    fn test_blocked_send_proceeds_when_drained() {
        let (publisher, mut subscriber) = channel(1, Duration::from_secs(2));
        publisher.send(envelope("a")).unwrap();

        let drainer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let first = subscriber.recv().unwrap();
            let second = subscriber.recv().unwrap();
            (first, second)
        });

        publisher.send(envelope("b")).unwrap();
        let (first, second) = drainer.join().unwrap();
        assert_eq!(first.unwrap().payload().as_ref(), b"a");
        assert_eq!(second.unwrap().payload().as_ref(), b"b");
    }

    #[test]
    fn test_close_wakes_receiver() {
        let (_publisher, mut subscriber) = channel(4, Duration::ZERO);
        let close = subscriber.close_handle();

        let receiver = std::thread::spawn(move || subscriber.recv());
        std::thread::sleep(Duration::from_millis(20));
        close.close();

        assert!(receiver.join().unwrap().unwrap().is_none());
    }

    #[test]
    fn test_send_after_close_fails() {
        let (publisher, subscriber) = channel(4, Duration::ZERO);
        subscriber.close_handle().close();

        assert!(matches!(publisher.send(envelope("a")), Err(TransportError::Closed)));
    }
}
