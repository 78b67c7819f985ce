//! Bounded ring buffer that only accepts the next sequence number and only
//! yields elements in sequence order.
//!
//! Producers racing to push different frames serialise themselves: a push
//! waits until its item carries the next expected id, so any number of
//! workers can feed the buffer while the consumer still sees 0, 1, 2, ...
//! The buffer never assigns ids; they are attached at capture time.
//!
//! Push and pop use separate locks. Every blocking wait is bounded by the
//! poll interval and re-checks the shared running flag, so a cleared flag
//! releases blocked callers even without an explicit wake-up.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::error::{PipelineError, Result};

/// 8-bit frame sequence number, wraps modulo 256.
pub type SequenceId = u8;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Anything carrying the sequence number it was captured with
pub trait Sequenced {
    fn sequence_id(&self) -> SequenceId;
}

/// A rejected push. The item is handed back to the caller.
#[derive(Debug, Error)]
pub enum PushError<T> {
    #[error("buffer is full")]
    Full(T),
    #[error("buffer is shut down")]
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

struct ProducerCursor {
    back: usize,
    next_id: SequenceId,
}

struct ConsumerCursor {
    front: usize,
}

pub struct OrderedBuffer<T> {
    slots: Box<[Mutex<Option<T>>]>,
    producer: Mutex<ProducerCursor>,
    consumer: Mutex<ConsumerCursor>,
    len: AtomicUsize,
    /// Signalled when the next id advances or a slot frees up.
    producer_cv: Condvar,
    /// Signalled when an element becomes available.
    consumer_cv: Condvar,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<T: Sequenced> OrderedBuffer<T> {
    /// The first accepted id is 0.
    pub fn new(capacity: usize, running: Arc<AtomicBool>) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::invalid("buffer_capacity", capacity));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            producer: Mutex::new(ProducerCursor { back: 0, next_id: 0 }),
            consumer: Mutex::new(ConsumerCursor { front: 0 }),
            len: AtomicUsize::new(0),
            producer_cv: Condvar::new(),
            consumer_cv: Condvar::new(),
            running,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Blocks until the buffer has room and `item` is the next expected id.
    ///
    /// Fails only with [`PushError::Closed`], when the running flag clears
    /// while waiting.
    pub fn push(&self, item: T) -> std::result::Result<(), PushError<T>> {
        self.push_inner(item, false)
    }

    /// Like [`push`](Self::push), but fails with [`PushError::Full`] instead
    /// of waiting for room. Still waits for `item`'s turn, so ordering holds
    /// under backpressure and the caller decides whether to retry or drop.
    pub fn try_push(&self, item: T) -> std::result::Result<(), PushError<T>> {
        self.push_inner(item, true)
    }

    fn push_inner(&self, item: T, fail_when_full: bool) -> std::result::Result<(), PushError<T>> {
        let id = item.sequence_id();
        let mut producer = self.producer.lock();
        loop {
            if !self.is_running() {
                return Err(PushError::Closed(item));
            }
            if producer.next_id == id {
                if !self.is_full() {
                    break;
                }
                if fail_when_full {
                    return Err(PushError::Full(item));
                }
            }
            self.producer_cv.wait_for(&mut producer, self.poll_interval);
        }

        let back = producer.back;
        *self.slots[back].lock() = Some(item);
        producer.back = (back + 1) % self.slots.len();
        producer.next_id = producer.next_id.wrapping_add(1);
        self.len.fetch_add(1, Ordering::AcqRel);
        drop(producer);

        tracing::trace!(id, "pushed");
        // Other producers may be holding the id that is now next.
        self.producer_cv.notify_all();
        drop(self.consumer.lock());
        self.consumer_cv.notify_one();
        Ok(())
    }

    /// Blocks until an element is available and takes the oldest one.
    ///
    /// Returns `None` if the running flag clears while waiting; that is the
    /// shutdown signal, never an empty frame.
    pub fn pop(&self) -> Option<T> {
        let mut consumer = self.consumer.lock();
        while self.is_empty() {
            if !self.is_running() {
                return None;
            }
            self.consumer_cv.wait_for(&mut consumer, self.poll_interval);
        }

        let front = consumer.front;
        let item = self.slots[front].lock().take();
        debug_assert!(item.is_some(), "occupied slot {} was empty", front);
        consumer.front = (front + 1) % self.slots.len();
        self.len.fetch_sub(1, Ordering::AcqRel);
        drop(consumer);

        drop(self.producer.lock());
        self.producer_cv.notify_all();
        item
    }
}

impl<T> OrderedBuffer<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Id the next successful push must carry.
    pub fn next_id(&self) -> SequenceId {
        self.producer.lock().next_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the shared running flag and wakes every blocked caller.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.wake_all();
    }

    pub fn wake_all(&self) {
        drop(self.producer.lock());
        self.producer_cv.notify_all();
        drop(self.consumer.lock());
        self.consumer_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[derive(Debug, PartialEq)]
    struct Item {
        id: SequenceId,
        value: usize,
    }

    impl Item {
        fn new(value: usize) -> Self {
            Self {
                id: value as SequenceId,
                value,
            }
        }
    }

    impl Sequenced for Item {
        fn sequence_id(&self) -> SequenceId {
            self.id
        }
    }

    fn buffer(capacity: usize) -> Arc<OrderedBuffer<Item>> {
        Arc::new(
            OrderedBuffer::new(capacity, Arc::new(AtomicBool::new(true)))
                .unwrap()
                .with_poll_interval(Duration::from_millis(2)),
        )
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = OrderedBuffer::<Item>::new(0, Arc::new(AtomicBool::new(true)));
        assert!(matches!(result, Err(PipelineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_single_producer_fifo() {
        let buf = buffer(4);
        for i in 0..4 {
            buf.push(Item::new(i)).unwrap();
        }
        assert!(buf.is_full());
        for i in 0..4 {
            assert_eq!(buf.pop().unwrap().value, i);
        }
        assert!(buf.is_empty());
        assert_eq!(buf.next_id(), 4);
    }

    #[test]
    fn test_interleaved_producers_keep_order() {
        const PRODUCERS: usize = 4;
        const TOTAL: usize = 600;
        let buf = buffer(8);

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    for value in (p..TOTAL).step_by(PRODUCERS) {
                        if value % 7 == p {
                            thread::sleep(Duration::from_micros(200));
                        }
                        buf.push(Item::new(value)).unwrap();
                    }
                })
            })
            .collect();

        for expected in 0..TOTAL {
            let item = buf.pop().unwrap();
            assert_eq!(item.value, expected);
            assert_eq!(item.id, expected as SequenceId);
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_full_after_fourth_push_and_fifth_blocks() {
        let buf = buffer(4);
        // two producers: evens and odds
        let a = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                buf.push(Item::new(0)).unwrap();
                buf.push(Item::new(2)).unwrap();
            })
        };
        let b = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                buf.push(Item::new(1)).unwrap();
                buf.push(Item::new(3)).unwrap();
            })
        };
        a.join().unwrap();
        b.join().unwrap();
        assert!(buf.is_full());
        assert_eq!(buf.len(), 4);

        let done = Arc::new(AtomicBool::new(false));
        let fifth = {
            let buf = Arc::clone(&buf);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                buf.push(Item::new(4)).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst), "fifth push should block while full");

        assert_eq!(buf.pop().unwrap().value, 0);
        fifth.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(buf.is_full());
        for expected in 1..5 {
            assert_eq!(buf.pop().unwrap().value, expected);
        }
    }

    #[test]
    fn test_try_push_full_returns_item() {
        let buf = buffer(1);
        buf.push(Item::new(0)).unwrap();
        match buf.try_push(Item::new(1)) {
            Err(PushError::Full(item)) => assert_eq!(item.value, 1),
            other => panic!("expected Full, got {:?}", other),
        }
        assert_eq!(buf.next_id(), 1);
        assert_eq!(buf.pop().unwrap().value, 0);
        buf.try_push(Item::new(1)).unwrap();
        assert_eq!(buf.pop().unwrap().value, 1);
    }

    #[test]
    fn test_try_push_after_shutdown() {
        let buf = buffer(2);
        buf.shutdown();
        let err = buf.try_push(Item::new(0)).unwrap_err();
        assert!(matches!(err, PushError::Closed(_)));
        assert_eq!(err.into_inner().value, 0);
    }

    fn advance_to(buf: &OrderedBuffer<Item>, next: usize) {
        for value in 0..next {
            buf.push(Item::new(value)).unwrap();
            buf.pop().unwrap();
        }
    }

    #[test]
    fn test_try_push_waits_for_turn() {
        let buf = buffer(8);
        advance_to(&buf, 7);

        let done = Arc::new(AtomicBool::new(false));
        let handle = thread::spawn({
            let buf = Arc::clone(&buf);
            let done = Arc::clone(&done);
            move || {
                let result = buf.try_push(Item::new(8));
                done.store(true, Ordering::SeqCst);
                result
            }
        });

        // Plenty of room, but 8 is not next yet.
        thread::sleep(Duration::from_millis(30));
        assert!(!done.load(Ordering::SeqCst));
        assert!(buf.is_empty());

        buf.push(Item::new(7)).unwrap();
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(buf.pop().unwrap().value, 7);
        assert_eq!(buf.pop().unwrap().value, 8);
    }

    #[test]
    fn test_try_push_full_on_its_turn() {
        let buf = buffer(1);
        advance_to(&buf, 7);

        let handle = thread::spawn({
            let buf = Arc::clone(&buf);
            move || buf.try_push(Item::new(8))
        });
        thread::sleep(Duration::from_millis(10));
        buf.push(Item::new(7)).unwrap();

        match handle.join().unwrap() {
            Err(PushError::Full(item)) => assert_eq!(item.value, 8),
            other => panic!("expected Full, got {:?}", other),
        }
        assert_eq!(buf.next_id(), 8);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.pop().unwrap().value, 7);
    }

    #[test]
    fn test_wraparound_accepts_zero_after_255() {
        let buf = buffer(8);
        for value in 0..=300usize {
            buf.push(Item::new(value)).unwrap();
            let item = buf.pop().unwrap();
            assert_eq!(item.value, value);
        }
        assert_eq!(buf.next_id(), (301 % 256) as SequenceId);
    }

    #[test]
    fn test_wrong_id_waits_for_turn() {
        let buf = buffer(4);
        for value in 0..7 {
            buf.push(Item::new(value)).unwrap();
            buf.pop().unwrap();
        }
        // worker holding frame 8 finishes first
        let late = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.push(Item::new(8)).unwrap())
        };
        thread::sleep(Duration::from_millis(30));
        assert!(buf.is_empty(), "frame 8 must not overtake frame 7");
        buf.push(Item::new(7)).unwrap();
        late.join().unwrap();
        assert_eq!(buf.pop().unwrap().value, 7);
        assert_eq!(buf.pop().unwrap().value, 8);
    }

    #[test]
    fn test_pop_returns_none_on_shutdown() {
        let buf = buffer(2);
        let waiter = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.pop())
        };
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        buf.shutdown();
        assert!(waiter.join().unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_blocked_push_observes_cleared_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let buf = Arc::new(
            OrderedBuffer::new(2, Arc::clone(&running))
                .unwrap()
                .with_poll_interval(Duration::from_millis(2)),
        );
        let waiter = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.push(Item::new(5)))
        };
        thread::sleep(Duration::from_millis(20));
        // no explicit wake-up: the bounded wait notices the flag
        running.store(false, Ordering::Release);
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(PushError::Closed(Item { value: 5, .. }))));
    }
}
