//! Bounded FIFO between acquisition and disk writing.
//!
//! Built on a bounded flume channel. `push` is `try_send` under the hood and
//! therefore never blocks: a full queue drops the unit and bumps the shared
//! drop counter instead of stalling the sensor. Closing the producer lets the
//! consumer drain whatever is already queued before it observes disconnection,
//! so a cooperative stop never discards accepted units.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flume::TrySendError;
use tracing::trace;

use crate::RawUnit;

pub fn frame_buffer(capacity: usize) -> (BufferProducer, BufferConsumer) {
    let (tx, rx) = flume::bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        BufferProducer {
            tx,
            dropped: dropped.clone(),
        },
        BufferConsumer { rx, dropped },
    )
}

pub struct BufferProducer {
    tx: flume::Sender<RawUnit>,
    dropped: Arc<AtomicU64>,
}

impl BufferProducer {
    /// Queue a unit without blocking. Returns `false` (and counts a drop) if
    /// the buffer is full or already closed.
    pub fn push(&self, unit: RawUnit) -> bool {
        match self.tx.try_send(unit) {
            Ok(()) => true,
            Err(TrySendError::Full(unit)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(index = unit.index, "buffer full, unit dropped");
                false
            }
            Err(TrySendError::Disconnected(unit)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(index = unit.index, "buffer closed, unit dropped");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signal that no more units will arrive. Queued units stay available to
    /// the consumer. (Dropping the producer has the same effect.)
    pub fn close(self) {}
}

pub struct BufferConsumer {
    rx: flume::Receiver<RawUnit>,
    dropped: Arc<AtomicU64>,
}

impl BufferConsumer {
    /// Block until a unit is available. `None` once the producer is gone and
    /// the queue is fully drained.
    pub fn pop(&self) -> Option<RawUnit> {
        self.rx.recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// A handle for observing depth and drops from other threads without the
    /// ability to consume.
    pub fn watcher(&self) -> BufferWatcher {
        BufferWatcher {
            rx: self.rx.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

/// Read-only view used by `CaptureController::status`.
#[derive(Clone)]
pub struct BufferWatcher {
    rx: flume::Receiver<RawUnit>,
    dropped: Arc<AtomicU64>,
}

impl BufferWatcher {
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use strobe_camera::PixelFormat;

    fn unit(index: u64) -> RawUnit {
        RawUnit {
            index,
            timestamp_ns: index * 1_000,
            width: 4,
            height: 1,
            pixel_format: PixelFormat::Mono8,
            data: vec![0; 4],
        }
    }

    #[test]
    fn pops_in_push_order() {
        let (producer, consumer) = frame_buffer(8);
        for i in 0..5 {
            assert!(producer.push(unit(i)));
        }
        producer.close();

        let indices: Vec<_> = std::iter::from_fn(|| consumer.pop()).map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let (producer, consumer) = frame_buffer(2);
        let watcher = consumer.watcher();

        assert!(producer.push(unit(0)));
        assert!(producer.push(unit(1)));

        // Nobody is consuming; pushes must return immediately.
        let start = Instant::now();
        for i in 2..102 {
            assert!(!producer.push(unit(i)));
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(watcher.dropped(), 100);
        assert_eq!(watcher.depth(), 2);

        // The queued units survived the overflow untouched.
        assert_eq!(consumer.pop().unwrap().index, 0);
        assert_eq!(consumer.pop().unwrap().index, 1);
    }

    #[test]
    fn close_drains_queued_units_before_disconnect() {
        let (producer, consumer) = frame_buffer(8);
        producer.push(unit(0));
        producer.push(unit(1));
        producer.close();

        assert!(consumer.pop().is_some());
        assert!(consumer.pop().is_some());
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn pop_blocks_until_unit_arrives() {
        let (producer, consumer) = frame_buffer(4);

        let handle = std::thread::spawn(move || consumer.pop());
        std::thread::sleep(Duration::from_millis(20));
        producer.push(unit(7));

        let popped = handle.join().unwrap().unwrap();
        assert_eq!(popped.index, 7);
    }

    #[test]
    fn push_after_consumer_gone_counts_as_drop() {
        let (producer, consumer) = frame_buffer(4);
        drop(consumer);

        assert!(!producer.push(unit(0)));
        assert_eq!(producer.dropped(), 1);
    }
}
