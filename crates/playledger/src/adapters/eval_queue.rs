// Rust guideline compliant 2026-08-22

//! Concurrent-capable adapter for the `EvalQueue` and `EvalQueueRead` ports.
//!
//! A bounded queue: writers get `QueueError::Full` at capacity, so a stalled
//! worker sheds evaluations instead of growing memory without bound. An empty
//! queue cooperatively yields rather than signaling `Closed`. Explicit
//! `close()` signals end-of-data to the reader. Designed for `tokio::join!`
//! on a `current_thread` runtime.

use std::cell::RefCell;
use std::collections::VecDeque;

use domain::{EvalQueue, EvalQueueRead, PlayEvent, QueueError};

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

/// Heap storage for queued events and the close flag.
#[derive(Debug)]
struct EvalQueueInner {
    pending: VecDeque<PlayEvent>,
    closed: bool,
}

// ---------------------------------------------------------------------------
// ConcurrentEvalQueue
// ---------------------------------------------------------------------------

/// Bounded `EvalQueue`/`EvalQueueRead` adapter that yields on empty instead
/// of signaling Closed.
///
/// Shares a single `RefCell` across both trait impls. Safe on
/// `current_thread` runtimes because `RefCell` borrows are always dropped
/// before any `.await` point inside `pop_batch`, preventing re-entrant
/// borrow panics.
#[derive(Debug)]
pub struct ConcurrentEvalQueue {
    inner: RefCell<EvalQueueInner>,
    /// Maximum number of events held at once.
    capacity: usize,
}

impl ConcurrentEvalQueue {
    /// Create an empty, open queue holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RefCell::new(EvalQueueInner {
                pending: VecDeque::new(),
                closed: false,
            }),
            capacity,
        }
    }

    /// Signal end-of-data. Idempotent: safe to call multiple times.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }
}

impl EvalQueue for ConcurrentEvalQueue {
    /// Append one event if the queue is open and below capacity.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue has been closed, or
    /// [`QueueError::Full`] when `capacity` events are already pending.
    async fn push(&self, event: PlayEvent) -> Result<(), QueueError> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.pending.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        inner.pending.push_back(event);
        Ok(())
    }
}

impl EvalQueueRead for ConcurrentEvalQueue {
    /// Drain up to `max` events from the front; yield and retry if empty and
    /// open.
    ///
    /// Loops via `tokio::task::yield_now` while the queue is open but empty,
    /// allowing other futures in a `tokio::join!` to make progress. The
    /// `RefCell` borrow is always released before the yield point.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] when the queue is empty and closed.
    async fn pop_batch(&self, max: usize) -> Result<Vec<PlayEvent>, QueueError> {
        loop {
            // Scope the borrow so it is dropped before yield_now().await,
            // preventing a panic on re-entrant polling within tokio::join!.
            let result = {
                let mut inner = self.inner.borrow_mut();
                if !inner.pending.is_empty() {
                    let count = max.min(inner.pending.len());
                    Some(Ok(inner.pending.drain(..count).collect()))
                } else if inner.closed {
                    Some(Err(QueueError::Closed))
                } else {
                    None
                }
            }; // borrow dropped here

            match result {
                Some(r) => return r,
                None => tokio::task::yield_now().await,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
