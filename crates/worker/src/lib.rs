// Rust guideline compliant 2026-08-22

//! Evaluation worker component -- drains the pending-evaluation queue and
//! runs fraud evaluation on each event, decoupled from the intake path.
//!
//! Entry points: [`EvalWorker::drain_once`], [`EvalWorker::run`].
//! Configuration via [`WorkerConfig::builder`].
//!
//! The worker never fails an event: a failed evaluation is logged and the
//! event stays persisted, recoverable by a later re-evaluation sweep.

use domain::{EvalQueueRead, EventStore, Evaluator, QueueError, Registry};
use std::time::Duration;

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Errors that can occur while draining the evaluation queue.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The supplied configuration is invalid.
    #[error("invalid worker configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// A queue read failed.
    #[error("queue error: {source}")]
    Queue {
        /// The underlying queue error.
        #[from]
        source: QueueError,
    },
}

// ---------------------------------------------------------------------------
// WorkerConfig + builder
// ---------------------------------------------------------------------------

/// Runtime configuration for an [`EvalWorker`].
///
/// Construct via [`WorkerConfig::builder`].
#[derive(Debug)]
pub struct WorkerConfig {
    /// Maximum number of events taken from the queue per drain.
    pub batch_max: usize,
    /// Delay between successive drains.
    pub poll_interval: Duration,
    /// Optional upper bound on the number of drains. `None` means infinite.
    pub iterations: Option<u64>,
}

/// Builder for [`WorkerConfig`].
///
/// Obtain via [`WorkerConfig::builder`]; finalize with [`build`](Self::build).
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    batch_max: usize,
    poll_interval: Duration,
    iterations: Option<u64>,
}

impl WorkerConfig {
    /// Create a builder. `batch_max` is the only required parameter.
    ///
    /// Default values: `poll_interval = 100 ms`, `iterations = None`.
    #[must_use]
    pub fn builder(batch_max: usize) -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            batch_max,
            poll_interval: Duration::from_millis(100),
            iterations: None,
        }
    }
}

impl WorkerConfigBuilder {
    /// Override the inter-drain delay.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set a finite drain count. Without this the worker runs until the
    /// queue signals `Closed`.
    #[must_use]
    pub fn iterations(mut self, n: u64) -> Self {
        self.iterations = Some(n);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidConfig`] when `batch_max` is zero.
    #[must_use = "the Result must be checked; use ? or unwrap"]
    pub fn build(self) -> Result<WorkerConfig, WorkerError> {
        if self.batch_max == 0 {
            return Err(WorkerError::InvalidConfig {
                reason: "batch_max must be >= 1".to_owned(),
            });
        }
        Ok(WorkerConfig {
            batch_max: self.batch_max,
            poll_interval: self.poll_interval,
            iterations: self.iterations,
        })
    }
}

// ---------------------------------------------------------------------------
// EvalWorker
// ---------------------------------------------------------------------------

/// Drains pending events and evaluates them against store and registry ports.
///
/// Generic over `S: EventStore`, `R: Registry`, `E: Evaluator` and
/// `Q: EvalQueueRead` for zero-cost static dispatch. Holds no concrete
/// adapter references -- dependencies are injected per call (hexagonal
/// architecture).
#[derive(Debug)]
pub struct EvalWorker {
    config: WorkerConfig,
}

impl EvalWorker {
    /// Create a new worker from `config`.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Take up to `config.batch_max` events from `queue` and evaluate each.
    ///
    /// Returns the number of events taken. A failed evaluation is logged and
    /// does not stop the drain.
    ///
    /// # Errors
    ///
    /// Propagates any [`QueueError`] wrapped in [`WorkerError::Queue`].
    pub async fn drain_once<S: EventStore, R: Registry, E: Evaluator, Q: EvalQueueRead>(
        &self,
        store: &S,
        registry: &R,
        evaluator: &E,
        queue: &Q,
    ) -> Result<usize, WorkerError> {
        let batch = queue.pop_batch(self.config.batch_max).await?;
        let size = batch.len();
        for event in batch {
            if let Err(e) = evaluator.evaluate(store, registry, &event).await {
                tracing::error!("worker.eval.failed: event_id={} error={e}", event.event_id);
            }
        }
        Ok(size)
    }

    /// Run the drain loop until stopped.
    ///
    /// Calls [`drain_once`](Self::drain_once) repeatedly, sleeping
    /// `config.poll_interval` between drains. Stops cleanly when:
    /// - the queue signals [`QueueError::Closed`] (returns `Ok(())`), or
    /// - `config.iterations` drains have completed (returns `Ok(())`).
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Queue`] for any queue error other than `Closed`.
    pub async fn run<S: EventStore, R: Registry, E: Evaluator, Q: EvalQueueRead>(
        &self,
        store: &S,
        registry: &R,
        evaluator: &E,
        queue: &Q,
    ) -> Result<(), WorkerError> {
        let mut count = 0u64;
        loop {
            match self.drain_once(store, registry, evaluator, queue).await {
                Ok(evaluated) => {
                    count += 1;
                    tracing::debug!("worker.batch.evaluated: iteration={count} size={evaluated}");
                }
                Err(WorkerError::Queue {
                    source: QueueError::Closed,
                }) => {
                    tracing::info!("worker.run.stopped: queue closed after {count} iteration(s)");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            if let Some(max) = self.config.iterations
                && count >= max
            {
                tracing::info!("worker.run.stopped: iteration limit reached");
                return Ok(());
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::{EvalWorker, WorkerConfig, WorkerError};
    use chrono::{DateTime, Utc};
    use domain::{
        Device, DeviceDescriptor, EvalError, EvalQueueRead, EventStore, Evaluator, FraudFlag,
        FraudVerdict, LocatedPlay, NewPlayEvent, PlayEvent, PlaySource, PlayStats, QueueError,
        Registry, RegistryError, Reputation, Severity, StoreError,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::time::Duration;
    use uuid::Uuid;

    // ------------------------------------------------------------------
    // Test helpers
    // ------------------------------------------------------------------

    /// Queue preloaded with events; signals `Closed` once drained.
    struct DrainQueue {
        pending: RefCell<VecDeque<PlayEvent>>,
        /// Pop sizes requested, for batch-cap assertions.
        pop_sizes: RefCell<Vec<usize>>,
        closed_when_empty: bool,
    }

    impl DrainQueue {
        fn closing(events: Vec<PlayEvent>) -> Self {
            Self {
                pending: RefCell::new(events.into()),
                pop_sizes: RefCell::new(vec![]),
                closed_when_empty: true,
            }
        }

        fn open(events: Vec<PlayEvent>) -> Self {
            Self {
                pending: RefCell::new(events.into()),
                pop_sizes: RefCell::new(vec![]),
                closed_when_empty: false,
            }
        }
    }

    impl EvalQueueRead for DrainQueue {
        async fn pop_batch(&self, max: usize) -> Result<Vec<PlayEvent>, QueueError> {
            self.pop_sizes.borrow_mut().push(max);
            let mut pending = self.pending.borrow_mut();
            if pending.is_empty() && self.closed_when_empty {
                return Err(QueueError::Closed);
            }
            let take = max.min(pending.len());
            Ok(pending.drain(..take).collect())
        }
    }

    /// Store stub; the worker only passes it through to the evaluator.
    struct NoopStore;

    impl EventStore for NoopStore {
        async fn song_exists(&self, _song_id: Uuid) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn insert_event(&self, event: NewPlayEvent) -> Result<PlayEvent, StoreError> {
            Ok(event.into_event(Uuid::new_v4()))
        }

        async fn find_duplicate(
            &self,
            _device_id: &str,
            _song_id: Uuid,
            _timestamp: DateTime<Utc>,
            _window: chrono::Duration,
        ) -> Result<Option<Uuid>, StoreError> {
            Ok(None)
        }

        async fn count_device_events(
            &self,
            _device_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn count_device_song_events(
            &self,
            _device_id: &str,
            _song_id: Uuid,
            _since: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn last_located_event(
            &self,
            _device_id: &str,
            _since: DateTime<Utc>,
            _exclude: Uuid,
        ) -> Result<Option<LocatedPlay>, StoreError> {
            Ok(None)
        }

        async fn insert_flag(&self, _flag: FraudFlag) -> Result<(), StoreError> {
            Ok(())
        }

        async fn device(&self, _device_id: &str) -> Result<Option<Device>, StoreError> {
            Ok(None)
        }

        async fn upsert_device(&self, _device: Device) -> Result<(), StoreError> {
            Ok(())
        }

        async fn set_reputation(&self, _device_id: &str, _score: i64) -> Result<(), StoreError> {
            Ok(())
        }

        async fn play_stats(
            &self,
            _song_id: Uuid,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<PlayStats, StoreError> {
            Ok(PlayStats {
                total_plays: 0,
                unique_venues: 0,
                unique_devices: 0,
                avg_confidence: None,
            })
        }
    }

    /// Registry stub reporting a neutral reputation for every device.
    struct NeutralRegistry;

    impl Registry for NeutralRegistry {
        async fn register_or_update<S: EventStore>(
            &self,
            _store: &S,
            descriptor: &DeviceDescriptor,
        ) -> Result<Device, RegistryError> {
            Ok(Device {
                device_id: descriptor.device_id.clone(),
                user_id: descriptor.user_id,
                phone_model: descriptor.phone_model.clone(),
                os_version: descriptor.os_version.clone(),
                app_version: descriptor.app_version.clone(),
                hardware_id: descriptor.hardware_id.clone(),
                fingerprint_hash: "0".repeat(64),
                reputation_score: 50,
                is_verified: false,
                last_seen: Utc::now(),
            })
        }

        async fn reputation<S: EventStore>(
            &self,
            _store: &S,
            _device_id: &str,
        ) -> Result<Reputation, RegistryError> {
            Ok(Reputation {
                score: 50,
                is_verified: false,
            })
        }

        async fn set_reputation<S: EventStore>(
            &self,
            _store: &S,
            _device_id: &str,
            _score: i64,
        ) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    /// Evaluator that records seen event ids; can fail every call.
    struct MockEvaluator {
        seen: RefCell<Vec<Uuid>>,
        fail: Cell<bool>,
    }

    impl MockEvaluator {
        fn new() -> Self {
            Self {
                seen: RefCell::new(vec![]),
                fail: Cell::new(false),
            }
        }

        fn failing() -> Self {
            let evaluator = Self::new();
            evaluator.fail.set(true);
            evaluator
        }
    }

    impl Evaluator for MockEvaluator {
        async fn evaluate<S: EventStore, R: Registry>(
            &self,
            _store: &S,
            _registry: &R,
            event: &PlayEvent,
        ) -> Result<FraudVerdict, EvalError> {
            self.seen.borrow_mut().push(event.event_id);
            if self.fail.get() {
                return Err(EvalError::Store(StoreError::Unavailable {
                    reason: "history query timed out".to_owned(),
                }));
            }
            Ok(FraudVerdict {
                flags: vec![],
                severity: Severity::Low,
            })
        }
    }

    fn event() -> PlayEvent {
        PlayEvent {
            event_id: Uuid::new_v4(),
            song_id: Uuid::new_v4(),
            venue_id: None,
            device_id: Some("device-1".to_owned()),
            timestamp: Utc::now(),
            source: PlaySource::BackgroundListen,
            confidence_score: Some(80.0),
            duration_played: None,
            location: None,
            metadata: None,
        }
    }

    fn events(n: usize) -> Vec<PlayEvent> {
        (0..n).map(|_| event()).collect()
    }

    // ------------------------------------------------------------------
    // Config validation
    // ------------------------------------------------------------------

    #[test]
    fn config_rejects_zero_batch() {
        let result = WorkerConfig::builder(0).build();
        assert!(matches!(result, Err(WorkerError::InvalidConfig { .. })));
    }

    // ------------------------------------------------------------------
    // drain_once
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn drain_respects_batch_cap() {
        let config = WorkerConfig::builder(2).build().unwrap();
        let worker = EvalWorker::new(config);
        let queue = DrainQueue::open(events(5));
        let evaluator = MockEvaluator::new();

        let taken = worker
            .drain_once(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await
            .unwrap();

        assert_eq!(taken, 2, "one drain takes at most batch_max events");
        assert_eq!(evaluator.seen.borrow().len(), 2);
        assert_eq!(queue.pending.borrow().len(), 3);
    }

    #[tokio::test]
    async fn drain_empty_open_queue_yields_zero() {
        let config = WorkerConfig::builder(4).build().unwrap();
        let worker = EvalWorker::new(config);
        let queue = DrainQueue::open(vec![]);
        let evaluator = MockEvaluator::new();

        let taken = worker
            .drain_once(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await
            .unwrap();

        assert_eq!(taken, 0);
        assert!(evaluator.seen.borrow().is_empty());
    }

    #[tokio::test]
    async fn drain_propagates_closed() {
        let config = WorkerConfig::builder(4).build().unwrap();
        let worker = EvalWorker::new(config);
        let queue = DrainQueue::closing(vec![]);
        let evaluator = MockEvaluator::new();

        let result = worker
            .drain_once(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await;

        assert!(matches!(
            result,
            Err(WorkerError::Queue {
                source: QueueError::Closed
            })
        ));
    }

    // ------------------------------------------------------------------
    // run loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn run_drains_everything_then_stops_on_closed() {
        let config = WorkerConfig::builder(2)
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap();
        let worker = EvalWorker::new(config);
        let preloaded = events(5);
        let expected: Vec<Uuid> = preloaded.iter().map(|e| e.event_id).collect();
        let queue = DrainQueue::closing(preloaded);
        let evaluator = MockEvaluator::new();

        worker
            .run(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await
            .unwrap();

        assert_eq!(
            *evaluator.seen.borrow(),
            expected,
            "every event evaluated once, in queue order"
        );
        // Three draining pops plus the final one that observes Closed.
        assert_eq!(*queue.pop_sizes.borrow(), vec![2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn run_stops_at_iteration_limit() {
        let config = WorkerConfig::builder(8)
            .poll_interval(Duration::ZERO)
            .iterations(3)
            .build()
            .unwrap();
        let worker = EvalWorker::new(config);
        let queue = DrainQueue::open(events(1));
        let evaluator = MockEvaluator::new();

        worker
            .run(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await
            .unwrap();

        assert_eq!(queue.pop_sizes.borrow().len(), 3, "exactly 3 drains");
        assert_eq!(evaluator.seen.borrow().len(), 1);
    }

    #[tokio::test]
    async fn run_survives_eval_failures() {
        let config = WorkerConfig::builder(4)
            .poll_interval(Duration::ZERO)
            .build()
            .unwrap();
        let worker = EvalWorker::new(config);
        let queue = DrainQueue::closing(events(3));
        let evaluator = MockEvaluator::failing();

        let result = worker
            .run(&NoopStore, &NeutralRegistry, &evaluator, &queue)
            .await;

        assert!(result.is_ok(), "eval failures must not abort the loop");
        assert_eq!(
            evaluator.seen.borrow().len(),
            3,
            "every event still attempted"
        );
    }
}
