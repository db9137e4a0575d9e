// Rust guideline compliant 2026-08-22

//! Ingestion pipeline component -- validates, deduplicates and persists play
//! submissions against an `EventStore` hexagonal port, and routes each
//! persisted event into fraud evaluation.
//!
//! Entry points: [`IngestionPipeline::ingest_one`],
//! [`IngestionPipeline::ingest_batch`]. Configuration via
//! [`PipelineConfig::builder`].
//!
//! The two intake paths differ on purpose. A single submission is latency
//! sensitive, so its evaluation is deferred through an [`EvalQueue`] port. A
//! batch arrives from an always-on client that can afford to wait, so each
//! item is evaluated synchronously and the verdicts travel back in the
//! [`BatchReport`].

use chrono::Utc;
use domain::{
    BatchPlayItem, BatchReport, BatchSubmission, DeviceDescriptor, EvalQueue, EventStore,
    Evaluator, FlaggedEvent, FraudVerdict, NewPlayEvent, PlayEvent, PlaySource, PlaySubmission,
    Registry, RegistryError, Severity, SkippedPlay, StoreError,
};

// ---------------------------------------------------------------------------
// IngestError
// ---------------------------------------------------------------------------

/// Errors that can occur while ingesting play submissions.
///
/// Display strings for the per-item variants are part of the batch contract:
/// they are echoed verbatim as skip reasons in the [`BatchReport`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The supplied configuration is invalid.
    #[error("invalid pipeline configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// A batch item is missing one or more required fields.
    #[error("Missing required fields: {fields}")]
    Validation {
        /// Comma-separated names of the absent fields.
        fields: String,
    },
    /// The referenced song does not exist in the catalog.
    #[error("Song not found: {song_id}")]
    SongNotFound {
        /// The id the submission referenced.
        song_id: uuid::Uuid,
    },
    /// An event for the same device and song already exists inside the
    /// dedup window.
    #[error("Duplicate play detected")]
    Duplicate,
    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Device registration failed before any item was processed.
    #[error("device registration failed: {0}")]
    Registry(#[from] RegistryError),
}

impl IngestError {
    /// Build a [`IngestError::Validation`] naming each absent required field.
    fn missing_fields(song_id: bool, timestamp: bool) -> Self {
        let mut fields = Vec::new();
        if song_id {
            fields.push("song_id");
        }
        if timestamp {
            fields.push("timestamp");
        }
        Self::Validation {
            fields: fields.join(", "),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig + builder
// ---------------------------------------------------------------------------

/// Runtime configuration for an [`IngestionPipeline`].
///
/// Construct via [`PipelineConfig::builder`].
#[derive(Debug)]
pub struct PipelineConfig {
    /// Half-width of the duplicate-detection window. Two plays of the same
    /// song from the same device whose timestamps differ by no more than
    /// this are the same play.
    pub dedup_window: chrono::Duration,
}

/// Builder for [`PipelineConfig`].
///
/// Obtain via [`PipelineConfig::builder`]; finalize with [`build`](Self::build).
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    dedup_window: chrono::Duration,
}

impl PipelineConfig {
    /// Create a builder. Every parameter has a default.
    ///
    /// Default values: `dedup_window = 30 s`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            // Retransmits from flaky mobile uplinks land within seconds;
            // 30 s also matches how far client clocks usually drift.
            dedup_window: chrono::Duration::seconds(30),
        }
    }
}

impl PipelineConfigBuilder {
    /// Override the duplicate-detection half-width.
    #[must_use]
    pub fn dedup_window(mut self, window: chrono::Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] when `dedup_window` is zero or
    /// negative.
    #[must_use = "the Result must be checked; use ? or unwrap"]
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        if self.dedup_window <= chrono::Duration::zero() {
            return Err(IngestError::InvalidConfig {
                reason: "dedup_window must be positive".to_owned(),
            });
        }
        Ok(PipelineConfig {
            dedup_window: self.dedup_window,
        })
    }
}

// ---------------------------------------------------------------------------
// DedupFilter
// ---------------------------------------------------------------------------

/// Duplicate-detection policy: owns the window and asks the store whether a
/// conflicting event already exists.
#[derive(Debug, Clone, Copy)]
pub struct DedupFilter {
    window: chrono::Duration,
}

impl DedupFilter {
    /// Create a filter with the given half-width.
    #[must_use]
    pub fn new(window: chrono::Duration) -> Self {
        Self { window }
    }

    /// The configured half-width.
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Id of an already-persisted event that collides with the candidate
    /// `(device_id, song_id, timestamp)`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    pub async fn find_conflict<S: EventStore>(
        &self,
        store: &S,
        device_id: &str,
        song_id: uuid::Uuid,
        timestamp: chrono::DateTime<Utc>,
    ) -> Result<Option<uuid::Uuid>, StoreError> {
        store
            .find_duplicate(device_id, song_id, timestamp, self.window)
            .await
    }
}

// ---------------------------------------------------------------------------
// IngestionPipeline
// ---------------------------------------------------------------------------

/// Validates, deduplicates and persists play submissions.
///
/// Generic over the store, queue, registry and evaluator ports for zero-cost
/// static dispatch. Holds no concrete adapter references -- dependencies are
/// injected per call (hexagonal architecture).
#[derive(Debug)]
pub struct IngestionPipeline {
    dedup: DedupFilter,
}

impl IngestionPipeline {
    /// Create a new pipeline from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            dedup: DedupFilter::new(config.dedup_window),
        }
    }

    /// Persist one interactive play submission and schedule its fraud
    /// evaluation.
    ///
    /// The event is persisted first; the push onto `queue` is fire-and-forget.
    /// A full or closed queue costs the evaluation, never the event, and is
    /// only logged.
    ///
    /// An absent `timestamp` is stamped with the server receipt time.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::SongNotFound`] when the song is not in the
    /// catalog, or [`IngestError::Store`] when a store call fails. No dedup
    /// check runs on this path.
    pub async fn ingest_one<S: EventStore, Q: EvalQueue>(
        &self,
        store: &S,
        queue: &Q,
        submission: PlaySubmission,
    ) -> Result<PlayEvent, IngestError> {
        if !store.song_exists(submission.song_id).await? {
            return Err(IngestError::SongNotFound {
                song_id: submission.song_id,
            });
        }

        let event = store
            .insert_event(NewPlayEvent {
                song_id: submission.song_id,
                venue_id: submission.venue_id,
                device_id: submission.device_id,
                timestamp: submission.timestamp.unwrap_or_else(Utc::now),
                source: submission.source,
                confidence_score: submission.confidence_score,
                duration_played: submission.duration_played,
                location: submission.location,
                metadata: submission.metadata,
            })
            .await?;
        tracing::info!(
            "pipeline.event.recorded: event_id={} song_id={}",
            event.event_id,
            event.song_id
        );

        if let Err(e) = queue.push(event.clone()).await {
            tracing::error!(
                "pipeline.eval.enqueue_failed: event_id={} error={e}",
                event.event_id
            );
        }
        Ok(event)
    }

    /// Process one batch submission from an always-on client.
    ///
    /// Registers (or refreshes) the submitting device first, then walks the
    /// items strictly in order. Per item: validate required fields, reject
    /// duplicates inside the dedup window, persist, evaluate synchronously.
    /// Any single-item failure becomes a [`SkippedPlay`] with the error
    /// message as reason, and iteration continues. A failed evaluation is
    /// logged and the item stays recorded.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Registry`] when device registration fails; no
    /// item is processed in that case. Per-item failures never surface as an
    /// `Err`.
    pub async fn ingest_batch<S: EventStore, R: Registry, E: Evaluator>(
        &self,
        store: &S,
        registry: &R,
        evaluator: &E,
        user_id: uuid::Uuid,
        submission: BatchSubmission,
    ) -> Result<BatchReport, IngestError> {
        let descriptor = DeviceDescriptor {
            device_id: submission.device_id.clone(),
            user_id: Some(user_id),
            phone_model: submission.phone_model.clone(),
            os_version: submission.os_version.clone(),
            app_version: submission.app_version.clone(),
            hardware_id: None,
        };
        registry.register_or_update(store, &descriptor).await?;

        let mut report = BatchReport::default();
        for item in submission.plays {
            match self
                .process_item(store, registry, evaluator, &submission.device_id, &item)
                .await
            {
                Ok((event, verdict)) => {
                    if verdict.flagged() {
                        report.fraud_flags.push(FlaggedEvent {
                            event_id: event.event_id,
                            flags: verdict.flags,
                        });
                    }
                    report.recorded.push(event);
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::debug!("pipeline.item.skipped: reason={reason}");
                    report.skipped.push(SkippedPlay { item, reason });
                }
            }
        }

        tracing::info!(
            "pipeline.batch.processed: device_id={} recorded={} skipped={} flagged={}",
            submission.device_id,
            report.plays_recorded(),
            report.plays_skipped(),
            report.fraud_flags.len()
        );
        Ok(report)
    }

    /// Validate, dedup-check, persist and evaluate one batch item.
    async fn process_item<S: EventStore, R: Registry, E: Evaluator>(
        &self,
        store: &S,
        registry: &R,
        evaluator: &E,
        device_id: &str,
        item: &BatchPlayItem,
    ) -> Result<(PlayEvent, FraudVerdict), IngestError> {
        let (song_id, timestamp) = match (item.song_id, item.timestamp) {
            (Some(song_id), Some(timestamp)) => (song_id, timestamp),
            (song_id, timestamp) => {
                return Err(IngestError::missing_fields(
                    song_id.is_none(),
                    timestamp.is_none(),
                ));
            }
        };

        if let Some(existing) = self
            .dedup
            .find_conflict(store, device_id, song_id, timestamp)
            .await?
        {
            tracing::debug!(
                "pipeline.dedup.hit: device_id={device_id} song_id={song_id} existing={existing}"
            );
            return Err(IngestError::Duplicate);
        }

        if !store.song_exists(song_id).await? {
            return Err(IngestError::SongNotFound { song_id });
        }

        let event = store
            .insert_event(NewPlayEvent {
                song_id,
                venue_id: item.venue_id,
                device_id: Some(device_id.to_owned()),
                timestamp,
                source: item.source.unwrap_or(PlaySource::BackgroundListen),
                confidence_score: item.confidence,
                duration_played: None,
                location: item.location,
                metadata: item.metadata.clone(),
            })
            .await?;

        let verdict = match evaluator.evaluate(store, registry, &event).await {
            Ok(verdict) => verdict,
            Err(e) => {
                // The record stands even when evaluation fails; the flags
                // can be recovered by re-running the evaluator later.
                tracing::error!("pipeline.eval.failed: event_id={} error={e}", event.event_id);
                FraudVerdict {
                    flags: Vec::new(),
                    severity: Severity::Low,
                }
            }
        };
        Ok((event, verdict))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
