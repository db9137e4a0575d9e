// Rust guideline compliant 2026-08-22

//! Shared domain types for the play-event ingestion pipeline.
//!
//! Defines the play/device/fraud data model and the hexagonal port traits:
//! [`EventStore`], [`EvalQueue`], [`EvalQueueRead`], [`Registry`], and
//! [`Evaluator`]. All pipeline components depend on this crate; no other
//! workspace crate is imported here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Play events
// ---------------------------------------------------------------------------

/// How a play was captured on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaySource {
    /// Always-on background audio matching (the default for batch items).
    BackgroundListen,
    /// User tapped "I heard this".
    Manual,
    /// Reported by DJ controller hardware.
    DjController,
    /// Radio monitoring feed.
    Radio,
    /// Streaming service integration.
    Streaming,
}

impl PlaySource {
    /// Stable wire/storage name of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackgroundListen => "background_listen",
            Self::Manual => "manual",
            Self::DjController => "dj_controller",
            Self::Radio => "radio",
            Self::Streaming => "streaming",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "background_listen" => Some(Self::BackgroundListen),
            "manual" => Some(Self::Manual),
            "dj_controller" => Some(Self::DjController),
            "radio" => Some(Self::Radio),
            "streaming" => Some(Self::Streaming),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A geographic coordinate pair. Both components are always present; a play
/// without a usable fix carries no `GeoPoint` at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

/// A persisted play event. Immutable once stored; fraud findings are attached
/// as separate [`FraudFlag`] records, never by mutating the event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayEvent {
    /// Server-generated identifier.
    pub event_id: uuid::Uuid,
    /// The matched song. Must exist before the event is accepted.
    pub song_id: uuid::Uuid,
    /// Venue the play was detected at, when known.
    pub venue_id: Option<uuid::Uuid>,
    /// Submitting device, when the client identified itself.
    pub device_id: Option<String>,
    /// Event time (client-supplied, or server receipt time).
    pub timestamp: DateTime<Utc>,
    /// Capture channel.
    pub source: PlaySource,
    /// Fingerprint-match confidence in `[0, 100]`. Absent means "not
    /// measured", which is distinct from a measured zero.
    pub confidence_score: Option<f64>,
    /// Seconds of the song actually heard.
    pub duration_played: Option<i64>,
    /// Where the play was detected.
    pub location: Option<GeoPoint>,
    /// Free-form client metadata, stored verbatim.
    pub metadata: Option<serde_json::Value>,
}

/// A play event awaiting persistence; the store assigns the `event_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlayEvent {
    pub song_id: uuid::Uuid,
    pub venue_id: Option<uuid::Uuid>,
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: PlaySource,
    pub confidence_score: Option<f64>,
    pub duration_played: Option<i64>,
    pub location: Option<GeoPoint>,
    pub metadata: Option<serde_json::Value>,
}

impl NewPlayEvent {
    /// Attach a server-generated id, producing the persisted form.
    #[must_use]
    pub fn into_event(self, event_id: uuid::Uuid) -> PlayEvent {
        PlayEvent {
            event_id,
            song_id: self.song_id,
            venue_id: self.venue_id,
            device_id: self.device_id,
            timestamp: self.timestamp,
            source: self.source,
            confidence_score: self.confidence_score,
            duration_played: self.duration_played,
            location: self.location,
            metadata: self.metadata,
        }
    }
}

/// Projection of a play event that is known to carry coordinates. Returned by
/// [`EventStore::last_located_event`] for the movement check.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedPlay {
    pub event_id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub location: GeoPoint,
}

/// Aggregate play counts for one song over a time range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayStats {
    pub total_plays: u64,
    pub unique_venues: u64,
    pub unique_devices: u64,
    /// Mean confidence over events that carry one; `None` when none do.
    pub avg_confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A known client device and its trust state.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Caller-supplied identity, unique per device.
    pub device_id: String,
    /// Owning user, when the submission was authenticated.
    pub user_id: Option<uuid::Uuid>,
    pub phone_model: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
    /// Hardware identifier (IMEI or similar), when the client exposes one.
    pub hardware_id: Option<String>,
    /// Salted one-way hash of the identity/hardware tuple. Written on first
    /// sight and never recomputed.
    pub fingerprint_hash: String,
    /// Trustworthiness in `[0, 100]`; unseen devices start at the configured
    /// default.
    pub reputation_score: i64,
    pub is_verified: bool,
    pub last_seen: DateTime<Utc>,
}

/// Descriptor submitted by a client alongside its plays. Absent fields mean
/// "not reported"; on repeat sight they leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub user_id: Option<uuid::Uuid>,
    pub phone_model: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
    pub hardware_id: Option<String>,
}

/// Reputation snapshot for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reputation {
    pub score: i64,
    pub is_verified: bool,
}

// ---------------------------------------------------------------------------
// Fraud findings
// ---------------------------------------------------------------------------

/// Which heuristic fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    LowReputation,
    ImpossibleMovement,
    ExcessivePlays,
    SongSpam,
    LowConfidence,
}

impl FlagType {
    /// Stable wire/storage name of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowReputation => "low_reputation",
            Self::ImpossibleMovement => "impossible_movement",
            Self::ExcessivePlays => "excessive_plays",
            Self::SongSpam => "song_spam",
            Self::LowConfidence => "low_confidence",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "low_reputation" => Some(Self::LowReputation),
            "impossible_movement" => Some(Self::ImpossibleMovement),
            "excessive_plays" => Some(Self::ExcessivePlays),
            "song_spam" => Some(Self::SongSpam),
            "low_confidence" => Some(Self::LowConfidence),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlagType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flag severity. Ordering is `Low < Medium < High`; an evaluation's overall
/// severity only ever moves up this scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Stable wire/storage name of the variant.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Inverse of [`as_str`](Self::as_str); `None` for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One heuristic firing against one event. Append-only audit record; never
/// mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudFlag {
    /// Device the finding is attributed to, when the event named one.
    pub device_id: Option<String>,
    pub event_id: uuid::Uuid,
    pub flag_type: FlagType,
    pub severity: Severity,
    /// Human-readable account of what was observed.
    pub description: String,
}

/// Outcome of one fraud evaluation pass over one event.
#[derive(Debug, Clone, PartialEq)]
pub struct FraudVerdict {
    /// Flags produced by this pass, in check order.
    pub flags: Vec<FraudFlag>,
    /// Highest severity reached by this pass; `Low` when clean.
    pub severity: Severity,
}

impl FraudVerdict {
    /// `true` when at least one heuristic fired.
    #[must_use]
    pub fn flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Submissions and batch outcomes
// ---------------------------------------------------------------------------

/// A single-event submission, already authenticated upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaySubmission {
    pub song_id: uuid::Uuid,
    pub device_id: Option<String>,
    pub venue_id: Option<uuid::Uuid>,
    /// Absent means "stamp with server receipt time".
    pub timestamp: Option<DateTime<Utc>>,
    pub source: PlaySource,
    pub confidence_score: Option<f64>,
    pub duration_played: Option<i64>,
    pub location: Option<GeoPoint>,
    pub metadata: Option<serde_json::Value>,
}

/// A batch submission from an always-on client: one device descriptor plus
/// its accumulated plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub device_id: String,
    pub phone_model: Option<String>,
    pub os_version: Option<String>,
    pub app_version: Option<String>,
    pub plays: Vec<BatchPlayItem>,
}

/// One candidate play inside a batch. Every field is optional at this layer;
/// the pipeline validates before anything is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchPlayItem {
    pub song_id: Option<uuid::Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Defaults to [`PlaySource::BackgroundListen`] when absent.
    pub source: Option<PlaySource>,
    pub confidence: Option<f64>,
    pub venue_id: Option<uuid::Uuid>,
    pub location: Option<GeoPoint>,
    pub metadata: Option<serde_json::Value>,
}

/// A batch item that was not persisted, echoed back with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPlay {
    pub item: BatchPlayItem,
    pub reason: String,
}

/// Flags raised for one recorded event during batch processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedEvent {
    pub event_id: uuid::Uuid,
    pub flags: Vec<FraudFlag>,
}

/// Per-item outcomes of one batch submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Events persisted by this batch, in submission order.
    pub recorded: Vec<PlayEvent>,
    /// Items rejected with their reasons, in submission order.
    pub skipped: Vec<SkippedPlay>,
    /// Fraud findings for recorded events that were flagged.
    pub fraud_flags: Vec<FlaggedEvent>,
}

impl BatchReport {
    /// Number of events persisted.
    #[must_use]
    pub fn plays_recorded(&self) -> usize {
        self.recorded.len()
    }

    /// Number of items skipped.
    #[must_use]
    pub fn plays_skipped(&self) -> usize {
        self.skipped.len()
    }
}

// ---------------------------------------------------------------------------
// Port errors
// ---------------------------------------------------------------------------

/// Errors from the durable store port.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the statement failed.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// Human-readable description.
        reason: String,
    },
    /// A stored record could not be decoded into its domain type.
    #[error("malformed record: {reason}")]
    Malformed {
        /// Human-readable description.
        reason: String,
    },
}

/// Errors from the pending-evaluation queue port.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// Queue has reached its maximum capacity.
    #[error("evaluation queue full (capacity: {capacity})")]
    Full { capacity: usize },
    /// Queue has been closed; no further pushes are accepted.
    #[error("evaluation queue closed")]
    Closed,
}

/// Errors from the device registry port and its configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// The supplied registry configuration is invalid.
    #[error("invalid registry configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// The underlying store call failed.
    #[error("registry store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the fraud evaluator port and its configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The supplied evaluator configuration is invalid.
    #[error("invalid evaluator configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// A history query or flag insert failed.
    #[error("evaluation store error: {0}")]
    Store(#[from] StoreError),
    /// A reputation read or penalty write failed.
    #[error("evaluation registry error: {0}")]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Hexagonal port: the narrow contract the pipeline needs from the durable
/// store. Implementations live in the binary crate; components depend
/// exclusively on this trait, never on a concrete adapter.
#[expect(
    async_fn_in_trait,
    reason = "no dyn dispatch needed; internal workspace only"
)]
pub trait EventStore {
    /// `true` when the song exists in the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn song_exists(&self, song_id: uuid::Uuid) -> Result<bool, StoreError>;

    /// Persist a new play event, assigning its server-side id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    async fn insert_event(&self, event: NewPlayEvent) -> Result<PlayEvent, StoreError>;

    /// Id of an existing event for the same device and song whose timestamp
    /// lies within `window` of `timestamp`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn find_duplicate(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        timestamp: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Option<uuid::Uuid>, StoreError>;

    /// Number of events this device produced since `since` (any song).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn count_device_events(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Number of events this device produced for one song since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn count_device_song_events(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// The device's most recent event since `since` that carries coordinates,
    /// excluding the event identified by `exclude` (the one under evaluation).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn last_located_event(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        exclude: uuid::Uuid,
    ) -> Result<Option<LocatedPlay>, StoreError>;

    /// Append one fraud flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the insert fails.
    async fn insert_flag(&self, flag: FraudFlag) -> Result<(), StoreError>;

    /// Fetch a device by id; `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup fails.
    async fn device(&self, device_id: &str) -> Result<Option<Device>, StoreError>;

    /// Insert or fully replace a device row, keyed by `device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError>;

    /// Persist an absolute reputation score for a device. No-op for an
    /// unknown device.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    async fn set_reputation(&self, device_id: &str, score: i64) -> Result<(), StoreError>;

    /// Aggregate play counts for one song over `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the query fails.
    async fn play_stats(
        &self,
        song_id: uuid::Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PlayStats, StoreError>;
}

/// Hexagonal port: the write side of the pending-evaluation queue. The
/// single-event ingest path pushes persisted events here instead of awaiting
/// their fraud evaluation.
#[expect(
    async_fn_in_trait,
    reason = "no dyn dispatch needed; internal workspace only"
)]
pub trait EvalQueue {
    /// Enqueue one persisted event for later evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when capacity is exceeded, or
    /// [`QueueError::Closed`] when the queue has been shut down.
    async fn push(&self, event: PlayEvent) -> Result<(), QueueError>;
}

/// Hexagonal port: the read side of the pending-evaluation queue, drained by
/// the evaluation worker.
#[expect(
    async_fn_in_trait,
    reason = "no dyn dispatch needed; internal workspace only"
)]
pub trait EvalQueueRead {
    /// Take up to `max` pending events.
    ///
    /// Returns between 1 and `max` events when data is available.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] when the queue is closed and drained.
    async fn pop_batch(&self, max: usize) -> Result<Vec<PlayEvent>, QueueError>;
}

/// Hexagonal port: device registration and reputation access.
///
/// The store handle is injected per call so one registry instance can serve
/// any store adapter.
#[expect(
    async_fn_in_trait,
    reason = "no dyn dispatch needed; internal workspace only"
)]
pub trait Registry {
    /// Upsert a device keyed by `descriptor.device_id`.
    ///
    /// First sight inserts with a derived fingerprint hash, default
    /// reputation, and `is_verified = false`. Repeat sight refreshes the
    /// reported descriptor fields and `last_seen` only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when a store call fails.
    async fn register_or_update<S: EventStore>(
        &self,
        store: &S,
        descriptor: &DeviceDescriptor,
    ) -> Result<Device, RegistryError>;

    /// Reputation snapshot for a device; unknown devices report the neutral
    /// default rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the lookup fails.
    async fn reputation<S: EventStore>(
        &self,
        store: &S,
        device_id: &str,
    ) -> Result<Reputation, RegistryError>;

    /// Clamp `score` to `[0, 100]` and persist it as the device's new
    /// absolute reputation. Callers compute deltas themselves; concurrent
    /// writers can clobber each other (last writer wins).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the write fails.
    async fn set_reputation<S: EventStore>(
        &self,
        store: &S,
        device_id: &str,
        score: i64,
    ) -> Result<(), RegistryError>;
}

/// Hexagonal port: fraud evaluation over a persisted event.
#[expect(
    async_fn_in_trait,
    reason = "no dyn dispatch needed; internal workspace only"
)]
pub trait Evaluator {
    /// Run every heuristic against `event`, persist any resulting flags, and
    /// apply the reputation penalty.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when a history query, flag insert, or
    /// reputation call fails.
    async fn evaluate<S: EventStore, R: Registry>(
        &self,
        store: &S,
        registry: &R,
        event: &PlayEvent,
    ) -> Result<FraudVerdict, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn make_event() -> PlayEvent {
        PlayEvent {
            event_id: uuid::Uuid::new_v4(),
            song_id: uuid::Uuid::new_v4(),
            venue_id: None,
            device_id: Some("device-1".to_owned()),
            timestamp: Utc::now(),
            source: PlaySource::BackgroundListen,
            confidence_score: Some(92.5_f64),
            duration_played: Some(180),
            location: None,
            metadata: None,
        }
    }

    // ------------------------------------------------------------------
    // Data model
    // ------------------------------------------------------------------

    #[test]
    fn new_event_keeps_fields_through_into_event() {
        let new = NewPlayEvent {
            song_id: uuid::Uuid::new_v4(),
            venue_id: None,
            device_id: Some("device-7".to_owned()),
            timestamp: Utc::now(),
            source: PlaySource::Radio,
            confidence_score: None,
            duration_played: None,
            location: Some(GeoPoint { lat: 48.85, lng: 2.35 }),
            metadata: Some(serde_json::json!({"station": "fm-104"})),
        };
        let id = uuid::Uuid::new_v4();
        let event = new.clone().into_event(id);
        assert_eq!(event.event_id, id);
        assert_eq!(event.song_id, new.song_id);
        assert_eq!(event.device_id, new.device_id);
        assert_eq!(event.source, PlaySource::Radio);
        assert_eq!(event.location, new.location);
        assert_eq!(event.metadata, new.metadata);
    }

    #[test]
    fn severity_orders_low_medium_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        // Escalation is a plain max over this ordering.
        assert_eq!(Severity::Low.max(Severity::High), Severity::High);
        assert_eq!(Severity::Medium.max(Severity::Low), Severity::Medium);
    }

    #[test]
    fn enum_names_round_trip() {
        for source in [
            PlaySource::BackgroundListen,
            PlaySource::Manual,
            PlaySource::DjController,
            PlaySource::Radio,
            PlaySource::Streaming,
        ] {
            assert_eq!(PlaySource::from_name(source.as_str()), Some(source));
        }
        for flag in [
            FlagType::LowReputation,
            FlagType::ImpossibleMovement,
            FlagType::ExcessivePlays,
            FlagType::SongSpam,
            FlagType::LowConfidence,
        ] {
            assert_eq!(FlagType::from_name(flag.as_str()), Some(flag));
        }
        assert_eq!(PlaySource::from_name("carrier_pigeon"), None);
        assert_eq!(Severity::from_name("critical"), None);
    }

    #[test]
    fn source_serde_uses_snake_case_names() {
        let json = serde_json::to_string(&PlaySource::DjController).unwrap();
        assert_eq!(json, "\"dj_controller\"");
        let back: PlaySource = serde_json::from_str("\"background_listen\"").unwrap();
        assert_eq!(back, PlaySource::BackgroundListen);
    }

    #[test]
    fn batch_item_absent_fields_deserialize_as_none() {
        let item: BatchPlayItem =
            serde_json::from_str(r#"{"song_id":"7f2a1c8e-55a1-4be0-9d6b-2f8f4f6a9c01"}"#)
                .unwrap();
        assert!(item.song_id.is_some());
        assert!(item.timestamp.is_none());
        assert!(item.source.is_none());
        assert!(item.confidence.is_none());
        assert!(item.metadata.is_none());
    }

    #[test]
    fn verdict_flagged_tracks_flags() {
        let clean = FraudVerdict { flags: vec![], severity: Severity::Low };
        assert!(!clean.flagged());

        let event = make_event();
        let flagged = FraudVerdict {
            flags: vec![FraudFlag {
                device_id: event.device_id.clone(),
                event_id: event.event_id,
                flag_type: FlagType::LowConfidence,
                severity: Severity::Low,
                description: "Low confidence score: 12".to_owned(),
            }],
            severity: Severity::Low,
        };
        assert!(flagged.flagged());
    }

    #[test]
    fn batch_report_counts_match_collections() {
        let mut report = BatchReport::default();
        assert_eq!(report.plays_recorded(), 0);
        assert_eq!(report.plays_skipped(), 0);

        report.recorded.push(make_event());
        report.skipped.push(SkippedPlay {
            item: BatchPlayItem::default(),
            reason: "Missing required fields: song_id".to_owned(),
        });
        assert_eq!(report.plays_recorded(), 1);
        assert_eq!(report.plays_skipped(), 1);
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    #[test]
    fn store_error_display() {
        let e = StoreError::Unavailable { reason: "pool exhausted".to_owned() };
        assert_eq!(e.to_string(), "store unavailable: pool exhausted");
        let m = StoreError::Malformed { reason: "bad source name".to_owned() };
        assert_eq!(m.to_string(), "malformed record: bad source name");
    }

    #[test]
    fn queue_error_variants() {
        let full = QueueError::Full { capacity: 8 };
        assert_eq!(full, QueueError::Full { capacity: 8 });
        assert_eq!(full.to_string(), "evaluation queue full (capacity: 8)");
        assert_ne!(full, QueueError::Closed);
    }

    #[test]
    fn eval_error_wraps_store_and_registry() {
        let store = StoreError::Unavailable { reason: "down".to_owned() };
        let via_registry: EvalError = RegistryError::from(store.clone()).into();
        let direct: EvalError = store.into();
        assert!(matches!(via_registry, EvalError::Registry(_)));
        assert!(matches!(direct, EvalError::Store(_)));
    }

    // ------------------------------------------------------------------
    // Ports -- compile checks with minimal implementations
    // ------------------------------------------------------------------

    /// Verify that a minimal `EvalQueue`/`EvalQueueRead` pair moves events.
    #[tokio::test]
    async fn queue_ports_minimal_impl() {
        struct TestQueue {
            inner: RefCell<Vec<PlayEvent>>,
        }

        impl EvalQueue for TestQueue {
            async fn push(&self, event: PlayEvent) -> Result<(), QueueError> {
                self.inner.borrow_mut().push(event);
                Ok(())
            }
        }

        impl EvalQueueRead for TestQueue {
            async fn pop_batch(&self, max: usize) -> Result<Vec<PlayEvent>, QueueError> {
                let mut inner = self.inner.borrow_mut();
                if inner.is_empty() {
                    return Err(QueueError::Closed);
                }
                let count = max.min(inner.len());
                Ok(inner.drain(..count).collect())
            }
        }

        let queue = TestQueue { inner: RefCell::new(vec![]) };
        let event = make_event();
        queue.push(event.clone()).await.unwrap();
        let drained = queue.pop_batch(10).await.unwrap();
        assert_eq!(drained, vec![event]);
        assert_eq!(queue.pop_batch(10).await, Err(QueueError::Closed));
    }

    /// Verify that the `Registry` and `Evaluator` ports compile with minimal
    /// implementations over an injected store handle.
    #[tokio::test]
    async fn registry_and_evaluator_minimal_impl() {
        struct NoopStore;

        impl EventStore for NoopStore {
            async fn song_exists(&self, _song_id: uuid::Uuid) -> Result<bool, StoreError> {
                Ok(true)
            }
            async fn insert_event(&self, event: NewPlayEvent) -> Result<PlayEvent, StoreError> {
                Ok(event.into_event(uuid::Uuid::new_v4()))
            }
            async fn find_duplicate(
                &self,
                _device_id: &str,
                _song_id: uuid::Uuid,
                _timestamp: DateTime<Utc>,
                _window: chrono::Duration,
            ) -> Result<Option<uuid::Uuid>, StoreError> {
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
                _song_id: uuid::Uuid,
                _since: DateTime<Utc>,
            ) -> Result<u64, StoreError> {
                Ok(0)
            }
            async fn last_located_event(
                &self,
                _device_id: &str,
                _since: DateTime<Utc>,
                _exclude: uuid::Uuid,
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
            async fn set_reputation(
                &self,
                _device_id: &str,
                _score: i64,
            ) -> Result<(), StoreError> {
                Ok(())
            }
            async fn play_stats(
                &self,
                _song_id: uuid::Uuid,
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
                    fingerprint_hash: "00".to_owned(),
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
                Ok(Reputation { score: 50, is_verified: false })
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

        struct CleanEvaluator;

        impl Evaluator for CleanEvaluator {
            async fn evaluate<S: EventStore, R: Registry>(
                &self,
                _store: &S,
                _registry: &R,
                _event: &PlayEvent,
            ) -> Result<FraudVerdict, EvalError> {
                Ok(FraudVerdict { flags: vec![], severity: Severity::Low })
            }
        }

        let store = NoopStore;
        let registry = NeutralRegistry;
        let evaluator = CleanEvaluator;

        let descriptor = DeviceDescriptor {
            device_id: "device-1".to_owned(),
            user_id: None,
            phone_model: Some("Pixel 9".to_owned()),
            os_version: None,
            app_version: None,
            hardware_id: None,
        };
        let device = registry.register_or_update(&store, &descriptor).await.unwrap();
        assert_eq!(device.reputation_score, 50);

        let rep = registry.reputation(&store, "device-1").await.unwrap();
        assert_eq!(rep, Reputation { score: 50, is_verified: false });

        let verdict = evaluator.evaluate(&store, &registry, &make_event()).await.unwrap();
        assert!(!verdict.flagged());
        assert_eq!(verdict.severity, Severity::Low);
    }
}
