// Rust guideline compliant 2026-08-22

//! Fraud evaluator component for the play ingestion pipeline.
//!
//! [`FraudEvaluator`] implements the `domain::Evaluator` port: a fixed set of
//! independent heuristics run in order against a persisted event, each flag
//! is persisted individually, and the submitting device pays a reputation
//! penalty proportional to the flags produced. Thresholds are policy, not
//! invariants; all of them live in [`FraudConfig`].

use chrono::{DateTime, Utc};
use domain::{
    EvalError, Evaluator, EventStore, FlagType, FraudFlag, FraudVerdict, GeoPoint, PlayEvent,
    Registry, Severity,
};

// ---------------------------------------------------------------------------
// FraudConfig + builder
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`FraudEvaluator`].
///
/// Construct via [`FraudConfig::builder`]. Defaults carry the production
/// policy values; none of them is load-bearing for correctness.
#[derive(Debug)]
pub struct FraudConfig {
    /// Reputation strictly below this raises `low_reputation`.
    pub min_reputation: i64,
    /// Distance strictly above this (km) qualifies a jump as impossible.
    pub jump_distance_km: f64,
    /// Elapsed time strictly below this (minutes) qualifies a jump as
    /// impossible.
    pub jump_window_minutes: f64,
    /// Device-wide event count strictly above this within `hour_window`
    /// raises `excessive_plays`.
    pub device_hourly_cap: u64,
    /// Per-song event count strictly above this within `day_window` raises
    /// `song_spam`.
    pub song_daily_cap: u64,
    /// Confidence strictly below this raises `low_confidence`.
    pub min_confidence: f64,
    /// Reputation points deducted per flag produced in one evaluation pass.
    pub penalty_per_flag: i64,
    /// History window behind the event timestamp for the movement and
    /// excessive-plays checks.
    pub hour_window: chrono::Duration,
    /// History window behind the event timestamp for the song-spam check.
    pub day_window: chrono::Duration,
}

/// Builder for [`FraudConfig`].
///
/// Obtain via [`FraudConfig::builder`]; finalize with [`build`](Self::build).
#[derive(Debug)]
pub struct FraudConfigBuilder {
    min_reputation: i64,
    jump_distance_km: f64,
    jump_window_minutes: f64,
    device_hourly_cap: u64,
    song_daily_cap: u64,
    min_confidence: f64,
    penalty_per_flag: i64,
    hour_window: chrono::Duration,
    day_window: chrono::Duration,
}

impl FraudConfig {
    /// Create a builder preloaded with the production policy:
    /// reputation < 30, jump > 100 km in < 10 min, > 500 plays/hour,
    /// > 200 same-song plays/day, confidence < 60, 5-point penalty per flag.
    #[must_use]
    pub fn builder() -> FraudConfigBuilder {
        FraudConfigBuilder {
            min_reputation: 30,
            jump_distance_km: 100.0,
            jump_window_minutes: 10.0,
            device_hourly_cap: 500,
            song_daily_cap: 200,
            min_confidence: 60.0,
            penalty_per_flag: 5,
            hour_window: chrono::Duration::hours(1),
            day_window: chrono::Duration::hours(24),
        }
    }
}

impl FraudConfigBuilder {
    /// Override the low-reputation threshold.
    #[must_use]
    pub fn min_reputation(mut self, score: i64) -> Self {
        self.min_reputation = score;
        self
    }

    /// Override the impossible-jump distance (km).
    #[must_use]
    pub fn jump_distance_km(mut self, km: f64) -> Self {
        self.jump_distance_km = km;
        self
    }

    /// Override the impossible-jump time window (minutes).
    #[must_use]
    pub fn jump_window_minutes(mut self, minutes: f64) -> Self {
        self.jump_window_minutes = minutes;
        self
    }

    /// Override the device-wide hourly play cap.
    #[must_use]
    pub fn device_hourly_cap(mut self, cap: u64) -> Self {
        self.device_hourly_cap = cap;
        self
    }

    /// Override the per-song daily play cap.
    #[must_use]
    pub fn song_daily_cap(mut self, cap: u64) -> Self {
        self.song_daily_cap = cap;
        self
    }

    /// Override the low-confidence threshold.
    #[must_use]
    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = confidence;
        self
    }

    /// Override the per-flag reputation penalty.
    #[must_use]
    pub fn penalty_per_flag(mut self, points: i64) -> Self {
        self.penalty_per_flag = points;
        self
    }

    /// Override the trailing window for movement and excessive plays.
    #[must_use]
    pub fn hour_window(mut self, window: chrono::Duration) -> Self {
        self.hour_window = window;
        self
    }

    /// Override the trailing window for song spam.
    #[must_use]
    pub fn day_window(mut self, window: chrono::Duration) -> Self {
        self.day_window = window;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::InvalidConfig`] when a threshold is negative,
    /// a window is non-positive, or a bounded value falls outside `[0, 100]`.
    #[must_use = "the Result must be checked; use ? or unwrap"]
    pub fn build(self) -> Result<FraudConfig, EvalError> {
        if !(0..=100).contains(&self.min_reputation) {
            return Err(EvalError::InvalidConfig {
                reason: format!("min_reputation must be in [0, 100], got {}", self.min_reputation),
            });
        }
        if !self.jump_distance_km.is_finite() || self.jump_distance_km <= 0.0 {
            return Err(EvalError::InvalidConfig {
                reason: format!("jump_distance_km must be > 0, got {}", self.jump_distance_km),
            });
        }
        if !self.jump_window_minutes.is_finite() || self.jump_window_minutes <= 0.0 {
            return Err(EvalError::InvalidConfig {
                reason: format!(
                    "jump_window_minutes must be > 0, got {}",
                    self.jump_window_minutes
                ),
            });
        }
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(EvalError::InvalidConfig {
                reason: format!("min_confidence must be in [0, 100], got {}", self.min_confidence),
            });
        }
        if self.penalty_per_flag < 0 {
            return Err(EvalError::InvalidConfig {
                reason: format!("penalty_per_flag must be >= 0, got {}", self.penalty_per_flag),
            });
        }
        if self.hour_window <= chrono::Duration::zero()
            || self.day_window <= chrono::Duration::zero()
        {
            return Err(EvalError::InvalidConfig {
                reason: "trailing windows must be positive".to_owned(),
            });
        }
        Ok(FraudConfig {
            min_reputation: self.min_reputation,
            jump_distance_km: self.jump_distance_km,
            jump_window_minutes: self.jump_window_minutes,
            device_hourly_cap: self.device_hourly_cap,
            song_daily_cap: self.song_daily_cap,
            min_confidence: self.min_confidence,
            penalty_per_flag: self.penalty_per_flag,
            hour_window: self.hour_window,
            day_window: self.day_window,
        })
    }
}

// ---------------------------------------------------------------------------
// Haversine
// ---------------------------------------------------------------------------

/// Great-circle distance between two points in kilometers (spherical Earth,
/// radius 6371 km).
#[must_use]
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let lat_from = from.lat.to_radians();
    let lat_to = to.lat.to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat_from.cos() * lat_to.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond spans of any realistic window fit f64 exactly"
    )]
    let ms = (to - from).num_milliseconds() as f64;
    ms / 60_000.0
}

// ---------------------------------------------------------------------------
// FraudEvaluator
// ---------------------------------------------------------------------------

/// Pipeline component that implements the `domain::Evaluator` port.
///
/// Holds no store or registry reference; both are injected per call.
#[derive(Debug)]
pub struct FraudEvaluator {
    config: FraudConfig,
}

impl FraudEvaluator {
    /// Create a new evaluator from `config`.
    #[must_use]
    pub fn new(config: FraudConfig) -> Self {
        Self { config }
    }
}

impl Evaluator for FraudEvaluator {
    /// Run the checks in order against `event`, persist one row per flag,
    /// then deduct `penalty_per_flag x flags` from the device's reputation
    /// (floored at 0).
    ///
    /// Checks 1-4 read the submitting device's history and are skipped for
    /// events without a device reference; the confidence check always runs.
    /// History windows trail the event's own timestamp, not the wall clock,
    /// so late-arriving batches are judged in event time.
    /// Overall severity starts `Low` and is only ever raised. The penalty is
    /// a read-then-write against the registry with no lock; concurrent
    /// evaluations of the same device can lose updates (last writer wins).
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when a history query, flag insert, or
    /// reputation call fails. Nothing is rolled back on failure; flags
    /// already inserted stay inserted.
    async fn evaluate<S: EventStore, R: Registry>(
        &self,
        store: &S,
        registry: &R,
        event: &PlayEvent,
    ) -> Result<FraudVerdict, EvalError> {
        let mut flags: Vec<FraudFlag> = vec![];
        let mut severity = Severity::Low;

        if let Some(device_id) = event.device_id.as_deref() {
            // 1. Low device reputation.
            let reputation = registry.reputation(store, device_id).await?;
            if reputation.score < self.config.min_reputation {
                flags.push(FraudFlag {
                    device_id: Some(device_id.to_owned()),
                    event_id: event.event_id,
                    flag_type: FlagType::LowReputation,
                    severity: Severity::High,
                    description: format!("Device reputation score is {}", reputation.score),
                });
                severity = severity.max(Severity::High);
            }

            // 2. Impossible geographic movement. Only the most recent prior
            // located event in the trailing window is consulted.
            if let Some(here) = event.location {
                let since = event.timestamp - self.config.hour_window;
                if let Some(prior) =
                    store.last_located_event(device_id, since, event.event_id).await?
                {
                    let distance_km = haversine_km(prior.location, here);
                    let minutes = elapsed_minutes(prior.timestamp, event.timestamp);
                    if distance_km > self.config.jump_distance_km
                        && minutes < self.config.jump_window_minutes
                    {
                        flags.push(FraudFlag {
                            device_id: Some(device_id.to_owned()),
                            event_id: event.event_id,
                            flag_type: FlagType::ImpossibleMovement,
                            severity: Severity::High,
                            description: format!(
                                "Device moved {distance_km:.2}km in {minutes:.2} minutes"
                            ),
                        });
                        severity = severity.max(Severity::High);
                    }
                }
            }

            // 3. Excessive plays across all songs. The current event is
            // already persisted, so it counts itself.
            let since = event.timestamp - self.config.hour_window;
            let device_plays = store.count_device_events(device_id, since).await?;
            if device_plays > self.config.device_hourly_cap {
                flags.push(FraudFlag {
                    device_id: Some(device_id.to_owned()),
                    event_id: event.event_id,
                    flag_type: FlagType::ExcessivePlays,
                    severity: Severity::Medium,
                    description: format!(
                        "Device reported {device_plays} plays in the last hour"
                    ),
                });
                severity = severity.max(Severity::Medium);
            }

            // 4. Same-song spam.
            let since = event.timestamp - self.config.day_window;
            let song_plays =
                store.count_device_song_events(device_id, event.song_id, since).await?;
            if song_plays > self.config.song_daily_cap {
                flags.push(FraudFlag {
                    device_id: Some(device_id.to_owned()),
                    event_id: event.event_id,
                    flag_type: FlagType::SongSpam,
                    severity: Severity::Medium,
                    description: format!(
                        "Same song played {song_plays} times in 24 hours"
                    ),
                });
                severity = severity.max(Severity::Medium);
            }
        }

        // 5. Low match confidence. Absent means "not measured" and never
        // flags; a measured zero does. This check never escalates severity.
        if let Some(confidence) = event.confidence_score
            && confidence < self.config.min_confidence
        {
            flags.push(FraudFlag {
                device_id: event.device_id.clone(),
                event_id: event.event_id,
                flag_type: FlagType::LowConfidence,
                severity: Severity::Low,
                description: format!("Low confidence score: {confidence}"),
            });
        }

        if !flags.is_empty() {
            for flag in &flags {
                store.insert_flag(flag.clone()).await?;
            }

            if let Some(device_id) = event.device_id.as_deref() {
                // Fresh read: the score may have moved since the reputation
                // check. Still a read-then-write; concurrent penalties can
                // interleave. Reputation is advisory, not a ledger.
                let reputation = registry.reputation(store, device_id).await?;
                let flag_count = i64::try_from(flags.len()).unwrap_or(i64::MAX);
                let penalty = self.config.penalty_per_flag * flag_count;
                let new_score = (reputation.score - penalty).max(0);
                registry.set_reputation(store, device_id, new_score).await?;
                tracing::info!(
                    "fraud.reputation.penalized: device_id={device_id} flags={} score={new_score}",
                    flags.len()
                );
            }

            tracing::warn!(
                "fraud.event.flagged: event_id={} flags={} severity={severity}",
                event.event_id,
                flags.len()
            );
        } else {
            tracing::debug!("fraud.event.clean: event_id={}", event.event_id);
        }

        Ok(FraudVerdict { flags, severity })
    }
}
