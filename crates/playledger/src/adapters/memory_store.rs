// Rust guideline compliant 2026-08-22

//! In-memory adapter for the `EventStore` port.
//!
//! Intended for proof-of-concept runs and unit tests only. Every query is a
//! linear scan over plain vectors; history windows that a database would
//! answer with an index are answered by filtering here. `StoreError` is part
//! of the port contract but is never returned by this adapter; it is
//! reserved for concrete backends.

use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use domain::{
    Device, EventStore, FraudFlag, LocatedPlay, NewPlayEvent, PlayEvent, PlayStats, StoreError,
};

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

/// Heap storage for the catalog, events, flags and devices.
#[derive(Debug, Default)]
struct MemoryStoreInner {
    songs: HashSet<uuid::Uuid>,
    events: Vec<PlayEvent>,
    flags: Vec<FraudFlag>,
    devices: HashMap<String, Device>,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// `EventStore` adapter backed by in-memory vectors.
// #[allow] not #[expect]: dead_code fires in the playledger_sqlite binary but
// NOT in the playledger binary, so #[expect] would generate an unfulfilled-
// expectation warning in one of the two binaries.
#[allow(
    dead_code,
    reason = "used by the playledger binary; dead in playledger_sqlite"
)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RefCell<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create an empty store with an empty song catalog.
    // See struct-level allow(dead_code) comment above.
    #[allow(
        dead_code,
        reason = "used by the playledger binary; dead in playledger_sqlite"
    )]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one song to the catalog. Idempotent.
    // See struct-level allow(dead_code) comment above.
    #[allow(
        dead_code,
        reason = "used by the playledger binary; dead in playledger_sqlite"
    )]
    pub fn seed_song(&self, song_id: uuid::Uuid) {
        self.inner.borrow_mut().songs.insert(song_id);
    }

    /// Number of stored events.
    ///
    /// Used in tests to assert persistence counts.
    #[cfg(test)]
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.borrow().events.len()
    }

    /// Number of stored fraud flags.
    #[cfg(test)]
    #[must_use]
    pub fn flag_count(&self) -> usize {
        self.inner.borrow().flags.len()
    }
}

impl EventStore for MemoryStore {
    async fn song_exists(&self, song_id: uuid::Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.borrow().songs.contains(&song_id))
    }

    /// Assign a fresh id and append the event.
    async fn insert_event(&self, event: NewPlayEvent) -> Result<PlayEvent, StoreError> {
        let event = event.into_event(uuid::Uuid::new_v4());
        self.inner.borrow_mut().events.push(event.clone());
        Ok(event)
    }

    async fn find_duplicate(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        timestamp: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Option<uuid::Uuid>, StoreError> {
        let inner = self.inner.borrow();
        let hit = inner.events.iter().find(|e| {
            e.device_id.as_deref() == Some(device_id)
                && e.song_id == song_id
                && (e.timestamp - timestamp).abs() <= window
        });
        Ok(hit.map(|e| e.event_id))
    }

    async fn count_device_events(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.borrow();
        let count = inner
            .events
            .iter()
            .filter(|e| e.device_id.as_deref() == Some(device_id) && e.timestamp >= since)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn count_device_song_events(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.borrow();
        let count = inner
            .events
            .iter()
            .filter(|e| {
                e.device_id.as_deref() == Some(device_id)
                    && e.song_id == song_id
                    && e.timestamp >= since
            })
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn last_located_event(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        exclude: uuid::Uuid,
    ) -> Result<Option<LocatedPlay>, StoreError> {
        let inner = self.inner.borrow();
        let best = inner
            .events
            .iter()
            .filter(|e| {
                e.device_id.as_deref() == Some(device_id)
                    && e.event_id != exclude
                    && e.timestamp >= since
                    && e.location.is_some()
            })
            .max_by_key(|e| e.timestamp);
        Ok(best.and_then(|e| {
            e.location.map(|location| LocatedPlay {
                event_id: e.event_id,
                timestamp: e.timestamp,
                location,
            })
        }))
    }

    async fn insert_flag(&self, flag: FraudFlag) -> Result<(), StoreError> {
        self.inner.borrow_mut().flags.push(flag);
        Ok(())
    }

    async fn device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.inner.borrow().devices.get(device_id).cloned())
    }

    /// Insert or fully replace the row keyed by `device.device_id`.
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        self.inner
            .borrow_mut()
            .devices
            .insert(device.device_id.clone(), device);
        Ok(())
    }

    /// No-op for an unknown device, matching the port contract.
    async fn set_reputation(&self, device_id: &str, score: i64) -> Result<(), StoreError> {
        if let Some(device) = self.inner.borrow_mut().devices.get_mut(device_id) {
            device.reputation_score = score;
        }
        Ok(())
    }

    async fn play_stats(
        &self,
        song_id: uuid::Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PlayStats, StoreError> {
        let inner = self.inner.borrow();
        let mut total = 0u64;
        let mut venues = HashSet::new();
        let mut devices = HashSet::new();
        let mut confidence_sum = 0.0_f64;
        let mut confidence_count = 0u32;
        for event in inner
            .events
            .iter()
            .filter(|e| e.song_id == song_id && e.timestamp >= start && e.timestamp <= end)
        {
            total += 1;
            if let Some(venue) = event.venue_id {
                venues.insert(venue);
            }
            if let Some(device) = &event.device_id {
                devices.insert(device.clone());
            }
            if let Some(confidence) = event.confidence_score {
                confidence_sum += confidence;
                confidence_count += 1;
            }
        }
        Ok(PlayStats {
            total_plays: total,
            unique_venues: u64::try_from(venues.len()).unwrap_or(u64::MAX),
            unique_devices: u64::try_from(devices.len()).unwrap_or(u64::MAX),
            // Averaged over measured events only; None when nothing measured.
            avg_confidence: (confidence_count > 0)
                .then(|| confidence_sum / f64::from(confidence_count)),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
