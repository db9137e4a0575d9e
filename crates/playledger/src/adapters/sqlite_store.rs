// Rust guideline compliant 2026-08-22

//! SQLite adapter for the `EventStore` port.
//!
//! Persists songs, devices, play events and fraud flags to a SQLite file via
//! `sqlx`. Proves that the hexagonal `EventStore` port is truly swappable
//! without touching domain or component crates.
//!
//! # Column mapping
//!
//! UUIDs are stored as their canonical TEXT form and timestamps as INTEGER
//! unix milliseconds, so every history window becomes a plain integer range
//! scan. A location is a nullable `lat`/`lng` REAL pair (both present or
//! both NULL); metadata is serialized JSON in a nullable TEXT column.
//!
//! # Dedup contract
//!
//! `find_duplicate` is a read; the pipeline's check-then-insert is not
//! atomic. Two interleaved submissions can both pass the check and both
//! persist. Duplicate filtering is best-effort, not a uniqueness constraint.

use chrono::{DateTime, Utc};
use sqlx::Row as _;

use domain::{
    Device, EventStore, FraudFlag, LocatedPlay, NewPlayEvent, PlayEvent, PlayStats, StoreError,
};

/// `EventStore` adapter backed by a SQLite database file via `sqlx`.
///
/// Connects to (or creates) a SQLite file and ensures the schema exists.
/// Device rows are written with `INSERT OR REPLACE`, which matches the
/// upsert contract of the port.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite database and initialize the schema.
    ///
    /// Passes `create_if_missing(true)` so the database file is created on
    /// first run without manual setup. All tables are created via
    /// `CREATE TABLE IF NOT EXISTS`, making repeated calls safe.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` when the connection or schema creation fails.
    pub async fn new(db_url: &str) -> Result<Self, sqlx::Error> {
        // create_if_missing: sqlx 0.8 defaults to false for file databases;
        // enable explicitly so the demo works out of the box on first run.
        let opts = db_url
            .parse::<sqlx::sqlite::SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(opts).await?;

        // The catalog is managed upstream; this table only answers
        // existence checks.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS songs (
                song_id TEXT PRIMARY KEY
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS devices (
                device_id        TEXT    PRIMARY KEY,
                user_id          TEXT,
                phone_model      TEXT,
                os_version       TEXT,
                app_version      TEXT,
                hardware_id      TEXT,
                fingerprint_hash TEXT    NOT NULL,
                reputation_score INTEGER NOT NULL,
                is_verified      INTEGER NOT NULL DEFAULT 0,
                last_seen        INTEGER NOT NULL   -- unix milliseconds
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS play_events (
                event_id         TEXT    PRIMARY KEY,
                song_id          TEXT    NOT NULL,
                venue_id         TEXT,
                device_id        TEXT,
                timestamp        INTEGER NOT NULL,  -- unix milliseconds
                source           TEXT    NOT NULL,
                confidence_score REAL,
                duration_played  INTEGER,
                lat              REAL,              -- NULL with lng when unlocated
                lng              REAL,
                metadata         TEXT               -- JSON, NULL when absent
            )",
        )
        .execute(&pool)
        .await?;
        // Every fraud heuristic queries per-device history windows.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_play_events_device_time
             ON play_events (device_id, timestamp)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fraud_flags (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id   TEXT,
                event_id    TEXT    NOT NULL,
                flag_type   TEXT    NOT NULL,
                severity    TEXT    NOT NULL,
                description TEXT    NOT NULL,
                created_at  INTEGER NOT NULL   -- unix milliseconds
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Add one song to the catalog. Idempotent (`INSERT OR IGNORE`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the insert fails.
    pub async fn seed_song(&self, song_id: uuid::Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO songs (song_id) VALUES (?)")
            .bind(song_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

/// Map a query-level failure. The underlying error is logged at `error`
/// level before mapping, so callers only see the port error.
fn query_err(e: sqlx::Error) -> StoreError {
    tracing::error!("sqlite.query: {e}");
    StoreError::Unavailable {
        reason: e.to_string(),
    }
}

/// Map a row-decode failure.
fn decode_err(e: sqlx::Error) -> StoreError {
    StoreError::Malformed {
        reason: e.to_string(),
    }
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, StoreError> {
    s.parse().map_err(|_| StoreError::Malformed {
        reason: format!("invalid uuid: {s}"),
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Malformed {
        reason: format!("timestamp out of range: {ms}"),
    })
}

fn device_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Device, StoreError> {
    let user_id = row
        .try_get::<Option<String>, _>("user_id")
        .map_err(decode_err)?
        .map(|s| parse_uuid(&s))
        .transpose()?;
    Ok(Device {
        device_id: row.try_get("device_id").map_err(decode_err)?,
        user_id,
        phone_model: row.try_get("phone_model").map_err(decode_err)?,
        os_version: row.try_get("os_version").map_err(decode_err)?,
        app_version: row.try_get("app_version").map_err(decode_err)?,
        hardware_id: row.try_get("hardware_id").map_err(decode_err)?,
        fingerprint_hash: row.try_get("fingerprint_hash").map_err(decode_err)?,
        reputation_score: row.try_get("reputation_score").map_err(decode_err)?,
        is_verified: row.try_get::<i64, _>("is_verified").map_err(decode_err)? != 0,
        last_seen: from_millis(row.try_get("last_seen").map_err(decode_err)?)?,
    })
}

impl EventStore for SqliteStore {
    async fn song_exists(&self, song_id: uuid::Uuid) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM songs WHERE song_id = ?")
            .bind(song_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(count > 0)
    }

    /// Persist the event with a fresh server-side id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on any `sqlx` error and
    /// [`StoreError::Malformed`] when the metadata cannot be serialized.
    async fn insert_event(&self, event: NewPlayEvent) -> Result<PlayEvent, StoreError> {
        let event_id = uuid::Uuid::new_v4();
        let metadata_json = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Malformed {
                reason: format!("metadata not serializable: {e}"),
            })?;
        sqlx::query(
            "INSERT INTO play_events
             (event_id, song_id, venue_id, device_id, timestamp, source,
              confidence_score, duration_played, lat, lng, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event_id.to_string())
        .bind(event.song_id.to_string())
        .bind(event.venue_id.map(|v| v.to_string()))
        .bind(event.device_id.clone())
        .bind(event.timestamp.timestamp_millis())
        .bind(event.source.as_str())
        .bind(event.confidence_score)
        .bind(event.duration_played)
        .bind(event.location.map(|g| g.lat))
        .bind(event.location.map(|g| g.lng))
        .bind(metadata_json)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(event.into_event(event_id))
    }

    async fn find_duplicate(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        timestamp: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Option<uuid::Uuid>, StoreError> {
        let lower = (timestamp - window).timestamp_millis();
        let upper = (timestamp + window).timestamp_millis();
        let found: Option<String> = sqlx::query_scalar(
            "SELECT event_id FROM play_events
             WHERE device_id = ? AND song_id = ? AND timestamp BETWEEN ? AND ?
             LIMIT 1",
        )
        .bind(device_id)
        .bind(song_id.to_string())
        .bind(lower)
        .bind(upper)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;
        found.as_deref().map(parse_uuid).transpose()
    }

    async fn count_device_events(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM play_events WHERE device_id = ? AND timestamp >= ?",
        )
        .bind(device_id)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn count_device_song_events(
        &self,
        device_id: &str,
        song_id: uuid::Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM play_events
             WHERE device_id = ? AND song_id = ? AND timestamp >= ?",
        )
        .bind(device_id)
        .bind(song_id.to_string())
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn last_located_event(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
        exclude: uuid::Uuid,
    ) -> Result<Option<LocatedPlay>, StoreError> {
        let row = sqlx::query(
            "SELECT event_id, timestamp, lat, lng FROM play_events
             WHERE device_id = ? AND timestamp >= ? AND event_id <> ?
               AND lat IS NOT NULL AND lng IS NOT NULL
             ORDER BY timestamp DESC
             LIMIT 1",
        )
        .bind(device_id)
        .bind(since.timestamp_millis())
        .bind(exclude.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let event_id: String = row.try_get("event_id").map_err(decode_err)?;
        Ok(Some(LocatedPlay {
            event_id: parse_uuid(&event_id)?,
            timestamp: from_millis(row.try_get("timestamp").map_err(decode_err)?)?,
            location: domain::GeoPoint {
                lat: row.try_get("lat").map_err(decode_err)?,
                lng: row.try_get("lng").map_err(decode_err)?,
            },
        }))
    }

    async fn insert_flag(&self, flag: FraudFlag) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO fraud_flags
             (device_id, event_id, flag_type, severity, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(flag.device_id)
        .bind(flag.event_id.to_string())
        .bind(flag.flag_type.as_str())
        .bind(flag.severity.as_str())
        .bind(flag.description)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn device(&self, device_id: &str) -> Result<Option<Device>, StoreError> {
        let row = sqlx::query(
            "SELECT device_id, user_id, phone_model, os_version, app_version,
                    hardware_id, fingerprint_hash, reputation_score, is_verified,
                    last_seen
             FROM devices WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;
        row.as_ref().map(device_from_row).transpose()
    }

    /// Insert or fully replace a device row (`INSERT OR REPLACE`).
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO devices
             (device_id, user_id, phone_model, os_version, app_version,
              hardware_id, fingerprint_hash, reputation_score, is_verified,
              last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(device.device_id)
        .bind(device.user_id.map(|u| u.to_string()))
        .bind(device.phone_model)
        .bind(device.os_version)
        .bind(device.app_version)
        .bind(device.hardware_id)
        .bind(device.fingerprint_hash)
        .bind(device.reputation_score)
        .bind(i64::from(device.is_verified))
        .bind(device.last_seen.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    /// Updates zero rows for an unknown device, matching the port contract.
    async fn set_reputation(&self, device_id: &str, score: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE devices SET reputation_score = ? WHERE device_id = ?")
            .bind(score)
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn play_stats(
        &self,
        song_id: uuid::Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PlayStats, StoreError> {
        // COUNT(DISTINCT ...) and AVG both ignore NULL, so unlocated or
        // unmeasured events never skew the aggregates.
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(DISTINCT venue_id) AS venues,
                    COUNT(DISTINCT device_id) AS devices,
                    AVG(confidence_score) AS avg_conf
             FROM play_events
             WHERE song_id = ? AND timestamp BETWEEN ? AND ?",
        )
        .bind(song_id.to_string())
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        let total: i64 = row.try_get("total").map_err(decode_err)?;
        let venues: i64 = row.try_get("venues").map_err(decode_err)?;
        let devices: i64 = row.try_get("devices").map_err(decode_err)?;
        Ok(PlayStats {
            total_plays: u64::try_from(total).unwrap_or(0),
            unique_venues: u64::try_from(venues).unwrap_or(0),
            unique_devices: u64::try_from(devices).unwrap_or(0),
            avg_confidence: row.try_get("avg_conf").map_err(decode_err)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
