// Rust guideline compliant 2026-08-22

//! Device registry component for the play ingestion pipeline.
//!
//! [`DeviceRegistry`] implements the `domain::Registry` port: upsert keyed by
//! `device_id`, fingerprint derivation on first sight, neutral-default
//! reputation reads, and clamped reputation writes. Configuration via
//! [`RegistryConfig::builder`].

use chrono::Utc;
use domain::{Device, DeviceDescriptor, EventStore, Registry, RegistryError, Reputation};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// RegistryConfig + builder
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`DeviceRegistry`].
///
/// Construct via [`RegistryConfig::builder`].
#[derive(Debug)]
pub struct RegistryConfig {
    /// Secret mixed into every fingerprint hash so the hash cannot be
    /// recomputed from public device attributes alone.
    pub fingerprint_salt: String,
    /// Score assigned to devices on first sight and reported for unknown
    /// devices (range: `[0, 100]`).
    pub default_reputation: i64,
}

/// Builder for [`RegistryConfig`].
///
/// Obtain via [`RegistryConfig::builder`]; finalize with [`build`](Self::build).
#[derive(Debug)]
pub struct RegistryConfigBuilder {
    fingerprint_salt: String,
    default_reputation: i64,
}

impl RegistryConfig {
    /// Create a builder. The fingerprint salt is the only required parameter.
    ///
    /// Default values: `default_reputation = 50`.
    #[must_use]
    pub fn builder(fingerprint_salt: String) -> RegistryConfigBuilder {
        RegistryConfigBuilder {
            fingerprint_salt,
            // Neutral midpoint: unseen devices are neither trusted nor suspect.
            default_reputation: 50,
        }
    }
}

impl RegistryConfigBuilder {
    /// Override the score given to first-seen and unknown devices.
    #[must_use]
    pub fn default_reputation(mut self, score: i64) -> Self {
        self.default_reputation = score;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the salt is empty or
    /// `default_reputation` falls outside `[0, 100]`.
    #[must_use = "the Result must be checked; use ? or unwrap"]
    pub fn build(self) -> Result<RegistryConfig, RegistryError> {
        if self.fingerprint_salt.is_empty() {
            return Err(RegistryError::InvalidConfig {
                reason: "fingerprint_salt must not be empty".to_owned(),
            });
        }
        if !(0..=100).contains(&self.default_reputation) {
            return Err(RegistryError::InvalidConfig {
                reason: format!(
                    "default_reputation must be in [0, 100], got {}",
                    self.default_reputation
                ),
            });
        }
        Ok(RegistryConfig {
            fingerprint_salt: self.fingerprint_salt,
            default_reputation: self.default_reputation,
        })
    }
}

// ---------------------------------------------------------------------------
// DeviceRegistry
// ---------------------------------------------------------------------------

/// Pipeline component that implements the `domain::Registry` port.
///
/// Holds no store reference; the store handle is injected per call so one
/// registry instance serves any adapter.
#[derive(Debug)]
pub struct DeviceRegistry {
    config: RegistryConfig,
}

impl DeviceRegistry {
    /// Create a new registry from `config`.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self { config }
    }

    /// Salted SHA-256 over the identity/hardware tuple, hex-encoded.
    ///
    /// Absent descriptor fields hash as empty strings so a device that later
    /// starts reporting them keeps its first-sight fingerprint.
    fn fingerprint(&self, descriptor: &DeviceDescriptor) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.fingerprint_salt.as_bytes());
        hasher.update(descriptor.device_id.as_bytes());
        hasher.update(b"-");
        hasher.update(descriptor.phone_model.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"-");
        hasher.update(descriptor.os_version.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"-");
        hasher.update(descriptor.hardware_id.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Registry for DeviceRegistry {
    /// Upsert the device described by `descriptor`.
    ///
    /// First sight inserts the full descriptor with a derived fingerprint,
    /// the configured default reputation, and `is_verified = false`. Repeat
    /// sight overwrites only the descriptor fields that were reported
    /// (`Some`) and bumps `last_seen`; fingerprint, hardware id, reputation,
    /// and verification are never touched after first sight.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the lookup or write fails.
    async fn register_or_update<S: EventStore>(
        &self,
        store: &S,
        descriptor: &DeviceDescriptor,
    ) -> Result<Device, RegistryError> {
        let now = Utc::now();
        let device = match store.device(&descriptor.device_id).await? {
            Some(existing) => {
                let updated = Device {
                    device_id: existing.device_id,
                    user_id: descriptor.user_id.or(existing.user_id),
                    phone_model: descriptor.phone_model.clone().or(existing.phone_model),
                    os_version: descriptor.os_version.clone().or(existing.os_version),
                    app_version: descriptor.app_version.clone().or(existing.app_version),
                    hardware_id: existing.hardware_id,
                    fingerprint_hash: existing.fingerprint_hash,
                    reputation_score: existing.reputation_score,
                    is_verified: existing.is_verified,
                    last_seen: now,
                };
                tracing::debug!(
                    "registry.device.refreshed: device_id={}",
                    updated.device_id
                );
                updated
            }
            None => {
                let created = Device {
                    device_id: descriptor.device_id.clone(),
                    user_id: descriptor.user_id,
                    phone_model: descriptor.phone_model.clone(),
                    os_version: descriptor.os_version.clone(),
                    app_version: descriptor.app_version.clone(),
                    hardware_id: descriptor.hardware_id.clone(),
                    fingerprint_hash: self.fingerprint(descriptor),
                    reputation_score: self.config.default_reputation,
                    is_verified: false,
                    last_seen: now,
                };
                tracing::info!(
                    "registry.device.registered: device_id={} reputation={}",
                    created.device_id,
                    created.reputation_score
                );
                created
            }
        };
        store.upsert_device(device.clone()).await?;
        Ok(device)
    }

    /// Reputation snapshot; unknown devices report `{default, false}`.
    ///
    /// Unknown ids are common (a first submission racing its own device
    /// registration), so absence is neutral data, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the lookup fails.
    async fn reputation<S: EventStore>(
        &self,
        store: &S,
        device_id: &str,
    ) -> Result<Reputation, RegistryError> {
        let snapshot = store.device(device_id).await?.map_or(
            Reputation {
                score: self.config.default_reputation,
                is_verified: false,
            },
            |device| Reputation {
                score: device.reputation_score,
                is_verified: device.is_verified,
            },
        );
        Ok(snapshot)
    }

    /// Clamp `score` to `[0, 100]` and persist it as the absolute reputation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] when the write fails.
    async fn set_reputation<S: EventStore>(
        &self,
        store: &S,
        device_id: &str,
        score: i64,
    ) -> Result<(), RegistryError> {
        let clamped = score.clamp(0, 100);
        store.set_reputation(device_id, clamped).await?;
        tracing::debug!("registry.reputation.set: device_id={device_id} score={clamped}");
        Ok(())
    }
}
