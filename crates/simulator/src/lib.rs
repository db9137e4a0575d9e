// Rust guideline compliant 2026-08-22

//! Traffic simulator component -- generates synthetic play submissions from a
//! fixed pool of devices and songs, with tunable ratios of anomalous traffic
//! (duplicates, low-confidence plays, impossible hops, hot-song bursts).
//!
//! Entry points: [`TrafficSimulator::next_batch`],
//! [`TrafficSimulator::next_single`]. Configuration via
//! [`SimulatorConfig::builder`].
//!
//! The simulator only produces submissions; callers are expected to seed the
//! song catalog from [`TrafficSimulator::songs`] before feeding its traffic
//! into an ingestion pipeline.

use chrono::Utc;
use domain::{BatchPlayItem, BatchSubmission, GeoPoint, PlaySource, PlaySubmission};
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};
use std::cell::RefCell;

// ---------------------------------------------------------------------------
// SimulatorError
// ---------------------------------------------------------------------------

/// Errors that can occur while configuring the simulator.
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// The supplied configuration is invalid.
    #[error("invalid simulator configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// SimulatorConfig + builder
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`TrafficSimulator`].
///
/// Construct via [`SimulatorConfig::builder`].
#[derive(Debug)]
pub struct SimulatorConfig {
    /// Maximum number of plays per batch (range `[1, batch_max]`).
    pub batch_max: usize,
    /// Number of simulated devices.
    pub device_count: usize,
    /// Number of songs in the simulated catalog.
    pub song_count: usize,
    /// Chance that a batch item resubmits the previous item unchanged.
    pub duplicate_ratio: f64,
    /// Chance that a play carries a confidence score below 60.
    pub low_confidence_ratio: f64,
    /// Chance that a play is located far outside its device's home area.
    pub jump_ratio: f64,
    /// Chance that a batch repeats one hot song across all its items.
    pub burst_ratio: f64,
    /// Optional RNG seed for reproducible traffic. `None` seeds from the OS.
    pub seed: Option<u64>,
}

/// Builder for [`SimulatorConfig`].
///
/// Obtain via [`SimulatorConfig::builder`]; finalize with [`build`](Self::build).
#[derive(Debug)]
pub struct SimulatorConfigBuilder {
    batch_max: usize,
    device_count: usize,
    song_count: usize,
    duplicate_ratio: f64,
    low_confidence_ratio: f64,
    jump_ratio: f64,
    burst_ratio: f64,
    seed: Option<u64>,
}

impl SimulatorConfig {
    /// Create a builder. `batch_max` is the only required parameter.
    ///
    /// Default values: `device_count = 4`, `song_count = 12`,
    /// `duplicate_ratio = 0.15`, `low_confidence_ratio = 0.2`,
    /// `jump_ratio = 0.1`, `burst_ratio = 0.1`, `seed = None`.
    #[must_use]
    pub fn builder(batch_max: usize) -> SimulatorConfigBuilder {
        SimulatorConfigBuilder {
            batch_max,
            device_count: 4,
            song_count: 12,
            duplicate_ratio: 0.15,
            low_confidence_ratio: 0.2,
            jump_ratio: 0.1,
            burst_ratio: 0.1,
            seed: None,
        }
    }
}

impl SimulatorConfigBuilder {
    /// Override the number of simulated devices.
    #[must_use]
    pub fn device_count(mut self, n: usize) -> Self {
        self.device_count = n;
        self
    }

    /// Override the simulated catalog size.
    #[must_use]
    pub fn song_count(mut self, n: usize) -> Self {
        self.song_count = n;
        self
    }

    /// Override the duplicate-injection ratio.
    #[must_use]
    pub fn duplicate_ratio(mut self, ratio: f64) -> Self {
        self.duplicate_ratio = ratio;
        self
    }

    /// Override the low-confidence-injection ratio.
    #[must_use]
    pub fn low_confidence_ratio(mut self, ratio: f64) -> Self {
        self.low_confidence_ratio = ratio;
        self
    }

    /// Override the impossible-hop-injection ratio.
    #[must_use]
    pub fn jump_ratio(mut self, ratio: f64) -> Self {
        self.jump_ratio = ratio;
        self
    }

    /// Override the hot-song-burst ratio.
    #[must_use]
    pub fn burst_ratio(mut self, ratio: f64) -> Self {
        self.burst_ratio = ratio;
        self
    }

    /// Fix the RNG seed for deterministic traffic (useful in tests).
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::InvalidConfig`] when a count is zero or a
    /// ratio lies outside `[0, 1]`.
    #[must_use = "the Result must be checked; use ? or unwrap"]
    pub fn build(self) -> Result<SimulatorConfig, SimulatorError> {
        if self.batch_max == 0 {
            return Err(SimulatorError::InvalidConfig {
                reason: "batch_max must be >= 1".to_owned(),
            });
        }
        if self.device_count == 0 {
            return Err(SimulatorError::InvalidConfig {
                reason: "device_count must be >= 1".to_owned(),
            });
        }
        if self.song_count == 0 {
            return Err(SimulatorError::InvalidConfig {
                reason: "song_count must be >= 1".to_owned(),
            });
        }
        for (name, ratio) in [
            ("duplicate_ratio", self.duplicate_ratio),
            ("low_confidence_ratio", self.low_confidence_ratio),
            ("jump_ratio", self.jump_ratio),
            ("burst_ratio", self.burst_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(SimulatorError::InvalidConfig {
                    reason: format!("{name} must be in [0, 1], got {ratio}"),
                });
            }
        }
        Ok(SimulatorConfig {
            batch_max: self.batch_max,
            device_count: self.device_count,
            song_count: self.song_count,
            duplicate_ratio: self.duplicate_ratio,
            low_confidence_ratio: self.low_confidence_ratio,
            jump_ratio: self.jump_ratio,
            burst_ratio: self.burst_ratio,
            seed: self.seed,
        })
    }
}

// ---------------------------------------------------------------------------
// TrafficSimulator
// ---------------------------------------------------------------------------

/// Handset pool used for synthetic device profiles.
///
/// 5 entries -- index always derived from `random_range(0..len)`, never panics.
const HANDSETS: &[(&str, &str)] = &[
    ("Pixel 9", "Android 15"),
    ("iPhone 16", "iOS 18.4"),
    ("Galaxy S25", "Android 15"),
    ("Xperia 1 VI", "Android 14"),
    ("Nothing Phone 3", "Android 15"),
];

/// App versions in circulation.
const APP_VERSIONS: &[&str] = &["3.1.4", "3.2.0", "3.2.1"];

/// Home areas the simulated devices play from.
const CITY_CENTERS: &[GeoPoint] = &[
    GeoPoint {
        lat: 48.8566,
        lng: 2.3522,
    },
    GeoPoint {
        lat: 51.5074,
        lng: -0.1278,
    },
    GeoPoint {
        lat: 40.7128,
        lng: -74.0060,
    },
    GeoPoint {
        lat: 35.6762,
        lng: 139.6503,
    },
];

/// Sources an interactive submission can carry.
const INTERACTIVE_SOURCES: &[PlaySource] = &[
    PlaySource::Manual,
    PlaySource::DjController,
    PlaySource::Radio,
    PlaySource::Streaming,
];

/// One simulated device: stable identity, handset metadata, home area.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Stable device identifier, unique within the simulator.
    pub device_id: String,
    /// Reported handset model.
    pub phone_model: String,
    /// Reported OS version.
    pub os_version: String,
    /// Reported app version.
    pub app_version: String,
    /// Center of the area this device normally plays from.
    pub home: GeoPoint,
}

/// Generates synthetic play traffic from a fixed device and song pool.
#[derive(Debug)]
pub struct TrafficSimulator {
    config: SimulatorConfig,
    /// Interior mutability required because all public methods take `&self`.
    rng: RefCell<StdRng>,
    devices: Vec<DeviceProfile>,
    songs: Vec<uuid::Uuid>,
}

impl TrafficSimulator {
    /// Create a new simulator from `config`, generating the device pool and
    /// song catalog up front.
    ///
    /// Seeds the RNG from `config.seed` if set, otherwise from the OS.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        // Catalog ids come from the same RNG so a seed fixes them too.
        let songs = (0..config.song_count)
            .map(|_| {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                uuid::Builder::from_random_bytes(bytes).into_uuid()
            })
            .collect();

        let devices = (0..config.device_count)
            .map(|i| {
                let (phone_model, os_version) = HANDSETS[rng.random_range(0..HANDSETS.len())];
                DeviceProfile {
                    device_id: format!("sim-device-{i:03}"),
                    phone_model: phone_model.to_owned(),
                    os_version: os_version.to_owned(),
                    app_version: APP_VERSIONS[rng.random_range(0..APP_VERSIONS.len())]
                        .to_owned(),
                    home: CITY_CENTERS[rng.random_range(0..CITY_CENTERS.len())],
                }
            })
            .collect();

        Self {
            config,
            rng: RefCell::new(rng),
            devices,
            songs,
        }
    }

    /// The simulated song catalog. Seed these ids into the store before
    /// ingesting simulator traffic.
    #[must_use]
    pub fn songs(&self) -> &[uuid::Uuid] {
        &self.songs
    }

    /// The simulated device pool.
    #[must_use]
    pub fn devices(&self) -> &[DeviceProfile] {
        &self.devices
    }

    /// Generate one batch submission from a random device.
    ///
    /// Batch size is uniformly distributed in `[1, config.batch_max]`. Per
    /// the configured ratios, a batch may keep every item on one hot song,
    /// and each item may resubmit the previous item unchanged, carry a low
    /// confidence score, or be located far outside the device's home area.
    #[must_use]
    pub fn next_batch(&self) -> BatchSubmission {
        let mut rng = self.rng.borrow_mut();
        let device = &self.devices[rng.random_range(0..self.devices.len())];
        let size = rng.random_range(1..=self.config.batch_max);
        let burst_song = rng
            .random_bool(self.config.burst_ratio)
            .then(|| self.songs[rng.random_range(0..self.songs.len())]);
        let now = Utc::now();

        let mut plays: Vec<BatchPlayItem> = Vec::with_capacity(size);
        for i in 0..size {
            if rng.random_bool(self.config.duplicate_ratio)
                && let Some(prev) = plays.last().cloned()
            {
                // Exact resubmission of the previous item, timestamp included.
                plays.push(prev);
                continue;
            }

            let song_id = burst_song
                .unwrap_or_else(|| self.songs[rng.random_range(0..self.songs.len())]);
            let confidence = if rng.random_bool(self.config.low_confidence_ratio) {
                rng.random_range(20.0..60.0)
            } else {
                rng.random_range(60.0..100.0)
            };
            let location = if rng.random_bool(self.config.jump_ratio) {
                distant_from(device.home)
            } else {
                near(device.home, &mut rng)
            };
            // Items age backwards from now. Spacing never drops below 35 s
            // even after jitter, so only injected duplicates land in the
            // dedup window.
            let age_s = i64::try_from(size - i).unwrap_or_default() * 40 + rng.random_range(0..=5);

            plays.push(BatchPlayItem {
                song_id: Some(song_id),
                timestamp: Some(now - chrono::Duration::seconds(age_s)),
                source: None,
                confidence: Some(confidence),
                venue_id: None,
                location: Some(location),
                metadata: None,
            });
        }

        tracing::debug!(
            "simulator.batch.generated: device_id={} size={}",
            device.device_id,
            plays.len()
        );
        BatchSubmission {
            device_id: device.device_id.clone(),
            phone_model: Some(device.phone_model.clone()),
            os_version: Some(device.os_version.clone()),
            app_version: Some(device.app_version.clone()),
            plays,
        }
    }

    /// Generate one interactive play submission from a random device.
    ///
    /// The timestamp is left absent so the pipeline stamps it at receipt.
    #[must_use]
    pub fn next_single(&self) -> PlaySubmission {
        let mut rng = self.rng.borrow_mut();
        let device = &self.devices[rng.random_range(0..self.devices.len())];
        let song_id = self.songs[rng.random_range(0..self.songs.len())];
        let source = INTERACTIVE_SOURCES[rng.random_range(0..INTERACTIVE_SOURCES.len())];
        let location = near(device.home, &mut rng);

        PlaySubmission {
            song_id,
            device_id: Some(device.device_id.clone()),
            venue_id: None,
            timestamp: None,
            source,
            confidence_score: Some(rng.random_range(60.0..100.0)),
            duration_played: Some(rng.random_range(30..=240)),
            location: Some(location),
            metadata: None,
        }
    }
}

/// A point within a couple of kilometers of `home`.
fn near(home: GeoPoint, rng: &mut StdRng) -> GeoPoint {
    GeoPoint {
        lat: home.lat + rng.random_range(-0.02..=0.02),
        lng: home.lng + rng.random_range(-0.02..=0.02),
    }
}

/// A point roughly 300 km from `home`, far outside any plausible travel
/// radius for the movement heuristic.
fn distant_from(home: GeoPoint) -> GeoPoint {
    GeoPoint {
        lat: home.lat + 2.0,
        lng: home.lng + 2.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::{SimulatorConfig, SimulatorError, TrafficSimulator};
    use domain::GeoPoint;

    fn simulator(seed: u64) -> TrafficSimulator {
        let config = SimulatorConfig::builder(8).seed(seed).build().unwrap();
        TrafficSimulator::new(config)
    }

    // ------------------------------------------------------------------
    // Config validation
    // ------------------------------------------------------------------

    #[test]
    fn config_rejects_zero_batch() {
        let result = SimulatorConfig::builder(0).build();
        assert!(matches!(result, Err(SimulatorError::InvalidConfig { .. })));
    }

    #[test]
    fn config_rejects_out_of_range_ratio() {
        let result = SimulatorConfig::builder(8).duplicate_ratio(1.5).build();
        assert!(matches!(result, Err(SimulatorError::InvalidConfig { .. })));
    }

    #[test]
    fn config_rejects_empty_catalog() {
        let result = SimulatorConfig::builder(8).song_count(0).build();
        assert!(matches!(result, Err(SimulatorError::InvalidConfig { .. })));
    }

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    #[test]
    fn pools_have_configured_sizes() {
        let config = SimulatorConfig::builder(8)
            .device_count(7)
            .song_count(23)
            .seed(3)
            .build()
            .unwrap();
        let sim = TrafficSimulator::new(config);
        assert_eq!(sim.devices().len(), 7);
        assert_eq!(sim.songs().len(), 23);
    }

    #[test]
    fn device_ids_are_stable_and_unique() {
        let sim = simulator(4);
        let ids: Vec<&str> = sim.devices().iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, ["sim-device-000", "sim-device-001", "sim-device-002", "sim-device-003"]);
    }

    // ------------------------------------------------------------------
    // Batch generation
    // ------------------------------------------------------------------

    #[test]
    fn batch_size_bounds() {
        // Seed-fixed simulator; generate 100 batches, verify all sizes in
        // [1, 8] and that every value in [1, 8] appears at least once.
        let sim = simulator(1);
        let mut seen = [false; 9]; // index 1..=8
        for _ in 0..100 {
            let batch = sim.next_batch();
            let sz = batch.plays.len();
            assert!((1..=8).contains(&sz), "batch size {sz} out of [1, 8]");
            seen[sz] = true;
        }
        for (size, was_seen) in seen.iter().enumerate().skip(1) {
            assert!(*was_seen, "size {size} never appeared in 100 batches");
        }
    }

    #[test]
    fn batch_items_reference_catalog() {
        let sim = simulator(2);
        for _ in 0..20 {
            let batch = sim.next_batch();
            assert!(!batch.device_id.is_empty());
            assert!(batch.phone_model.is_some());
            for item in &batch.plays {
                let song = item.song_id.expect("every item carries a song id");
                assert!(sim.songs().contains(&song), "song not in catalog");
                assert!(item.timestamp.is_some());
                let confidence = item.confidence.expect("every item carries confidence");
                assert!((20.0..100.0).contains(&confidence));
                assert!(item.location.is_some());
            }
        }
    }

    #[test]
    fn seeded_rng_deterministic() {
        // Timestamps are wall-clock and differ between the two runs; every
        // RNG-driven field must match.
        let batch1 = simulator(99).next_batch();
        let batch2 = simulator(99).next_batch();
        assert_eq!(batch1.device_id, batch2.device_id);
        assert_eq!(batch1.plays.len(), batch2.plays.len());
        for (item1, item2) in batch1.plays.iter().zip(&batch2.plays) {
            assert_eq!(item1.song_id, item2.song_id);
            assert_eq!(item1.confidence, item2.confidence);
            assert_eq!(item1.location, item2.location);
        }
    }

    #[test]
    fn duplicate_ratio_one_repeats_items() {
        let config = SimulatorConfig::builder(6)
            .duplicate_ratio(1.0)
            .jump_ratio(0.0)
            .seed(5)
            .build()
            .unwrap();
        let sim = TrafficSimulator::new(config);
        for _ in 0..20 {
            let batch = sim.next_batch();
            for item in &batch.plays {
                assert_eq!(
                    *item, batch.plays[0],
                    "with ratio 1.0 every item repeats the first"
                );
            }
        }
    }

    #[test]
    fn jump_ratio_controls_distance_from_home() {
        let home_of = |sim: &TrafficSimulator, device_id: &str| -> GeoPoint {
            sim.devices()
                .iter()
                .find(|d| d.device_id == device_id)
                .expect("batch device comes from the pool")
                .home
        };

        let grounded = TrafficSimulator::new(
            SimulatorConfig::builder(8)
                .jump_ratio(0.0)
                .duplicate_ratio(0.0)
                .seed(6)
                .build()
                .unwrap(),
        );
        for _ in 0..10 {
            let batch = grounded.next_batch();
            let home = home_of(&grounded, &batch.device_id);
            for item in &batch.plays {
                let location = item.location.expect("every item is located");
                assert!((location.lat - home.lat).abs() < 0.05, "stayed near home");
                assert!((location.lng - home.lng).abs() < 0.05, "stayed near home");
            }
        }

        let jumpy = TrafficSimulator::new(
            SimulatorConfig::builder(8)
                .jump_ratio(1.0)
                .duplicate_ratio(0.0)
                .seed(6)
                .build()
                .unwrap(),
        );
        for _ in 0..10 {
            let batch = jumpy.next_batch();
            let home = home_of(&jumpy, &batch.device_id);
            for item in &batch.plays {
                let location = item.location.expect("every item is located");
                assert!(
                    (location.lat - home.lat).abs() > 1.9,
                    "every play far from home"
                );
            }
        }
    }

    #[test]
    fn burst_ratio_one_repeats_one_song_outside_dedup_window() {
        let config = SimulatorConfig::builder(8)
            .burst_ratio(1.0)
            .duplicate_ratio(0.0)
            .seed(9)
            .build()
            .unwrap();
        let sim = TrafficSimulator::new(config);
        for _ in 0..10 {
            let batch = sim.next_batch();
            let first = batch.plays[0].song_id.expect("every item carries a song id");
            assert!(sim.songs().contains(&first), "burst song not in catalog");
            for pair in batch.plays.windows(2) {
                assert_eq!(pair[1].song_id, Some(first), "burst repeats one song");
                let gap = pair[1].timestamp.expect("every item is stamped")
                    - pair[0].timestamp.expect("every item is stamped");
                assert!(
                    gap > chrono::Duration::seconds(30),
                    "burst items must not collide with the dedup window"
                );
            }
        }
    }

    #[test]
    fn low_confidence_ratio_one_stays_below_threshold() {
        let config = SimulatorConfig::builder(8)
            .low_confidence_ratio(1.0)
            .duplicate_ratio(0.0)
            .seed(7)
            .build()
            .unwrap();
        let sim = TrafficSimulator::new(config);
        for _ in 0..10 {
            for item in &sim.next_batch().plays {
                let confidence = item.confidence.expect("every item carries confidence");
                assert!(confidence < 60.0, "confidence {confidence} not low");
            }
        }
    }

    // ------------------------------------------------------------------
    // Single submissions
    // ------------------------------------------------------------------

    #[test]
    fn single_submission_fields_valid() {
        let sim = simulator(8);
        let known_devices: Vec<&str> =
            sim.devices().iter().map(|d| d.device_id.as_str()).collect();
        for _ in 0..20 {
            let play = sim.next_single();
            assert!(sim.songs().contains(&play.song_id));
            let device_id = play.device_id.as_deref().expect("device always set");
            assert!(known_devices.contains(&device_id));
            assert!(play.timestamp.is_none(), "server stamps interactive plays");
            let confidence = play.confidence_score.expect("confidence always set");
            assert!((60.0..100.0).contains(&confidence));
            let duration = play.duration_played.expect("duration always set");
            assert!((30..=240).contains(&duration));
            assert!(play.location.is_some());
        }
    }
}
