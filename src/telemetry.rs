//! Readings and the telemetry publisher

use log::{debug, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::session::ReadySession;
use crate::transport::Transport;

/// Linear soil probe calibration: `wet_raw` reads 100%, `dry_raw` reads 0%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoilCalibration {
    dry_raw: u16,
    wet_raw: u16,
}

impl SoilCalibration {
    pub fn new(dry_raw: u16, wet_raw: u16) -> Result<Self> {
        if wet_raw >= dry_raw {
            return Err(Error::Configuration(format!(
                "soil calibration needs wet ({wet_raw}) < dry ({dry_raw})"
            )));
        }
        Ok(Self { dry_raw, wet_raw })
    }

    pub fn dry_raw(&self) -> u16 {
        self.dry_raw
    }

    pub fn wet_raw(&self) -> u16 {
        self.wet_raw
    }

    /// Moisture percent for a raw probe value, always within `[0, 100]`.
    pub fn percent(&self, raw: u16) -> f32 {
        let clamped = raw.clamp(self.wet_raw, self.dry_raw);
        let span = f32::from(self.dry_raw - self.wet_raw);
        100.0 * f32::from(self.dry_raw - clamped) / span
    }
}

impl Default for SoilCalibration {
    fn default() -> Self {
        Self {
            dry_raw: 3000,
            wet_raw: 1200,
        }
    }
}

/// Raw values from the sensors. A failed temperature/humidity read is NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_raw: u16,
}

/// Source of calibrated temperature/humidity and raw soil values.
pub trait SensorSource {
    /// A failed temperature/humidity read is reported as NaN in the sample;
    /// `Err` means nothing usable could be read at all.
    fn sample(&mut self) -> Result<SensorSample>;
}

/// One telemetry record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_percent: f32,
    pub soil_raw: u16,
    /// Epoch seconds
    pub timestamp: u64,
}

impl Reading {
    pub fn from_sample(sample: SensorSample, calibration: &SoilCalibration, timestamp: u64) -> Self {
        Self {
            temperature: sample.temperature,
            humidity: sample.humidity,
            soil_percent: calibration.percent(sample.soil_raw),
            soil_raw: sample.soil_raw,
            timestamp,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() {
            return Err(Error::Validation("temperature is not a number"));
        }
        if !self.humidity.is_finite() {
            return Err(Error::Validation("humidity is not a number"));
        }
        Ok(())
    }

    /// Wire payload: `{"Temperature":..,"Humidity":..,"Soil":..,"ts":..}`
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let payload = TelemetryPayload {
            temperature: self.temperature,
            humidity: self.humidity,
            soil: self.soil_percent,
            ts: self.timestamp,
        };
        serde_json::to_vec(&payload).map_err(|e| Error::Protocol(format!("encode telemetry: {e}")))
    }
}

#[derive(Serialize)]
struct TelemetryPayload {
    #[serde(rename = "Temperature")]
    temperature: f32,
    #[serde(rename = "Humidity")]
    humidity: f32,
    #[serde(rename = "Soil")]
    soil: f32,
    ts: u64,
}

/// Outcome of one publish cycle. None of these are fatal.
#[derive(Debug)]
pub enum PublishResult {
    Published { bytes: usize },
    /// Reading was invalid; nothing was sent
    Skipped(Error),
    /// No connected session this cycle
    NotReady,
    /// The transport rejected the publish
    Failed(Error),
}

impl PublishResult {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Running totals, for status output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u32,
    pub skipped: u32,
    pub not_ready: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
pub struct TelemetryPublisher {
    stats: PublishStats,
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Validate and publish `reading` over `session`.
    pub fn maybe_publish<T: Transport>(
        &mut self,
        session: Option<ReadySession<'_, T>>,
        reading: &Reading,
    ) -> PublishResult {
        let result = Self::publish(session, reading);
        match &result {
            PublishResult::Published { bytes } => {
                debug!("Published {} bytes (ts {})", bytes, reading.timestamp);
                self.stats.published += 1;
            }
            PublishResult::Skipped(e) => {
                warn!("Skipping publish: {}", e);
                self.stats.skipped += 1;
            }
            PublishResult::NotReady => {
                debug!("Session not ready, reading dropped");
                self.stats.not_ready += 1;
            }
            PublishResult::Failed(e) => {
                warn!("Publish failed: {}", e);
                self.stats.failed += 1;
            }
        }
        result
    }

    fn publish<T: Transport>(session: Option<ReadySession<'_, T>>, reading: &Reading) -> PublishResult {
        if let Err(e) = reading.validate() {
            return PublishResult::Skipped(e);
        }
        let Some(mut session) = session else {
            return PublishResult::NotReady;
        };
        let payload = match reading.to_payload() {
            Ok(payload) => payload,
            Err(e) => return PublishResult::Failed(e),
        };
        match session.publish(&payload) {
            Ok(()) => PublishResult::Published {
                bytes: payload.len(),
            },
            Err(e) => PublishResult::Failed(e),
        }
    }
}
