//! The tick driven by the main loop
//!
//! Every tick keeps the hub session alive. When the send interval is due
//! the sensors are sampled, the reading is published, and a copy goes to the
//! backup sink if one is configured.

use log::{debug, info, warn};

use crate::backup::{BackupRecord, BackupSink};
use crate::cadence::Cadence;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use crate::telemetry::{
    PublishResult, PublishStats, Reading, SensorSource, SoilCalibration, TelemetryPublisher,
};
use crate::transport::{Clock, Transport};

/// Type-level default for nodes without a backup endpoint.
///
/// `Node::new` leaves the sink unset, so `post` is never called.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackup;

impl BackupSink for NoBackup {
    fn post(&mut self, _body: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing due this tick
    Idle { online: bool, next_in_ms: u64 },
    /// Sampling failed outright; nothing was sent
    SampleFailed(Error),
    /// A reading was taken
    Reported {
        reading: Reading,
        publish: PublishResult,
        /// `None` when no backup was attempted
        backup: Option<Result<()>>,
    },
}

pub struct Node<T, C, S, B = NoBackup> {
    session: SessionManager<T, C>,
    publisher: TelemetryPublisher,
    sensors: S,
    backup: Option<B>,
    cadence: Cadence,
    calibration: SoilCalibration,
}

impl<T, C, S> Node<T, C, S, NoBackup>
where
    T: Transport,
    C: Clock,
    S: SensorSource,
{
    pub fn new(
        session: SessionManager<T, C>,
        sensors: S,
        calibration: SoilCalibration,
        send_interval_ms: u64,
    ) -> Self {
        Self {
            session,
            publisher: TelemetryPublisher::new(),
            sensors,
            backup: None,
            cadence: Cadence::new(send_interval_ms),
            calibration,
        }
    }
}

impl<T, C, S, B> Node<T, C, S, B>
where
    T: Transport,
    C: Clock,
    S: SensorSource,
    B: BackupSink,
{
    pub fn with_backup<B2: BackupSink>(self, backup: B2) -> Node<T, C, S, B2> {
        Node {
            session: self.session,
            publisher: self.publisher,
            sensors: self.sensors,
            backup: Some(backup),
            cadence: self.cadence,
            calibration: self.calibration,
        }
    }

    pub fn session(&self) -> &SessionManager<T, C> {
        &self.session
    }

    pub fn stats(&self) -> PublishStats {
        self.publisher.stats()
    }

    pub fn tick(&mut self) -> TickOutcome {
        let online = self.session.ensure_connected();

        let now_ms = self.session.clock().monotonic_ms();
        if let Err(next_in_ms) = self.cadence.gate(now_ms) {
            return TickOutcome::Idle { online, next_in_ms };
        }

        let sample = match self.sensors.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Sampling failed: {}", e);
                return TickOutcome::SampleFailed(e);
            }
        };
        let reading = Reading::from_sample(
            sample,
            &self.calibration,
            self.session.clock().epoch_secs(),
        );
        info!(
            "Reading: {:.1}C {:.1}% soil {:.1}% (raw {})",
            reading.temperature, reading.humidity, reading.soil_percent, reading.soil_raw
        );

        let publish = self.publisher.maybe_publish(self.session.ready(), &reading);

        let backup = match (&mut self.backup, reading.validate()) {
            (Some(sink), Ok(())) => {
                let result = BackupRecord::from(&reading)
                    .to_json()
                    .and_then(|body| sink.post(&body));
                match &result {
                    Ok(()) => debug!("Backup record posted"),
                    Err(e) => warn!("Backup post failed: {}", e),
                }
                Some(result)
            }
            _ => None,
        };

        TickOutcome::Reported {
            reading,
            publish,
            backup,
        }
    }
}
