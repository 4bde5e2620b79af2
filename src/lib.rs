//! Soilcast - self-provisioning soil moisture node
//!
//! On boot the node:
//! 1. Registers with the device provisioning service using a SAS token
//!    derived from its device key, and polls until it is assigned a hub
//! 2. Opens an authenticated MQTT session to that hub, renewing the token
//!    before it expires and reconnecting when the session drops
//! 3. Publishes a temperature/humidity/soil reading at a fixed cadence
//!
//! The protocol core is platform independent and driven through the
//! [`Transport`] and [`Clock`] capabilities. ESP-IDF glue lives in `esp` and is
//! only built for the device.

pub mod backup;
pub mod cadence;
pub mod config;
pub mod dht;
pub mod error;
pub mod extract;
pub mod inbox;
pub mod node;
pub mod provisioning;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod transport;

#[cfg(target_os = "espidf")]
pub mod esp;

pub use config::Config;
pub use error::{Error, Result};
pub use inbox::{Inbound, Inbox};
pub use node::{Node, TickOutcome};
pub use provisioning::{Assignment, ProvisioningClient, ProvisioningSettings, ProvisioningState};
pub use session::{SessionManager, SessionState};
pub use telemetry::{PublishResult, Reading, SensorSample, SensorSource, SoilCalibration};
pub use token::{AuthToken, Credential};
pub use transport::{Clock, ConnectOptions, SystemClock, Transport};
