//! ESP-IDF implementations of the node's platform capabilities

pub mod http;
pub mod mqtt;
pub mod sensors;
pub mod wifi;

pub use http::HttpBackupSink;
pub use mqtt::EspMqttTransport;
pub use sensors::{Dht22, GardenSensors, SoilProbe};
