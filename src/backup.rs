//! Secondary HTTP sink for readings
//!
//! Each reported reading can also be POSTed as `{Temperature, Humidity, Soil}`
//! to an HTTP endpoint (typically a spreadsheet script that appends a
//! timestamped row). The endpoint is opaque to us; failures only get logged.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::telemetry::Reading;

/// Somewhere to POST a JSON body.
pub trait BackupSink {
    fn post(&mut self, body: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackupRecord {
    #[serde(rename = "Temperature")]
    pub temperature: f32,
    #[serde(rename = "Humidity")]
    pub humidity: f32,
    #[serde(rename = "Soil")]
    pub soil: f32,
}

impl BackupRecord {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Protocol(format!("encode backup record: {e}")))
    }
}

impl From<&Reading> for BackupRecord {
    fn from(reading: &Reading) -> Self {
        Self {
            temperature: reading.temperature,
            humidity: reading.humidity,
            soil: reading.soil_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_body_matches_sheet_columns() {
        let reading = Reading {
            temperature: 19.5,
            humidity: 61.0,
            soil_percent: 12.5,
            soil_raw: 2775,
            timestamp: 1_700_000_000,
        };
        let body = BackupRecord::from(&reading).to_json().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"Temperature":19.5,"Humidity":61.0,"Soil":12.5}"#
        );
    }
}
