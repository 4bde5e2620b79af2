//! Static device configuration
//!
//! Values are compiled into the firmware from `SOILCAST_*` environment
//! variables at build time, e.g.
//!
//! ```text
//! SOILCAST_WIFI_SSID=garden SOILCAST_WIFI_PSK=... \
//! SOILCAST_ID_SCOPE=0ne00ABCDEF SOILCAST_REGISTRATION_ID=bed-3 \
//! SOILCAST_DEVICE_KEY=<base64> cargo build --release
//! ```
//!
//! Anything not set falls back to the defaults below.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::provisioning::{ProvisioningSettings, DEFAULT_PROVISIONING_HOST};
use crate::telemetry::SoilCalibration;
use crate::token::Credential;
use crate::transport::MQTTS_PORT;

/// Default seconds between telemetry messages
pub const DEFAULT_SEND_INTERVAL_SECS: u32 = 60;

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub wifi_ssid: &'static str,
    pub wifi_psk: &'static str,
    pub id_scope: &'static str,
    pub registration_id: &'static str,
    /// Base64 device (symmetric) key
    pub device_key: &'static str,
    pub provisioning_host: &'static str,
    pub provisioning_port: u16,
    pub send_interval_secs: u32,
    pub soil_dry_raw: u16,
    pub soil_wet_raw: u16,
    /// Optional HTTP endpoint receiving a copy of every reading
    pub backup_url: Option<&'static str>,
}

impl Config {
    /// Configuration baked in at compile time.
    pub fn from_build_env() -> Result<Self> {
        let config = Self {
            wifi_ssid: option_env!("SOILCAST_WIFI_SSID").unwrap_or(""),
            wifi_psk: option_env!("SOILCAST_WIFI_PSK").unwrap_or(""),
            id_scope: option_env!("SOILCAST_ID_SCOPE").unwrap_or(""),
            registration_id: option_env!("SOILCAST_REGISTRATION_ID").unwrap_or(""),
            device_key: option_env!("SOILCAST_DEVICE_KEY").unwrap_or(""),
            provisioning_host: option_env!("SOILCAST_DPS_HOST")
                .unwrap_or(DEFAULT_PROVISIONING_HOST),
            provisioning_port: parse_or(
                "SOILCAST_DPS_PORT",
                option_env!("SOILCAST_DPS_PORT"),
                MQTTS_PORT,
            )?,
            send_interval_secs: parse_or(
                "SOILCAST_SEND_INTERVAL_SECS",
                option_env!("SOILCAST_SEND_INTERVAL_SECS"),
                DEFAULT_SEND_INTERVAL_SECS,
            )?,
            soil_dry_raw: parse_or(
                "SOILCAST_SOIL_DRY_RAW",
                option_env!("SOILCAST_SOIL_DRY_RAW"),
                SoilCalibration::default().dry_raw(),
            )?,
            soil_wet_raw: parse_or(
                "SOILCAST_SOIL_WET_RAW",
                option_env!("SOILCAST_SOIL_WET_RAW"),
                SoilCalibration::default().wet_raw(),
            )?,
            backup_url: option_env!("SOILCAST_BACKUP_URL").filter(|url| !url.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never provision or report.
    pub fn validate(&self) -> Result<()> {
        if self.id_scope.is_empty() {
            return Err(Error::Configuration("id scope is empty".into()));
        }
        if self.send_interval_secs == 0 {
            return Err(Error::Configuration("send interval must be positive".into()));
        }
        self.credential()?;
        self.calibration()?;
        Ok(())
    }

    pub fn credential(&self) -> Result<Credential> {
        Credential::from_base64(self.device_key, self.registration_id)
    }

    pub fn calibration(&self) -> Result<SoilCalibration> {
        SoilCalibration::new(self.soil_dry_raw, self.soil_wet_raw)
    }

    pub fn provisioning_settings(&self) -> ProvisioningSettings {
        ProvisioningSettings::new(self.id_scope)
            .with_host(self.provisioning_host, self.provisioning_port)
    }

    pub fn send_interval_ms(&self) -> u64 {
        u64::from(self.send_interval_secs) * 1000
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("id_scope", &self.id_scope)
            .field("registration_id", &self.registration_id)
            .field("provisioning_host", &self.provisioning_host)
            .field("provisioning_port", &self.provisioning_port)
            .field("send_interval_secs", &self.send_interval_secs)
            .field("soil_dry_raw", &self.soil_dry_raw)
            .field("soil_wet_raw", &self.soil_wet_raw)
            .field("backup_url", &self.backup_url)
            .finish_non_exhaustive()
    }
}

fn parse_or<T: FromStr>(name: &str, value: Option<&str>, default: T) -> Result<T> {
    match value {
        None | Some("") => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Configuration(format!("{name}={raw:?} is not a valid number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            wifi_ssid: "garden",
            wifi_psk: "hunter22",
            id_scope: "0ne00ABCDEF",
            registration_id: "bed-3",
            device_key: "c2VjcmV0LWtleS1mb3ItdGVzdHM=",
            provisioning_host: DEFAULT_PROVISIONING_HOST,
            provisioning_port: MQTTS_PORT,
            send_interval_secs: 30,
            soil_dry_raw: 3000,
            soil_wet_raw: 1200,
            backup_url: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.send_interval_ms(), 30_000);
        assert_eq!(config.credential().unwrap().registration_id(), "bed-3");

        let settings = config.provisioning_settings();
        assert_eq!(settings.id_scope, "0ne00ABCDEF");
        assert_eq!(settings.port, 8883);
    }

    #[test]
    fn rejects_unusable_values() {
        let bad_key = Config {
            device_key: "***",
            ..sample()
        };
        assert!(matches!(bad_key.validate(), Err(Error::Configuration(_))));

        let inverted = Config {
            soil_wet_raw: 3500,
            ..sample()
        };
        assert!(inverted.validate().is_err());

        let no_scope = Config {
            id_scope: "",
            ..sample()
        };
        assert!(no_scope.validate().is_err());

        let no_interval = Config {
            send_interval_secs: 0,
            ..sample()
        };
        assert!(no_interval.validate().is_err());
    }

    #[test]
    fn debug_output_omits_secrets() {
        let dbg = format!("{:?}", sample());
        assert!(dbg.contains("bed-3"));
        assert!(!dbg.contains("hunter22"));
        assert!(!dbg.contains("c2VjcmV0"));
    }

    #[test]
    fn parse_or_falls_back_on_missing() {
        assert_eq!(parse_or::<u16>("X", None, 7).unwrap(), 7);
        assert_eq!(parse_or::<u16>("X", Some(""), 7).unwrap(), 7);
        assert_eq!(parse_or::<u16>("X", Some(" 42 "), 7).unwrap(), 42);
        assert!(parse_or::<u16>("X", Some("forty"), 7).is_err());
    }
}
