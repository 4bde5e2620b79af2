//! Sensor drivers: DHT22 temperature/humidity and a resistive soil probe
//!
//! The DHT22 is read by bit-banging its single-wire protocol on an
//! open-drain pin and timing each pulse against the ESP timer. Reads are
//! occasionally corrupted by task preemption; a failed read is reported as
//! NaN and the reading is skipped for that cycle.

use esp_idf_hal::adc::attenuation::DB_11;
use esp_idf_hal::adc::oneshot::config::AdcChannelConfig;
use esp_idf_hal::adc::oneshot::{AdcChannelDriver, AdcDriver};
use esp_idf_hal::adc::ADCPin;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pull};
use esp_idf_hal::peripheral::Peripheral;
use log::warn;

use crate::dht::{decode_frame, FRAME_LEN};
use crate::error::{Error, Result};
use crate::telemetry::{SensorSample, SensorSource};

/// A '1' bit holds the line high for ~70us, a '0' bit for ~27us
const ONE_BIT_THRESHOLD_US: i64 = 40;

/// Upper bound for any single pulse
const PULSE_TIMEOUT_US: i64 = 120;

pub struct Dht22<'d> {
    pin: PinDriver<'d, AnyIOPin, InputOutput>,
}

impl<'d> Dht22<'d> {
    /// Configures the pin as open drain with the internal pull-up
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        Ok(Self { pin })
    }

    /// Returns `(temperature_c, humidity_pct)`
    pub fn read(&mut self) -> anyhow::Result<(f32, f32)> {
        // Start signal: hold low for >1ms, then release
        self.pin.set_low()?;
        FreeRtos::delay_ms(2);
        self.pin.set_high()?;

        // Sensor acknowledges with 80us low, 80us high
        self.wait_while(true)?;
        self.wait_while(false)?;
        self.wait_while(true)?;

        let mut data = [0u8; FRAME_LEN];
        for i in 0..40 {
            self.wait_while(false)?;
            let high_us = self.wait_while(true)?;
            data[i / 8] <<= 1;
            if high_us > ONE_BIT_THRESHOLD_US {
                data[i / 8] |= 1;
            }
        }

        Ok(decode_frame(&data)?)
    }

    /// Busy-wait while the line is at `high`, returning the time spent.
    fn wait_while(&self, high: bool) -> anyhow::Result<i64> {
        let start = micros();
        while self.pin.is_high() == high {
            if micros() - start > PULSE_TIMEOUT_US {
                anyhow::bail!("DHT22 timed out");
            }
        }
        Ok(micros() - start)
    }
}

/// Resistive soil probe on a one-shot ADC channel.
pub struct SoilProbe<'d, P: ADCPin> {
    channel: AdcChannelDriver<'d, P, AdcDriver<'d, P::Adc>>,
}

impl<'d, P: ADCPin> SoilProbe<'d, P> {
    pub fn new(
        adc: impl Peripheral<P = P::Adc> + 'd,
        pin: impl Peripheral<P = P> + 'd,
    ) -> anyhow::Result<Self> {
        let driver = AdcDriver::new(adc)?;
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(driver, pin, &config)?;

        Ok(Self { channel })
    }

    pub fn read_raw(&mut self) -> anyhow::Result<u16> {
        Ok(self.channel.read_raw()?)
    }
}

/// The garden node's sensor set.
pub struct GardenSensors<'d, P: ADCPin> {
    dht: Dht22<'d>,
    soil: SoilProbe<'d, P>,
}

impl<'d, P: ADCPin> GardenSensors<'d, P> {
    pub fn new(dht: Dht22<'d>, soil: SoilProbe<'d, P>) -> Self {
        Self { dht, soil }
    }
}

impl<P: ADCPin> SensorSource for GardenSensors<'_, P> {
    fn sample(&mut self) -> Result<SensorSample> {
        let (temperature, humidity) = self.dht.read().unwrap_or_else(|e| {
            warn!("DHT22 read failed: {}", e);
            (f32::NAN, f32::NAN)
        });
        let soil_raw = self.soil.read_raw().map_err(|e| {
            warn!("Soil probe read failed: {}", e);
            Error::Validation("soil probe read failed")
        })?;

        Ok(SensorSample {
            temperature,
            humidity,
            soil_raw,
        })
    }
}

/// Microseconds since boot
fn micros() -> i64 {
    unsafe { esp_idf_sys::esp_timer_get_time() }
}

