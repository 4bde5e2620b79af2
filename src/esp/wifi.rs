//! Network bring-up: Wi-Fi station and SNTP time sync

use std::time::{Duration, Instant};

use anyhow::anyhow;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::{EspSntp, SyncStatus};
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::info;

/// Join the configured access point and wait for an IP address.
pub fn connect(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    ssid: &str,
    psk: &str,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), Some(nvs))?, sysloop)?;

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("SSID too long"))?,
        password: psk.try_into().map_err(|_| anyhow!("Wi-Fi password too long"))?,
        auth_method: if psk.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("Wi-Fi started, joining {}", ssid);
    wifi.connect()?;
    wifi.wait_netif_up()?;

    let ip = wifi.wifi().sta_netif().get_ip_info()?;
    info!("Wi-Fi up, address {}", ip.ip);

    Ok(wifi)
}

/// Start SNTP and block until wall-clock time is set.
///
/// Token expiries are absolute epoch seconds, so nothing can be signed
/// before this returns.
pub fn sync_time(timeout: Duration) -> anyhow::Result<EspSntp<'static>> {
    let sntp = EspSntp::new_default()?;
    let started = Instant::now();

    while sntp.get_sync_status() != SyncStatus::Completed {
        if started.elapsed() >= timeout {
            anyhow::bail!("SNTP sync did not complete within {:?}", timeout);
        }
        FreeRtos::delay_ms(100);
    }

    info!("Clock synchronized");
    Ok(sntp)
}
