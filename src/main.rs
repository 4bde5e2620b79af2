//! Soilcast firmware entry point
//!
//! On boot the device:
//! 1. Joins Wi-Fi and waits for SNTP (token expiries are wall-clock based)
//! 2. Provisions itself through DPS, retrying a few times before restarting
//! 3. Runs the node tick forever: keep the hub session alive, publish a
//!    reading every send interval
//!
//! Built for a host, the binary only prints the provisioning token for the
//! compiled-in credential, which is handy for checking a key against the
//! portal.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    use soilcast::provisioning::DPS_API_VERSION;
    use soilcast::token::TOKEN_TTL_SECS;
    use soilcast::{Clock, Config, SystemClock};

    let config = Config::from_build_env()?;
    let credential = config.credential()?;
    let expiry = SystemClock::new().epoch_secs() + TOKEN_TTL_SECS;

    let resource = format!(
        "{}/registrations/{}",
        config.id_scope,
        credential.registration_id()
    );
    let token = credential.sign(&resource, expiry)?;

    println!("host:     {}:{}", config.provisioning_host, config.provisioning_port);
    println!(
        "username: {}/api-version={}",
        resource, DPS_API_VERSION
    );
    println!("password: {}", token);
    Ok(())
}

#[cfg(target_os = "espidf")]
mod device {
    use std::time::Duration;

    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::gpio::IOPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::log::EspLogger;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    use soilcast::backup::BackupSink;
    use soilcast::esp::{self, Dht22, EspMqttTransport, GardenSensors, HttpBackupSink, SoilProbe};
    use soilcast::{
        Assignment, Clock, Config, Inbox, Node, ProvisioningClient, SensorSource, SessionManager,
        SystemClock, Transport,
    };

    /// Provisioning attempts before the chip is restarted
    const PROVISIONING_ATTEMPTS: u32 = 3;

    const PROVISIONING_RETRY_DELAY_MS: u32 = 10_000;

    const SNTP_TIMEOUT: Duration = Duration::from_secs(30);

    /// Main loop period
    const TICK_MS: u32 = 100;

    pub fn run() -> anyhow::Result<()> {
        // Initialize ESP-IDF
        esp_idf_sys::link_patches();
        EspLogger::initialize_default();

        info!("Soilcast v{} starting", env!("CARGO_PKG_VERSION"));

        let config = Config::from_build_env()?;
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let _wifi = esp::wifi::connect(
            peripherals.modem,
            sysloop,
            nvs,
            config.wifi_ssid,
            config.wifi_psk,
        )?;
        let _sntp = esp::wifi::sync_time(SNTP_TIMEOUT)?;

        let clock = SystemClock::new();
        let inbox = Inbox::new();
        let mut transport = EspMqttTransport::new(inbox.clone());

        let assignment = provision(&config, &mut transport, &clock, &inbox)?;

        let dht = Dht22::new(peripherals.pins.gpio15.downgrade())?;
        #[cfg(esp32)]
        let soil = SoilProbe::new(peripherals.adc1, peripherals.pins.gpio34)?;
        #[cfg(not(esp32))]
        let soil = SoilProbe::new(peripherals.adc1, peripherals.pins.gpio4)?;
        let sensors = GardenSensors::new(dht, soil);

        let session = SessionManager::new(transport, clock, config.credential()?, assignment);
        let node = Node::new(
            session,
            sensors,
            config.calibration()?,
            config.send_interval_ms(),
        );

        info!("Entering main loop, reporting every {}s", config.send_interval_secs);
        match config.backup_url {
            Some(url) => tick_forever(node.with_backup(HttpBackupSink::new(url))),
            None => tick_forever(node),
        }
    }

    /// Provisioning with the restart policy applied: a few spaced attempts,
    /// then a chip restart.
    fn provision(
        config: &Config,
        transport: &mut EspMqttTransport,
        clock: &SystemClock,
        inbox: &Inbox,
    ) -> anyhow::Result<Assignment> {
        let credential = config.credential()?;

        for attempt in 1..=PROVISIONING_ATTEMPTS {
            let result = ProvisioningClient::new(
                &mut *transport,
                clock,
                inbox.clone(),
                config.provisioning_settings(),
            )
            .provision(&credential);

            match result {
                Ok(assignment) => return Ok(assignment),
                Err(e) if !e.is_retryable() => {
                    error!("Provisioning cannot succeed with this configuration: {}", e);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Provisioning attempt {}/{} failed: {}",
                        attempt, PROVISIONING_ATTEMPTS, e
                    );
                    clock.delay_ms(PROVISIONING_RETRY_DELAY_MS);
                }
            }
        }

        error!("Provisioning failed, restarting");
        FreeRtos::delay_ms(PROVISIONING_RETRY_DELAY_MS);
        esp_idf_hal::reset::restart();
    }

    fn tick_forever<T, C, S, B>(mut node: Node<T, C, S, B>) -> !
    where
        T: Transport,
        C: Clock,
        S: SensorSource,
        B: BackupSink,
    {
        loop {
            node.tick();
            FreeRtos::delay_ms(TICK_MS);
        }
    }
}
