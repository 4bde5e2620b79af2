//! Capabilities the protocol core needs from the platform
//!
//! The MQTT packet codec, TLS socket and wall clock live outside the core.
//! On the device they are provided by ESP-IDF (see `crate::esp`); tests use
//! scripted fakes.

use crate::error::Result;

/// Standard MQTT-over-TLS port used by both the provisioning service and hubs
pub const MQTTS_PORT: u16 = 8883;

/// Parameters for one authenticated connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions<'a> {
    pub host: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl core::fmt::Debug for ConnectOptions<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A pub/sub connection. Received messages are pushed into the
/// [`Inbox`](crate::inbox::Inbox) the transport was created with.
pub trait Transport {
    /// Open a new session, replacing any existing one.
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<()>;

    fn subscribe(&mut self, topic: &str) -> Result<()>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Run one step of the receive path / keep-alive processing.
    fn service(&mut self);

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);
}

/// Time source.
pub trait Clock {
    /// Wall-clock time, epoch seconds. Only meaningful once time is synced.
    fn epoch_secs(&self) -> u64;

    /// Milliseconds on a monotonic timer, used for timeouts and cadence.
    fn monotonic_ms(&self) -> u64;

    fn delay_ms(&self, ms: u32);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn epoch_secs(&self) -> u64 {
        (**self).epoch_secs()
    }

    fn monotonic_ms(&self) -> u64 {
        (**self).monotonic_ms()
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Host clock backed by `std::time`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn monotonic_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_debug_omits_password() {
        let opts = ConnectOptions {
            host: "hub.example.net",
            port: MQTTS_PORT,
            client_id: "dev-1",
            username: "hub.example.net/dev-1/?api-version=2021-04-12",
            password: "SharedAccessSignature sr=secret",
        };
        let dbg = format!("{opts:?}");
        assert!(dbg.contains("hub.example.net"));
        assert!(!dbg.contains("SharedAccessSignature"));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        clock.delay_ms(2);
        assert!(clock.monotonic_ms() >= a + 2);
        assert!(clock.epoch_secs() > 1_600_000_000);
    }
}
