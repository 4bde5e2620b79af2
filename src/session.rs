//! Authenticated hub session
//!
//! [`SessionManager::ensure_connected`] is meant to be called on every tick.
//! It keeps the session alive, notices when the hub drops it, renews the
//! token before it expires and paces reconnect attempts.

use log::{debug, info, warn};

use crate::error::Result;
use crate::provisioning::Assignment;
use crate::token::{Credential, TOKEN_TTL_SECS};
use crate::transport::{Clock, ConnectOptions, Transport, MQTTS_PORT};

/// Hub API version, part of the MQTT username
pub const HUB_API_VERSION: &str = "2021-04-12";

/// Minimum pause after a failed connect before the next attempt
pub const RECONNECT_BACKOFF_MS: u64 = 2_000;

/// Reconnect with a fresh token once the current one is this close to expiry
pub const RENEWAL_MARGIN_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

pub struct SessionManager<T, C> {
    transport: T,
    clock: C,
    credential: Credential,
    assignment: Assignment,
    port: u16,
    state: SessionState,
    token_expiry: u64,
    events_topic: Option<String>,
    retry_at_ms: Option<u64>,
}

impl<T, C> SessionManager<T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(transport: T, clock: C, credential: Credential, assignment: Assignment) -> Self {
        Self {
            transport,
            clock,
            credential,
            assignment,
            port: MQTTS_PORT,
            state: SessionState::Disconnected,
            token_expiry: 0,
            events_topic: None,
            retry_at_ms: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Expiry of the token the current session was opened with
    pub fn token_expiry(&self) -> u64 {
        self.token_expiry
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns whether the session is usable after this call.
    pub fn ensure_connected(&mut self) -> bool {
        if self.state == SessionState::Connected {
            self.transport.service();

            if !self.transport.is_connected() {
                warn!("Session to {} lost", self.assignment.hub);
                self.state = SessionState::Disconnected;
            } else if self.token_needs_renewal() {
                info!("Token expires at {}, renewing session", self.token_expiry);
                self.transport.disconnect();
                self.state = SessionState::Disconnected;
            } else {
                return true;
            }
        }

        let now_ms = self.clock.monotonic_ms();
        if let Some(retry_at) = self.retry_at_ms {
            if now_ms < retry_at {
                return false;
            }
        }

        match self.connect() {
            Ok(()) => {
                info!(
                    "Connected to {} as {}",
                    self.assignment.hub, self.assignment.device_id
                );
                self.state = SessionState::Connected;
                self.retry_at_ms = None;
                true
            }
            Err(e) => {
                warn!(
                    "Connect to {} failed, retrying in {}ms: {}",
                    self.assignment.hub, RECONNECT_BACKOFF_MS, e
                );
                self.retry_at_ms = Some(now_ms + RECONNECT_BACKOFF_MS);
                false
            }
        }
    }

    /// Publish capability, only while connected.
    pub fn ready(&mut self) -> Option<ReadySession<'_, T>> {
        if self.state != SessionState::Connected {
            return None;
        }
        let topic = self.events_topic.as_deref()?;
        Some(ReadySession {
            transport: &mut self.transport,
            topic,
        })
    }

    /// Device-to-cloud channel, known after the first successful connect
    pub fn events_topic(&self) -> Option<&str> {
        self.events_topic.as_deref()
    }

    fn token_needs_renewal(&self) -> bool {
        self.clock.epoch_secs() + RENEWAL_MARGIN_SECS >= self.token_expiry
    }

    fn connect(&mut self) -> Result<()> {
        let Assignment { hub, device_id } = &self.assignment;

        let resource = format!("{hub}/devices/{device_id}");
        let token = self
            .credential
            .sign(&resource, self.clock.epoch_secs() + TOKEN_TTL_SECS)?;
        let username = format!("{hub}/{device_id}/?api-version={HUB_API_VERSION}");

        debug!("Opening session to {} (token expires {})", hub, token.expiry());
        self.transport.connect(&ConnectOptions {
            host: hub,
            port: self.port,
            client_id: device_id,
            username: &username,
            password: token.as_str(),
        })?;

        self.token_expiry = token.expiry();
        if self.events_topic.is_none() {
            self.events_topic = Some(format!("devices/{device_id}/messages/events/"));
        }
        Ok(())
    }
}

/// Borrowed handle to a connected session.
pub struct ReadySession<'s, T> {
    transport: &'s mut T,
    topic: &'s str,
}

impl<T: Transport> ReadySession<'_, T> {
    pub fn topic(&self) -> &str {
        self.topic
    }

    pub fn publish(&mut self, payload: &[u8]) -> Result<()> {
        self.transport.publish(self.topic, payload)
    }
}
