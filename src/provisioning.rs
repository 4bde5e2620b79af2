//! Device provisioning handshake
//!
//! Assignment to a hub is asynchronous on the service side, so the device
//! registers and then polls the operation until it settles:
//!
//! ```text
//! Idle -> Registering --202--> Assigning(operationId) --200 "assigned"--> Assigned
//!              |                     |  (200 other status / 202: poll again)
//!              +--200--> Assigned    +--timeout / attempts exhausted--> Failed
//!              +--other / timeout--> Failed
//! ```
//!
//! Every wait is bounded and keeps servicing the transport, otherwise the
//! reply would never be observed. Replies are matched to the outstanding
//! request by the `$rid` echoed in the reply topic; stale replies are dropped.
//!
//! Failure is returned to the caller. Whether to retry, back off or restart
//! the chip is the caller's policy.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::extract::{request_id_from_topic, status_from_topic, ResponseParser, SubstringExtractor};
use crate::inbox::Inbox;
use crate::token::{Credential, TOKEN_TTL_SECS};
use crate::transport::{Clock, ConnectOptions, Transport, MQTTS_PORT};

/// Global provisioning endpoint
pub const DEFAULT_PROVISIONING_HOST: &str = "global.azure-devices-provisioning.net";

/// Provisioning API version, part of the MQTT username
pub const DPS_API_VERSION: &str = "2019-03-31";

const RESPONSE_TOPIC_FILTER: &str = "$dps/registrations/res/#";

/// Where a hub assignment lands once provisioning succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Hub host name, e.g. `my-hub.azure-devices.net`
    pub hub: String,
    /// Device id confirmed by the service
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    Registering,
    Assigning { operation_id: String },
    Assigned(Assignment),
    Failed,
}

/// Endpoint and bounds for the handshake.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub host: String,
    pub port: u16,
    pub id_scope: String,
    /// Wait for the reply to the registration request
    pub register_timeout_ms: u64,
    /// Wait for the reply to each status poll
    pub poll_timeout_ms: u64,
    pub poll_attempts: u32,
    /// Pause before each status poll
    pub poll_backoff_ms: u32,
    /// Pause between transport service calls while waiting
    pub wait_step_ms: u32,
}

impl ProvisioningSettings {
    pub fn new(id_scope: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_PROVISIONING_HOST.to_string(),
            port: MQTTS_PORT,
            id_scope: id_scope.into(),
            register_timeout_ms: 20_000,
            poll_timeout_ms: 5_000,
            poll_attempts: 20,
            poll_backoff_ms: 1_500,
            wait_step_ms: 10,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
}

/// A reply correlated to the outstanding request.
struct Reply {
    status: u16,
    body: String,
}

/// Drives one provisioning handshake over a borrowed transport.
pub struct ProvisioningClient<'a, T, C, P = SubstringExtractor> {
    transport: &'a mut T,
    clock: &'a C,
    inbox: Inbox,
    parser: P,
    settings: ProvisioningSettings,
    state: ProvisioningState,
    next_request_id: u32,
}

impl<'a, T, C> ProvisioningClient<'a, T, C, SubstringExtractor>
where
    T: Transport,
    C: Clock,
{
    /// `inbox` must be the one `transport` delivers into.
    pub fn new(
        transport: &'a mut T,
        clock: &'a C,
        inbox: Inbox,
        settings: ProvisioningSettings,
    ) -> Self {
        Self::with_parser(transport, clock, inbox, settings, SubstringExtractor)
    }
}

impl<'a, T, C, P> ProvisioningClient<'a, T, C, P>
where
    T: Transport,
    C: Clock,
    P: ResponseParser,
{
    pub fn with_parser(
        transport: &'a mut T,
        clock: &'a C,
        inbox: Inbox,
        settings: ProvisioningSettings,
        parser: P,
    ) -> Self {
        Self {
            transport,
            clock,
            inbox,
            parser,
            settings,
            state: ProvisioningState::Idle,
            next_request_id: 1,
        }
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    /// Run the handshake to completion.
    ///
    /// The provisioning connection is closed on every exit path.
    pub fn provision(&mut self, credential: &Credential) -> Result<Assignment> {
        let result = self.run(credential);
        self.transport.disconnect();

        match &result {
            Ok(assignment) => {
                info!(
                    "Provisioned as {} on {}",
                    assignment.device_id, assignment.hub
                );
                self.state = ProvisioningState::Assigned(assignment.clone());
            }
            Err(e) => {
                warn!("Provisioning failed: {}", e);
                self.state = ProvisioningState::Failed;
            }
        }

        result
    }

    fn run(&mut self, credential: &Credential) -> Result<Assignment> {
        self.state = ProvisioningState::Registering;
        let request_id = self.register(credential)?;

        let reply = self.await_reply(
            request_id,
            self.settings.register_timeout_ms,
            "registration reply",
        )?;

        match reply.status {
            202 => {
                let operation_id = self
                    .parser
                    .field(&reply.body, "operationId")
                    .ok_or_else(|| Error::Protocol("accepted reply has no operationId".into()))?;
                info!("Registration accepted, operation {}", operation_id);
                self.state = ProvisioningState::Assigning {
                    operation_id: operation_id.clone(),
                };
                self.poll(&operation_id)
            }
            200 => self.assignment_from(&reply.body),
            status => Err(Error::UnexpectedStatus {
                stage: "registration",
                status,
            }),
        }
    }

    /// Connect, subscribe to replies and publish the registration request.
    fn register(&mut self, credential: &Credential) -> Result<u32> {
        let scope = self.settings.id_scope.as_str();
        let registration_id = credential.registration_id();

        let resource = format!("{scope}/registrations/{registration_id}");
        let token = credential.sign(&resource, self.clock.epoch_secs() + TOKEN_TTL_SECS)?;
        let username = format!("{scope}/registrations/{registration_id}/api-version={DPS_API_VERSION}");

        info!(
            "Registering {} with {}:{}",
            registration_id, self.settings.host, self.settings.port
        );

        self.inbox.clear();
        self.transport.connect(&ConnectOptions {
            host: &self.settings.host,
            port: self.settings.port,
            client_id: registration_id,
            username: &username,
            password: token.as_str(),
        })?;
        self.transport.subscribe(RESPONSE_TOPIC_FILTER)?;

        let request_id = self.take_request_id();
        let topic = format!("$dps/registrations/PUT/iotdps-register/?$rid={request_id}");
        let body = serde_json::json!({ "registrationId": registration_id }).to_string();
        self.transport.publish(&topic, body.as_bytes())?;

        Ok(request_id)
    }

    fn poll(&mut self, operation_id: &str) -> Result<Assignment> {
        let started = self.clock.monotonic_ms();

        for attempt in 1..=self.settings.poll_attempts {
            self.clock.delay_ms(self.settings.poll_backoff_ms);

            let request_id = self.take_request_id();
            let topic = format!(
                "$dps/registrations/GET/iotdps-get-operationstatus/?$rid={request_id}&operationId={operation_id}"
            );
            self.transport.publish(&topic, b"")?;

            let reply =
                self.await_reply(request_id, self.settings.poll_timeout_ms, "operation status")?;

            match reply.status {
                200 => match self.parser.field(&reply.body, "status").as_deref() {
                    Some("assigned") => return self.assignment_from(&reply.body),
                    status => debug!("Poll {}: status {:?}, polling again", attempt, status),
                },
                202 => debug!("Poll {}: still assigning", attempt),
                status => {
                    return Err(Error::UnexpectedStatus {
                        stage: "operation status",
                        status,
                    })
                }
            }
        }

        Err(Error::Timeout {
            what: "hub assignment",
            waited_ms: self.clock.monotonic_ms().saturating_sub(started),
        })
    }

    fn assignment_from(&self, body: &str) -> Result<Assignment> {
        let hub = self
            .parser
            .nested_field(body, "registrationState", "assignedHub");
        let device_id = self
            .parser
            .nested_field(body, "registrationState", "deviceId");

        match (hub, device_id) {
            (Some(hub), Some(device_id)) if !hub.is_empty() && !device_id.is_empty() => {
                Ok(Assignment { hub, device_id })
            }
            _ => Err(Error::Protocol(
                "assigned reply lacks assignedHub or deviceId".into(),
            )),
        }
    }

    /// Service the transport until a reply to `request_id` shows up.
    fn await_reply(&mut self, request_id: u32, timeout_ms: u64, what: &'static str) -> Result<Reply> {
        let started = self.clock.monotonic_ms();

        loop {
            self.transport.service();

            while let Some(message) = self.inbox.take() {
                let Some(status) = status_from_topic(&message.topic) else {
                    debug!("Ignoring message on {}", message.topic);
                    continue;
                };

                match request_id_from_topic(&message.topic) {
                    Some(rid) if rid == request_id => {}
                    Some(rid) => {
                        warn!(
                            "Discarding reply for request {} while waiting for {}",
                            rid, request_id
                        );
                        continue;
                    }
                    None => {
                        warn!(
                            "Discarding reply without $rid while waiting for {}",
                            request_id
                        );
                        continue;
                    }
                }

                return Ok(Reply {
                    status,
                    body: message.text(),
                });
            }

            let waited_ms = self.clock.monotonic_ms().saturating_sub(started);
            if waited_ms >= timeout_ms {
                return Err(Error::Timeout { what, waited_ms });
            }
            self.clock.delay_ms(self.settings.wait_step_ms);
        }
    }

    fn take_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }
}
