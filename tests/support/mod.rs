//! Scripted transport, clock and sensors shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use soilcast::backup::BackupSink;
use soilcast::extract::request_id_from_topic;
use soilcast::{
    Clock, ConnectOptions, Error, Inbound, Inbox, Result, SensorSample, SensorSource, Transport,
};

pub const TEST_KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";
pub const START_EPOCH: u64 = 1_700_000_000;

/// What the fake service does when it sees a request.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer the request
    Reply { status: u16, body: String },
    /// Answer a different request id first, then this one
    StaleThenReply {
        stale_body: String,
        status: u16,
        body: String,
    },
    /// Deliver a reply carrying no `$rid` first, then this one
    UnmarkedThenReply {
        unmarked_body: String,
        status: u16,
        body: String,
    },
    /// Never answer
    Silence,
}

pub fn reply(status: u16, body: &str) -> Step {
    Step::Reply {
        status,
        body: body.to_string(),
    }
}

pub fn accepted(operation_id: &str) -> Step {
    reply(
        202,
        &format!(r#"{{"operationId":"{operation_id}","status":"assigning"}}"#),
    )
}

pub fn assigning(operation_id: &str) -> Step {
    reply(
        200,
        &format!(r#"{{"operationId":"{operation_id}","status":"assigning"}}"#),
    )
}

pub fn assigned_body(hub: &str, device_id: &str) -> String {
    format!(
        r#"{{"operationId":"4.op","status":"assigned","registrationState":{{"registrationId":"dev-1","assignedHub":"{hub}","deviceId":"{device_id}","status":"assigned"}}}}"#
    )
}

pub fn assigned(hub: &str, device_id: &str) -> Step {
    Step::Reply {
        status: 200,
        body: assigned_body(hub, device_id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedConnect {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub connected: bool,
    pub connects: Vec<RecordedConnect>,
    pub subscriptions: Vec<String>,
    pub publishes: Vec<(String, Vec<u8>)>,
    pub services: u32,
    pub disconnects: u32,
    pub failing_connects: u32,
    pub fail_publishes: bool,
    script: VecDeque<Step>,
    pending: VecDeque<Inbound>,
}

/// Transport double; clones share state so tests can inspect it after
/// handing the transport to the code under test.
#[derive(Clone)]
pub struct FakeTransport {
    state: Rc<RefCell<FakeState>>,
    inbox: Inbox,
}

impl FakeTransport {
    pub fn new(inbox: Inbox) -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState::default())),
            inbox,
        }
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.state.borrow_mut().script.extend(steps);
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.state.borrow_mut().failing_connects = count;
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.borrow_mut().fail_publishes = fail;
    }

    /// Simulate the broker closing the session.
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn state(&self) -> std::cell::Ref<'_, FakeState> {
        self.state.borrow()
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.connects.push(RecordedConnect {
            host: options.host.to_string(),
            port: options.port,
            client_id: options.client_id.to_string(),
            username: options.username.to_string(),
            password: options.password.to_string(),
        });
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            state.connected = false;
            return Err(Error::transport("connect", "refused"));
        }
        state.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(Error::transport("publish", "not connected"));
        }
        if state.fail_publishes {
            return Err(Error::transport("publish", "outbox full"));
        }
        state.publishes.push((topic.to_string(), payload.to_vec()));

        if !topic.starts_with("$dps/") {
            return Ok(());
        }
        let rid = request_id_from_topic(topic).unwrap_or(0);
        match state.script.pop_front() {
            Some(Step::Reply { status, body }) => {
                let topic = format!("$dps/registrations/res/{status}/?$rid={rid}");
                state.pending.push_back(Inbound::new(topic, body));
            }
            Some(Step::StaleThenReply {
                stale_body,
                status,
                body,
            }) => {
                let stale = format!("$dps/registrations/res/200/?$rid={}", rid + 1000);
                state.pending.push_back(Inbound::new(stale, stale_body));
                let topic = format!("$dps/registrations/res/{status}/?$rid={rid}");
                state.pending.push_back(Inbound::new(topic, body));
            }
            Some(Step::UnmarkedThenReply {
                unmarked_body,
                status,
                body,
            }) => {
                state
                    .pending
                    .push_back(Inbound::new("$dps/registrations/res/200/", unmarked_body));
                let topic = format!("$dps/registrations/res/{status}/?$rid={rid}");
                state.pending.push_back(Inbound::new(topic, body));
            }
            Some(Step::Silence) | None => {}
        }
        Ok(())
    }

    fn service(&mut self) {
        let mut state = self.state.borrow_mut();
        state.services += 1;
        while let Some(message) = state.pending.pop_front() {
            self.inbox.push(message);
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.disconnects += 1;
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Clone)]
pub struct FakeClock {
    mono_ms: Rc<Cell<u64>>,
    epoch_ms: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            mono_ms: Rc::new(Cell::new(0)),
            epoch_ms: Rc::new(Cell::new(START_EPOCH * 1000)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.mono_ms.set(self.mono_ms.get() + ms);
        self.epoch_ms.set(self.epoch_ms.get() + ms);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs * 1000);
    }
}

impl Clock for FakeClock {
    fn epoch_secs(&self) -> u64 {
        self.epoch_ms.get() / 1000
    }

    fn monotonic_ms(&self) -> u64 {
        self.mono_ms.get()
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_ms(ms.into());
    }
}

/// Sensors returning a fixed sequence, repeating the last sample.
pub struct ScriptedSensors {
    samples: VecDeque<SensorSample>,
    last: SensorSample,
}

impl ScriptedSensors {
    pub fn new(samples: impl IntoIterator<Item = SensorSample>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
            last: sample(20.0, 50.0, 2100),
        }
    }
}

impl SensorSource for ScriptedSensors {
    fn sample(&mut self) -> Result<SensorSample> {
        if let Some(next) = self.samples.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

pub fn sample(temperature: f32, humidity: f32, soil_raw: u16) -> SensorSample {
    SensorSample {
        temperature,
        humidity,
        soil_raw,
    }
}

/// Backup sink recording every body it receives.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub bodies: Rc<RefCell<Vec<Vec<u8>>>>,
    pub fail: Rc<Cell<bool>>,
}

impl BackupSink for RecordingSink {
    fn post(&mut self, body: &[u8]) -> Result<()> {
        if self.fail.get() {
            return Err(Error::transport("backup post", "HTTP 500"));
        }
        self.bodies.borrow_mut().push(body.to_vec());
        Ok(())
    }
}
