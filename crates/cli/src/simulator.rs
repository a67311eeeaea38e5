//! In-memory control API
//!
//! Implements the backend side of the protocol (signature check, instance
//! and service lifecycle with boot/shutdown latency) behind [`Transport`].
//! Used by `--simulate` and by the test suites. Time is measured with
//! `tokio::time`, so paused-clock tests drive it deterministically.

use async_trait::async_trait;
use fsqsb_common::{sign, Credential, Digest, InstanceState, Result, ServiceState};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::client::operation_name;
use crate::transport::{RawResponse, Transport};

/// Injected failure for the next call to an endpoint
#[derive(Debug, Clone)]
pub enum Fault {
    /// Respond with this status and JSON body
    Status { status: u16, body: Value },
    /// Fail without a response
    Transport(String),
    /// Respond 200 with a body that is not JSON
    Malformed,
}

#[derive(Debug)]
struct SimState {
    instance: InstanceState,
    /// Pending automatic transition (target, due)
    transition: Option<(InstanceState, Instant)>,
    service: ServiceState,
    public_ip: String,
    boot_time: Duration,
    shutdown_time: Duration,
    latency: Duration,
    faults: HashMap<String, VecDeque<Fault>>,
    calls: Vec<String>,
}

impl SimState {
    /// Apply a due automatic transition
    fn settle(&mut self, now: Instant) {
        if let Some((target, due)) = self.transition {
            if now >= due {
                self.instance = target;
                self.transition = None;
                if !target.is_running() {
                    self.service = ServiceState::Stopped;
                }
            }
        }
    }
}

/// Simulated backend with a fixed user table
pub struct SimulatedBackend {
    users: HashMap<String, Digest>,
    state: Mutex<SimState>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// Stopped instance, no users
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            state: Mutex::new(SimState {
                instance: InstanceState::Stopped,
                transition: None,
                service: ServiceState::Stopped,
                public_ip: "203.0.113.10".to_string(),
                boot_time: Duration::from_secs(3),
                shutdown_time: Duration::from_secs(4),
                latency: Duration::ZERO,
                faults: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), Digest::of(password));
        self
    }

    /// Start in the running state with the service in `service`
    pub fn running(self, service: ServiceState) -> Self {
        {
            let mut state = self.state.lock();
            state.instance = InstanceState::Running;
            state.service = service;
        }
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn with_boot_time(self, boot_time: Duration) -> Self {
        self.state.lock().boot_time = boot_time;
        self
    }

    pub fn with_shutdown_time(self, shutdown_time: Duration) -> Self {
        self.state.lock().shutdown_time = shutdown_time;
        self
    }

    /// Queue a fault for the next call to `path`
    pub fn inject(&self, path: &str, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry(path.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Endpoint paths called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == path).count()
    }

    pub fn instance_state(&self) -> InstanceState {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        state.instance
    }

    pub fn service_state(&self) -> ServiceState {
        let mut state = self.state.lock();
        state.settle(Instant::now());
        state.service
    }

    fn verify(&self, path: &str, body: &Value) -> bool {
        let username = body.get("username").and_then(Value::as_str);
        let claim = body.get("hash").and_then(Value::as_str);
        match (username, claim) {
            (Some(username), Some(claim)) => self.users.get(username).is_some_and(|digest| {
                let expected = sign(&Credential::from_digest(username, *digest), operation_name(path));
                expected.hash.to_hex() == claim
            }),
            _ => false,
        }
    }

    fn handle(&self, path: &str, body: &Value) -> RawResponse {
        if !self.verify(path, body) {
            return RawResponse::json(401, &json!({"error": "Invalid credentials"}));
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        state.settle(now);

        match path {
            "/login" => RawResponse::json(200, &json!({"message": "Login successful"})),
            "/ip_addr" => {
                if state.instance.is_running() {
                    RawResponse::json(200, &json!({"status": "success", "public_ip": state.public_ip}))
                } else {
                    RawResponse::json(200, &json!({"status": "success", "public_ip": "Remote not started"}))
                }
            }
            "/instance_status" => {
                let ip = if state.instance.is_running() {
                    state.public_ip.clone()
                } else {
                    "Remote not started".to_string()
                };
                RawResponse::json(
                    200,
                    &json!({"status": "success", "state": state.instance.to_string(), "ip_address": ip}),
                )
            }
            "/service_status" => {
                RawResponse::json(200, &json!({"status": "success", "state": state.service.to_string()}))
            }
            "/start_instance" => {
                if state.instance != InstanceState::Stopped {
                    return RawResponse::json(
                        400,
                        &json!({"error": "Cannot start instance because it is not stopped"}),
                    );
                }
                state.instance = InstanceState::Pending;
                state.transition = Some((InstanceState::Running, now + state.boot_time));
                RawResponse::json(200, &json!({"status": "success", "message": "Instance started"}))
            }
            "/stop_instance" => {
                if !state.instance.is_running() {
                    return RawResponse::json(
                        400,
                        &json!({"error": "Cannot shut down because instance is not running"}),
                    );
                }
                state.service = ServiceState::Stopped;
                state.instance = InstanceState::Stopping;
                state.transition = Some((InstanceState::Stopped, now + state.shutdown_time));
                RawResponse::json(200, &json!({"status": "success", "message": "Instance stopped"}))
            }
            "/start_service" => {
                if !state.instance.is_running() {
                    return RawResponse::json(
                        400,
                        &json!({"error": "Cannot start service because instance is not running"}),
                    );
                }
                state.service = ServiceState::Running;
                RawResponse::json(200, &json!({"status": "success", "message": "Service started"}))
            }
            "/stop_service" => {
                if !state.instance.is_running() {
                    return RawResponse::json(
                        400,
                        &json!({"error": "Cannot stop service because instance is not running"}),
                    );
                }
                state.service = ServiceState::Stopped;
                RawResponse::json(200, &json!({"status": "success", "message": "Service stopped"}))
            }
            _ => RawResponse::json(404, &json!({"error": format!("Not found {}", path)})),
        }
    }
}

#[async_trait]
impl Transport for SimulatedBackend {
    async fn send(&self, _method: reqwest::Method, path: &str, body: &Value) -> Result<RawResponse> {
        let (latency, fault) = {
            let mut state = self.state.lock();
            state.calls.push(path.to_string());
            let fault = state.faults.get_mut(path).and_then(VecDeque::pop_front);
            (state.latency, fault)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        debug!("simulated {}", path);
        match fault {
            Some(Fault::Status { status, body }) => Ok(RawResponse::json(status, &body)),
            Some(Fault::Transport(message)) => Err(fsqsb_common::Error::Transport(message)),
            Some(Fault::Malformed) => Ok(RawResponse {
                status: 200,
                body: b"<html>bad gateway</html>".to_vec(),
            }),
            None => Ok(self.handle(path, body)),
        }
    }
}
