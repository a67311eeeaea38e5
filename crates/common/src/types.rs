//! Core types for FSQSB

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Instance (virtual machine) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    #[default]
    Unknown,
    Stopped,
    Pending,
    Running,
    Stopping,
}

impl InstanceState {
    /// Parse a backend state string. Anything unrecognised is `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "pending" => Self::Pending,
            "stopping" | "shutting-down" => Self::Stopping,
            "stopped" | "terminated" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Unknown => write!(f, "unknown"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// State of the service hosted on the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Unknown,
    Stopped,
    Running,
}

impl ServiceState {
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Unknown => write!(f, "unknown"),
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Running => write!(f, "running"),
        }
    }
}

/// Instance status as last observed or optimistically assumed.
///
/// The IP address is only ever held while the state is `Running`; every
/// constructor and transition clears it otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct InstanceStatus {
    ip_address: Option<String>,
    state: InstanceState,
}

impl InstanceStatus {
    pub fn new(state: InstanceState, ip_address: Option<String>) -> Self {
        let ip_address = if state.is_running() {
            ip_address.filter(|ip| !ip.trim().is_empty())
        } else {
            None
        };
        Self { ip_address, state }
    }

    /// Build from a `/instance_status` payload (`{ state, ip_address }`).
    ///
    /// Missing or mistyped fields degrade to `Unknown` / no IP.
    pub fn from_wire(data: &Value) -> Self {
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .map(InstanceState::from_wire)
            .unwrap_or_default();
        let ip = data
            .get("ip_address")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self::new(state, ip)
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    /// Transition to another state, keeping the IP only if still running
    pub fn with_state(self, state: InstanceState) -> Self {
        Self::new(state, self.ip_address)
    }
}

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ServiceStatus {
    pub state: ServiceState,
}

impl ServiceStatus {
    pub fn new(state: ServiceState) -> Self {
        Self { state }
    }

    /// Build from a `/service_status` payload (`{ state }`)
    pub fn from_wire(data: &Value) -> Self {
        let state = data
            .get("state")
            .and_then(Value::as_str)
            .map(ServiceState::from_wire)
            .unwrap_or_default();
        Self { state }
    }
}

/// Lifecycle actions. At most one may be in flight at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    StartInstance,
    StopInstance,
    StartService,
    StopService,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::StartInstance,
        ActionKind::StopInstance,
        ActionKind::StartService,
        ActionKind::StopService,
    ];

    /// Endpoint path that performs the action
    pub fn endpoint(self) -> &'static str {
        match self {
            ActionKind::StartInstance => "/start_instance",
            ActionKind::StopInstance => "/stop_instance",
            ActionKind::StartService => "/start_service",
            ActionKind::StopService => "/stop_service",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::StartInstance => "start-instance",
            ActionKind::StopInstance => "stop-instance",
            ActionKind::StartService => "start-service",
            ActionKind::StopService => "stop-service",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        ActionKind::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("unknown action: {}", s)))
    }
}

/// Uniform `{ success, data?, error? }` shape of every API call outcome
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiFailure>,
}

/// Error half of [`ApiResponse`]
#[derive(Debug, Clone, Serialize)]
pub struct ApiFailure {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl From<Result<Value>> for ApiResponse {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(ApiFailure {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                    status_code: e.status_code(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[test]
    fn test_ip_cleared_unless_running() {
        for state in [
            InstanceState::Unknown,
            InstanceState::Stopped,
            InstanceState::Pending,
            InstanceState::Stopping,
        ] {
            let status = InstanceStatus::new(state, Some("10.0.0.1".to_string()));
            assert_eq!(status.ip_address(), None, "state {state}");
        }

        let running = InstanceStatus::new(InstanceState::Running, Some("10.0.0.1".to_string()));
        assert_eq!(running.ip_address(), Some("10.0.0.1"));
        assert_eq!(running.with_state(InstanceState::Stopping).ip_address(), None);
    }

    #[test]
    fn test_instance_status_from_wire() {
        let status = InstanceStatus::from_wire(&json!({"state": "running", "ip_address": "3.14.15.92"}));
        assert_eq!(status.state(), InstanceState::Running);
        assert_eq!(status.ip_address(), Some("3.14.15.92"));

        // Stopped machines report a placeholder string instead of an IP
        let status = InstanceStatus::from_wire(&json!({"state": "stopped", "ip_address": "Remote not started"}));
        assert_eq!(status.state(), InstanceState::Stopped);
        assert_eq!(status.ip_address(), None);

        let status = InstanceStatus::from_wire(&json!({}));
        assert_eq!(status.state(), InstanceState::Unknown);

        let status = InstanceStatus::from_wire(&json!({"state": 42}));
        assert_eq!(status.state(), InstanceState::Unknown);
    }

    #[test]
    fn test_instance_state_aliases() {
        assert_eq!(InstanceState::from_wire("shutting-down"), InstanceState::Stopping);
        assert_eq!(InstanceState::from_wire("terminated"), InstanceState::Stopped);
        assert_eq!(InstanceState::from_wire("RUNNING"), InstanceState::Running);
        assert_eq!(InstanceState::from_wire("rebooting"), InstanceState::Unknown);
    }

    #[test]
    fn test_service_status_from_wire() {
        assert_eq!(ServiceStatus::from_wire(&json!({"state": "running"})).state, ServiceState::Running);
        assert_eq!(ServiceStatus::from_wire(&json!({"state": "stopped"})).state, ServiceState::Stopped);
        assert_eq!(ServiceStatus::from_wire(&json!(null)).state, ServiceState::Unknown);
    }

    #[test]
    fn test_action_kind_names() {
        for action in ActionKind::ALL {
            let parsed: ActionKind = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
            assert_eq!(action.endpoint().trim_start_matches('/').replace('_', "-"), action.as_str());
        }
        assert!("reboot".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_api_response_shape() {
        let ok = ApiResponse::from(Ok(json!({"state": "running"})));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let err = ApiResponse::from(Err(Error::Remote {
            status_code: 401,
            message: "Invalid credentials".to_string(),
        }));
        assert!(!err.success);
        let failure = err.error.unwrap();
        assert_eq!(failure.kind, "remote");
        assert_eq!(failure.status_code, Some(401));

        let value = serde_json::to_value(ApiResponse::from(Err(Error::NotAuthenticated))).unwrap();
        assert_eq!(value["success"], json!(false));
        assert!(value.get("data").is_none());
    }
}
