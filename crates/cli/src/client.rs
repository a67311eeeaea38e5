//! Signed request client for the control API

use fsqsb_common::{
    sign, ActionKind, ApiResponse, AuthPayload, Credential, Error, InstanceStatus, Result,
    ServiceStatus, SessionStore,
};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::transport::{HttpTransport, RawResponse, Transport};

/// Operation name a request is signed for: the endpoint's trailing segment
pub fn operation_name(endpoint: &str) -> &str {
    let trimmed = endpoint.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Client for the control API.
///
/// Every call is signed with the session's credential for the endpoint's
/// operation. Calls never panic; every outcome is a `Result`.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    session: SessionStore,
}

impl RequestClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionStore) -> Self {
        Self { transport, session }
    }

    /// Client over HTTP
    pub fn http(base_url: &str, session: SessionStore) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(base_url)?), session))
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Sign and send a request.
    ///
    /// Fails with `NotAuthenticated` without touching the network when the
    /// session is empty.
    pub async fn call(&self, endpoint: &str, method: Method, body: Option<Value>) -> Result<Value> {
        let auth = self.session.sign(operation_name(endpoint))?;
        self.send_signed(endpoint, method, auth, body).await
    }

    /// [`call`](Self::call) folded into the `{ success, data, error }` envelope
    pub async fn request(&self, endpoint: &str, method: Method, body: Option<Value>) -> ApiResponse {
        self.call(endpoint, method, body).await.into()
    }

    async fn send_signed(
        &self,
        endpoint: &str,
        method: Method,
        auth: AuthPayload,
        body: Option<Value>,
    ) -> Result<Value> {
        let body = merge_auth(auth, body)?;
        let response = self.transport.send(method, endpoint, &body).await;
        match response {
            Ok(raw) => classify(endpoint, raw),
            Err(e) => {
                debug!("{} failed: {}", endpoint, e);
                Err(e)
            }
        }
    }

    /// Verify credentials against `/login` and open the session on success.
    ///
    /// The password is digested before anything is sent; the session is
    /// left untouched when the server rejects the credential.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let credential = Credential::from_password(username, password)?;
        let auth = sign(&credential, operation_name("/login"));
        self.send_signed("/login", Method::POST, auth, None).await?;
        self.session.store(credential);
        info!("Logged in as {}", username);
        Ok(())
    }

    pub fn logout(&self) {
        self.session.clear();
    }

    pub async fn instance_status(&self) -> Result<InstanceStatus> {
        let data = self.call("/instance_status", Method::POST, None).await?;
        Ok(InstanceStatus::from_wire(&data))
    }

    pub async fn service_status(&self) -> Result<ServiceStatus> {
        let data = self.call("/service_status", Method::POST, None).await?;
        Ok(ServiceStatus::from_wire(&data))
    }

    /// Public IP as reported by `/ip_addr`.
    ///
    /// Placeholders such as "Remote not started" are reported as `None`.
    pub async fn ip_address(&self) -> Result<Option<String>> {
        let data = self.call("/ip_addr", Method::POST, None).await?;
        let reported = ["public_ip", "ip_address"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_str));
        match reported {
            Some(ip) if ip.trim().parse::<IpAddr>().is_ok() => Ok(Some(ip.trim().to_string())),
            Some(other) => {
                debug!("/ip_addr returned a non-address value: {}", other);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Invoke a lifecycle action endpoint
    pub async fn perform(&self, action: ActionKind) -> Result<Value> {
        self.call(action.endpoint(), Method::POST, None).await
    }
}

/// Merge the auth envelope into the body. Auth fields win over body fields.
fn merge_auth(auth: AuthPayload, body: Option<Value>) -> Result<Value> {
    let mut merged = match body {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(Error::InvalidInput(format!(
                "request body must be a JSON object, got {}",
                other
            )))
        }
    };
    merged.insert("username".to_string(), Value::String(auth.username));
    merged.insert("hash".to_string(), Value::String(auth.hash.to_hex()));
    Ok(Value::Object(merged))
}

fn classify(endpoint: &str, raw: RawResponse) -> Result<Value> {
    let parsed: Option<Value> = if raw.body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(&raw.body) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{} returned an unparseable body: {}", endpoint, e);
                None
            }
        }
    };

    if raw.is_success() {
        return Ok(parsed.unwrap_or_else(|| Value::Object(Map::new())));
    }

    let message = parsed
        .as_ref()
        .and_then(|body| {
            ["message", "error"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| default_message(raw.status));

    debug!("{} returned {}: {}", endpoint, raw.status, message);
    Err(Error::Remote {
        status_code: raw.status,
        message,
    })
}

fn default_message(status: u16) -> String {
    match StatusCode::from_u16(status).ok().and_then(|s| s.canonical_reason()) {
        Some(reason) => format!("Error: {} {}", status, reason),
        None => format!("Error: {}", status),
    }
}
