//! CLI Commands

pub mod action;
pub mod config;
pub mod dashboard;
pub mod status;

use anyhow::{Context, Result};
use std::sync::Arc;

use fsqsb_common::SessionStore;

use crate::client::RequestClient;
use crate::config::ControlConfig;
use crate::orchestrator::LifecycleOrchestrator;
use crate::output::OutputFormat;
use crate::simulator::SimulatedBackend;

/// Everything a command needs to reach the control API
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: ControlConfig,
    pub format: OutputFormat,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Talk to an in-memory backend instead of the network
    pub simulate: bool,
}

impl CliContext {
    fn credentials(&self) -> Result<(String, String)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Ok((u.clone(), p.clone())),
            _ if self.simulate => Ok(("admin".to_string(), "admin".to_string())),
            (None, _) => anyhow::bail!("Username required (--username or FSQSB_USERNAME)"),
            (_, None) => anyhow::bail!("Password required (--password or FSQSB_PASSWORD)"),
        }
    }

    /// Build a client and log in
    pub async fn client(&self) -> Result<RequestClient> {
        let (username, password) = self.credentials()?;
        let session = SessionStore::new();
        let client = if self.simulate {
            let backend = SimulatedBackend::new().with_user(&username, &password);
            RequestClient::new(Arc::new(backend), session)
        } else {
            RequestClient::http(&self.config.api_base_url, session)?
        };

        client
            .login(&username, &password)
            .await
            .context("Login failed")?;
        Ok(client)
    }

    /// Logged-in orchestrator with no status fetched yet
    pub async fn orchestrator(&self) -> Result<LifecycleOrchestrator> {
        Ok(LifecycleOrchestrator::new(self.client().await?, &self.config))
    }
}
