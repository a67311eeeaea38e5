//! Status Commands

use anyhow::Result;
use serde::Serialize;

use crate::commands::CliContext;
use crate::orchestrator::{DashboardView, PermissionFlags};
use crate::output::{print_item, print_message, print_warning, OutputFormat, TableDisplay};

/// Status display wrapper for serialization
#[derive(Debug, Serialize)]
pub struct StatusDisplay {
    pub instance: String,
    pub ip_address: Option<String>,
    pub service: String,
    pub action_in_progress: Option<String>,
    pub fresh: bool,
    pub available_actions: Vec<String>,
}

/// Names of the actions the flags permit
pub fn available_actions(flags: &PermissionFlags) -> Vec<String> {
    fsqsb_common::ActionKind::ALL
        .into_iter()
        .filter(|a| flags.allows(*a))
        .map(|a| a.to_string())
        .collect()
}

impl From<&DashboardView> for StatusDisplay {
    fn from(view: &DashboardView) -> Self {
        Self {
            instance: view.instance.state().to_string(),
            ip_address: view.instance.ip_address().map(str::to_string),
            service: view.service.state.to_string(),
            action_in_progress: view.action_lock.map(|a| a.to_string()),
            fresh: view.fresh,
            available_actions: available_actions(&view.flags),
        }
    }
}

impl TableDisplay for StatusDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Instance", "IP", "Service", "In Progress", "Fresh", "Actions"]
    }

    fn row(&self) -> Vec<String> {
        let state = |s: &str| {
            if self.fresh {
                s.to_string()
            } else {
                format!("outdated (was: {})", s)
            }
        };
        vec![
            state(&self.instance),
            self.ip_address.clone().unwrap_or_else(|| "-".to_string()),
            state(&self.service),
            self.action_in_progress.clone().unwrap_or_else(|| "-".to_string()),
            if self.fresh { "yes".to_string() } else { "no".to_string() },
            if self.available_actions.is_empty() {
                "-".to_string()
            } else {
                self.available_actions.join(", ")
            },
        ]
    }
}

/// `fsqsb status`
pub async fn execute(ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let result = orchestrator.refresh().await;
    let view = orchestrator.view();
    orchestrator.shutdown();
    result?;

    print_item(&StatusDisplay::from(&view), ctx.format);
    Ok(())
}

/// `fsqsb ip`
pub async fn execute_ip(ctx: &CliContext) -> Result<()> {
    let client = ctx.client().await?;
    match client.ip_address().await? {
        Some(ip) => print_message(&ip, ctx.format),
        None => {
            if ctx.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "ip_address": null }));
            } else {
                print_warning("No IP address reported");
            }
        }
    }
    Ok(())
}

/// `fsqsb call <endpoint>`: prints the response envelope as JSON
pub async fn execute_call(ctx: &CliContext, endpoint: &str) -> Result<()> {
    let endpoint = if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    };
    let client = ctx.client().await?;
    let response = client.request(&endpoint, reqwest::Method::POST, None).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        anyhow::bail!("{} failed", endpoint);
    }
    Ok(())
}
