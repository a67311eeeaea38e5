//! Interactive dashboard
//!
//! Reads one command per line from stdin and re-renders whenever the
//! orchestrator publishes a new snapshot.

use anyhow::Result;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use fsqsb_common::{ActionKind, InstanceState, ServiceState};

use crate::commands::action::print_notice;
use crate::commands::status::available_actions;
use crate::commands::CliContext;
use crate::orchestrator::DashboardView;
use crate::output::{print_error, print_info, print_warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DashboardCommand {
    Refresh,
    Action(ActionKind),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<DashboardCommand> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "r" | "refresh" => DashboardCommand::Refresh,
        "start" | "boot" | "start-instance" => DashboardCommand::Action(ActionKind::StartInstance),
        "stop" | "shutdown" | "stop-instance" => DashboardCommand::Action(ActionKind::StopInstance),
        "service" | "play" | "start-service" => DashboardCommand::Action(ActionKind::StartService),
        "stop-service" => DashboardCommand::Action(ActionKind::StopService),
        "h" | "help" | "?" => DashboardCommand::Help,
        "q" | "quit" | "exit" => DashboardCommand::Quit,
        _ => return None,
    };
    Some(command)
}

fn print_help() {
    print_info("Commands: r(efresh), start, stop, service, stop-service, help, q(uit)");
}

fn paint_instance(state: InstanceState) -> String {
    let text = state.to_string();
    match state {
        InstanceState::Running => text.green().to_string(),
        InstanceState::Stopped => text.red().to_string(),
        InstanceState::Pending | InstanceState::Stopping => text.yellow().to_string(),
        InstanceState::Unknown => text.dimmed().to_string(),
    }
}

fn paint_service(state: ServiceState) -> String {
    let text = state.to_string();
    match state {
        ServiceState::Running => text.green().to_string(),
        ServiceState::Stopped => text.red().to_string(),
        ServiceState::Unknown => text.dimmed().to_string(),
    }
}

/// One-line rendering of a snapshot
fn render(view: &DashboardView) -> String {
    let (instance, service) = if view.fresh {
        (
            paint_instance(view.instance.state()),
            paint_service(view.service.state),
        )
    } else {
        (
            format!("outdated (was: {})", view.instance.state()).dimmed().to_string(),
            format!("outdated (was: {})", view.service.state).dimmed().to_string(),
        )
    };

    let mut line = format!("instance: {}", instance);
    if let Some(ip) = view.instance.ip_address() {
        line.push_str(&format!(" [{}]", ip.bold()));
    }
    line.push_str(&format!(" | service: {}", service));
    if let Some(action) = view.action_lock {
        line.push_str(&format!(" | {} in progress", action));
    }
    if view.loading {
        line.push_str(" | refreshing...");
    }

    let actions = available_actions(&view.flags);
    if actions.is_empty() {
        if !view.fresh {
            line.push_str(&format!(" | {}", "status is stale, press r to refresh".yellow()));
        }
    } else {
        line.push_str(&format!(" | available: {}", actions.join(", ")));
    }
    line
}

/// `fsqsb dashboard`
pub async fn execute(ctx: &CliContext) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let mut views = orchestrator.subscribe();
    let mut notices = orchestrator.notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_help();
    orchestrator.spawn_refresh();

    let mut last = render(&views.borrow_and_update());
    println!("{}", last);

    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let rendered = render(&views.borrow_and_update());
                if rendered != last {
                    println!("{}", rendered);
                    last = rendered;
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(RecvError::Lagged(skipped)) => debug!("Dropped {} notices", skipped),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Some(DashboardCommand::Quit) => break,
                    Some(DashboardCommand::Help) => print_help(),
                    Some(DashboardCommand::Refresh) => {
                        orchestrator.spawn_refresh();
                    }
                    Some(DashboardCommand::Action(action)) => {
                        if let Err(e) = orchestrator.dispatch(action) {
                            print_error(&e.to_string());
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => print_warning(&format!("Unknown command: {}", line.trim())),
                }
            }
        }
    }

    orchestrator.shutdown();
    Ok(())
}
