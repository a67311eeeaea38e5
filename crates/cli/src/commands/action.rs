//! Lifecycle action commands

use anyhow::Result;
use chrono::Local;
use clap::Args;
use tokio::sync::broadcast;

use fsqsb_common::ActionKind;

use crate::commands::status::StatusDisplay;
use crate::commands::CliContext;
use crate::orchestrator::{Notice, NoticeLevel};
use crate::output::{print_info, print_item, print_success, print_warning};

#[derive(Args, Debug, Clone, Default)]
pub struct ActionArgs {
    /// Return once the request is accepted instead of waiting for the
    /// reconciliation poll
    #[arg(long)]
    pub no_wait: bool,
}

/// Print a notice with its local time
pub fn print_notice(notice: &Notice) {
    let line = format!(
        "[{}] {}: {}",
        notice.at.with_timezone(&Local).format("%H:%M:%S"),
        notice.title,
        notice.message
    );
    match notice.level {
        NoticeLevel::Info => print_info(&line),
        NoticeLevel::Warning => print_warning(&line),
    }
}

/// Print every queued notice
pub fn drain_notices(notices: &mut broadcast::Receiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        print_notice(&notice);
    }
}

/// `fsqsb start-instance | stop-instance | start-service | stop-service`
pub async fn execute(ctx: &CliContext, action: ActionKind, args: ActionArgs) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let mut notices = orchestrator.notices();

    // Gates need fresh, authoritative status
    if let Err(e) = orchestrator.refresh().await {
        orchestrator.shutdown();
        return Err(e.into());
    }

    let handle = match orchestrator.dispatch(action) {
        Ok(handle) => handle,
        Err(e) => {
            orchestrator.shutdown();
            return Err(e.into());
        }
    };
    print_success(&format!("{} dispatched", action));

    if args.no_wait {
        let mut views = orchestrator.subscribe();
        // The lock clears once the initiating call has settled
        let _ = views.wait_for(|v| v.action_lock.is_none()).await;
        drain_notices(&mut notices);
        orchestrator.shutdown();
        return Ok(());
    }

    let delay = orchestrator.config().reconcile.delay_for(action);
    print_info(&format!("Waiting {}s for reconciliation...", delay.as_secs()));
    handle.reconciled().await;
    drain_notices(&mut notices);

    let view = orchestrator.view();
    orchestrator.shutdown();
    print_item(&StatusDisplay::from(&view), ctx.format);
    Ok(())
}
