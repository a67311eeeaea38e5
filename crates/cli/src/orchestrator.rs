//! Lifecycle orchestration
//!
//! Tracks instance and service status, decides which actions are currently
//! permitted, applies optimistic transitions when an action is dispatched
//! and reconciles them with a delayed authoritative poll.
//!
//! State changes are published as [`DashboardView`] snapshots on a watch
//! channel; warnings and acknowledgements go out as [`Notice`]s.
//!
//! Invariants maintained on every transition:
//! - the instance IP is only set while the instance is running
//! - the service is `stopped` whenever the instance is not running
//! - at most one action is in flight (the action lock)

use fsqsb_common::{
    ActionKind, Error, InstanceState, InstanceStatus, Result, ServiceState, ServiceStatus,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::client::RequestClient;
use crate::config::{ControlConfig, ServiceStatusMode};
use crate::freshness::FreshnessTracker;

/// Which actions are currently offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct PermissionFlags {
    pub instance_active: bool,
    pub service_active: bool,
    pub shutdown_active: bool,
    pub stop_service_active: bool,
}

impl PermissionFlags {
    pub fn derive(instance: InstanceState, service: ServiceState, lock: Option<ActionKind>) -> Self {
        let idle = lock.is_none();
        let running = instance.is_running();
        Self {
            instance_active: !running && idle,
            service_active: running && service != ServiceState::Running && idle,
            shutdown_active: running && idle,
            stop_service_active: running && service != ServiceState::Stopped && idle,
        }
    }

    /// Everything is disabled while status is stale
    pub fn gated(self, fresh: bool) -> Self {
        if fresh {
            self
        } else {
            Self::default()
        }
    }

    pub fn allows(&self, action: ActionKind) -> bool {
        match action {
            ActionKind::StartInstance => self.instance_active,
            ActionKind::StopInstance => self.shutdown_active,
            ActionKind::StartService => self.service_active,
            ActionKind::StopService => self.stop_service_active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// User-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot consumed by front-ends
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub instance: InstanceStatus,
    pub service: ServiceStatus,
    pub action_lock: Option<ActionKind>,
    pub fresh: bool,
    pub loading: bool,
    pub flags: PermissionFlags,
}

#[derive(Debug, Default)]
struct MachineState {
    instance: InstanceStatus,
    service: ServiceStatus,
    lock: Option<ActionKind>,
    /// Bumped on every dispatch; reconciliation polls carry the value they
    /// were scheduled under
    action_seq: u64,
    refreshing: u32,
}

impl MachineState {
    fn set_instance_state(&mut self, state: InstanceState) {
        self.instance = std::mem::take(&mut self.instance).with_state(state);
        if !state.is_running() {
            self.service = ServiceStatus::new(ServiceState::Stopped);
        }
    }

    fn apply_optimistic(&mut self, action: ActionKind) {
        match action {
            ActionKind::StartInstance => self.set_instance_state(InstanceState::Pending),
            ActionKind::StopInstance => self.set_instance_state(InstanceState::Stopping),
            ActionKind::StartService => self.service = ServiceStatus::new(ServiceState::Running),
            ActionKind::StopService => self.service = ServiceStatus::new(ServiceState::Stopped),
        }
    }

    fn flags(&self) -> PermissionFlags {
        PermissionFlags::derive(self.instance.state(), self.service.state, self.lock)
    }

    /// Why `action` may not be dispatched now, if it may not
    fn rejection(&self, action: ActionKind, fresh: bool, require_fresh: bool) -> Option<String> {
        if let Some(current) = self.lock {
            return Some(format!("{} is already in progress", current));
        }
        if require_fresh && !fresh {
            return Some("status is stale, refresh first".to_string());
        }
        if self.flags().allows(action) {
            return None;
        }
        let instance = self.instance.state();
        Some(match action {
            ActionKind::StartInstance | ActionKind::StopInstance => format!("instance is {}", instance),
            ActionKind::StartService | ActionKind::StopService if !instance.is_running() => {
                format!("instance is {}", instance)
            }
            ActionKind::StartService | ActionKind::StopService => {
                format!("service is {}", self.service.state)
            }
        })
    }
}

struct Shared {
    client: RequestClient,
    config: ControlConfig,
    freshness: FreshnessTracker,
    state: Mutex<MachineState>,
    view_tx: watch::Sender<DashboardView>,
    notice_tx: broadcast::Sender<Notice>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Shared {
    fn view(&self) -> DashboardView {
        let fresh = self.freshness.is_fresh();
        let state = self.state.lock();
        let flags = if self.config.require_fresh_status {
            state.flags().gated(fresh)
        } else {
            state.flags()
        };
        DashboardView {
            instance: state.instance.clone(),
            service: state.service,
            action_lock: state.lock,
            fresh,
            loading: state.refreshing > 0,
            flags,
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    fn update(&self, f: impl FnOnce(&mut MachineState)) {
        f(&mut self.state.lock());
        self.publish();
    }

    fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Orchestrator shutting down");
        self.cancel.cancel();
        self.freshness.shutdown();
        self.tasks.close();
    }
}

/// Held only by user-facing handles; the last one dropped shuts down
struct Owner(Arc<Shared>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Handle to a dispatched action
#[derive(Debug)]
pub struct ActionHandle {
    action: ActionKind,
    handle: JoinHandle<()>,
}

impl ActionHandle {
    pub fn action(&self) -> ActionKind {
        self.action
    }

    /// Wait until the action call has settled and its reconciliation poll
    /// has run (or been skipped)
    pub async fn reconciled(self) {
        if let Err(e) = self.handle.await {
            debug!("{} task ended abnormally: {}", self.action, e);
        }
    }
}

/// Orchestrates the instance/service lifecycle. Cheap to clone.
///
/// Dropping the last clone has the same effect as [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    shared: Arc<Shared>,
    /// `None` for the copies background tasks run on
    _owner: Option<Arc<Owner>>,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator in the `(unknown, unknown, no action)` state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(client: RequestClient, config: &ControlConfig) -> Self {
        let freshness = FreshnessTracker::new(config.freshness_timeout());
        let (view_tx, _) = watch::channel(DashboardView {
            instance: InstanceStatus::default(),
            service: ServiceStatus::default(),
            action_lock: None,
            fresh: false,
            loading: false,
            flags: PermissionFlags::default(),
        });
        let (notice_tx, _) = broadcast::channel(64);

        let shared = Arc::new(Shared {
            client,
            config: config.clone(),
            freshness,
            state: Mutex::new(MachineState::default()),
            view_tx,
            notice_tx,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        shared.publish();

        // Republish when status goes stale
        let weak = Arc::downgrade(&shared);
        let mut fresh_rx = shared.freshness.subscribe();
        let cancel = shared.cancel.clone();
        shared.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = fresh_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        match weak.upgrade() {
                            Some(shared) => shared.publish(),
                            None => break,
                        }
                    }
                }
            }
        });

        let owner = Arc::new(Owner(shared.clone()));
        Self {
            shared,
            _owner: Some(owner),
        }
    }

    /// Copy for background tasks that does not keep the orchestrator alive
    fn detached(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _owner: None,
        }
    }

    pub fn client(&self) -> &RequestClient {
        &self.shared.client
    }

    pub fn config(&self) -> &ControlConfig {
        &self.shared.config
    }

    /// Current snapshot
    pub fn view(&self) -> DashboardView {
        self.shared.view()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.shared.view_tx.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notice_tx.subscribe()
    }

    pub fn instance_status(&self) -> InstanceStatus {
        self.shared.state.lock().instance.clone()
    }

    pub fn service_status(&self) -> ServiceStatus {
        self.shared.state.lock().service
    }

    pub fn action_lock(&self) -> Option<ActionKind> {
        self.shared.state.lock().lock
    }

    pub fn is_fresh(&self) -> bool {
        self.shared.freshness.is_fresh()
    }

    /// Permission flags, freshness gating included when configured
    pub fn flags(&self) -> PermissionFlags {
        self.shared.view().flags
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Fetch authoritative status.
    ///
    /// Failures keep the last known status, are surfaced as warnings and
    /// returned; freshness is only restarted on success.
    pub async fn refresh(&self) -> Result<()> {
        self.refresh_inner(None).await
    }

    /// Run [`refresh`](Self::refresh) in the background
    pub fn spawn_refresh(&self) -> JoinHandle<Result<()>> {
        let this = self.detached();
        self.shared.tasks.spawn(async move { this.refresh().await })
    }

    pub fn start_instance(&self) -> Result<ActionHandle> {
        self.dispatch(ActionKind::StartInstance)
    }

    pub fn stop_instance(&self) -> Result<ActionHandle> {
        self.dispatch(ActionKind::StopInstance)
    }

    pub fn start_service(&self) -> Result<ActionHandle> {
        self.dispatch(ActionKind::StartService)
    }

    pub fn stop_service(&self) -> Result<ActionHandle> {
        self.dispatch(ActionKind::StopService)
    }

    /// Dispatch a lifecycle action.
    ///
    /// Rejected (never queued) when another action is in flight, when status
    /// is stale under strict gating, or when the action makes no sense for
    /// the current status. On acceptance the lock and the optimistic
    /// transition are visible before this returns.
    pub fn dispatch(&self, action: ActionKind) -> Result<ActionHandle> {
        if self.is_shut_down() {
            return Err(Error::ActionRejected {
                action,
                reason: "orchestrator is shut down".to_string(),
            });
        }

        let fresh = self.shared.freshness.is_fresh();
        let seq = {
            let mut state = self.shared.state.lock();
            if let Some(reason) =
                state.rejection(action, fresh, self.shared.config.require_fresh_status)
            {
                debug!("Rejected {}: {}", action, reason);
                return Err(Error::ActionRejected { action, reason });
            }
            state.lock = Some(action);
            state.action_seq += 1;
            state.apply_optimistic(action);
            state.action_seq
        };
        self.shared.publish();
        info!("Dispatching {}", action);

        let this = self.detached();
        let handle = self
            .shared
            .tasks
            .spawn(async move { this.run_action(action, seq).await });
        Ok(ActionHandle { action, handle })
    }

    /// Cancel pending reconciliation polls and the freshness timer.
    ///
    /// In-flight calls are left to finish; their results are discarded.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    async fn run_action(self, action: ActionKind, seq: u64) {
        let result = self.shared.client.perform(action).await;
        if self.is_shut_down() {
            debug!("Discarding {} result after shutdown", action);
            return;
        }

        // Failures are reported but the optimistic state stays until the
        // reconciliation poll corrects it
        match result {
            Ok(data) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Request accepted")
                    .to_string();
                self.notify(NoticeLevel::Info, format!("{} initiated", action), message);
            }
            Err(e) => {
                self.notify(NoticeLevel::Warning, format!("{} failed", action), e.to_string());
            }
        }

        self.shared.update(|state| {
            if state.lock == Some(action) {
                state.lock = None;
            }
        });

        let delay = self.shared.config.reconcile.delay_for(action);
        debug!("Reconciling {} in {:?}", action, delay);
        tokio::select! {
            _ = self.shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let superseded = self.shared.state.lock().action_seq != seq;
        if superseded {
            debug!("Skipping reconciliation for {}: superseded", action);
            return;
        }
        // Outcome is already surfaced as a notice
        let _ = self.refresh_inner(Some(seq)).await;
    }

    async fn refresh_inner(&self, expected_seq: Option<u64>) -> Result<()> {
        if self.is_shut_down() {
            return Ok(());
        }
        self.shared.update(|state| state.refreshing += 1);
        let result = self.fetch_and_apply(expected_seq).await;
        self.shared
            .update(|state| state.refreshing = state.refreshing.saturating_sub(1));
        result
    }

    async fn fetch_and_apply(&self, expected_seq: Option<u64>) -> Result<()> {
        let client = &self.shared.client;

        let instance = match client.instance_status().await {
            Ok(instance) => instance,
            Err(e) => {
                if !self.is_shut_down() {
                    self.notify(
                        NoticeLevel::Warning,
                        "Instance status error".to_string(),
                        format!("Failed to get instance status: {}", e),
                    );
                }
                return Err(e);
            }
        };
        if self.is_shut_down() {
            debug!("Discarding instance status after shutdown");
            return Ok(());
        }

        let service = if !instance.state().is_running() {
            ServiceStatus::new(ServiceState::Stopped)
        } else {
            match self.shared.config.service_status_mode {
                ServiceStatusMode::Derived => ServiceStatus::new(ServiceState::Running),
                ServiceStatusMode::Endpoint => match client.service_status().await {
                    Ok(service) => service,
                    Err(e) => {
                        if !self.is_shut_down() {
                            self.notify(
                                NoticeLevel::Warning,
                                "Service status error".to_string(),
                                format!("Failed to get service status: {}", e),
                            );
                        }
                        ServiceStatus::new(ServiceState::Unknown)
                    }
                },
            }
        };
        if self.is_shut_down() {
            debug!("Discarding service status after shutdown");
            return Ok(());
        }

        {
            let mut state = self.shared.state.lock();
            if let Some(seq) = expected_seq {
                if state.action_seq != seq {
                    debug!("Discarding reconciliation result: a newer action was dispatched");
                    return Ok(());
                }
            }
            debug!("Status: instance {}, service {}", instance.state(), service.state);
            state.instance = instance;
            state.service = service;
        }
        self.shared.freshness.on_fetch_succeeded();
        self.shared.publish();
        Ok(())
    }

    fn notify(&self, level: NoticeLevel, title: String, message: String) {
        match level {
            NoticeLevel::Info => info!("{}: {}", title, message),
            NoticeLevel::Warning => warn!("{}: {}", title, message),
        }
        // No subscribers is fine
        let _ = self.shared.notice_tx.send(Notice {
            level,
            title,
            message,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Fault, SimulatedBackend};
    use fsqsb_common::SessionStore;
    use std::time::Duration;

    use fsqsb_common::InstanceState as I;
    use fsqsb_common::ServiceState as S;

    async fn setup(sim: SimulatedBackend, config: ControlConfig) -> (LifecycleOrchestrator, Arc<SimulatedBackend>) {
        let sim = Arc::new(sim.with_user("admin", "admin"));
        let client = RequestClient::new(sim.clone(), SessionStore::new());
        client.login("admin", "admin").await.unwrap();
        (LifecycleOrchestrator::new(client, &config), sim)
    }

    #[test]
    fn test_flag_truth_table() {
        let f = PermissionFlags::derive(I::Stopped, S::Stopped, None);
        assert!(f.instance_active && !f.service_active && !f.shutdown_active);

        let f = PermissionFlags::derive(I::Running, S::Stopped, None);
        assert!(!f.instance_active && f.service_active && f.shutdown_active);
        assert!(!f.stop_service_active);

        let f = PermissionFlags::derive(I::Running, S::Running, Some(ActionKind::StopService));
        assert_eq!(f, PermissionFlags::default());

        let f = PermissionFlags::derive(I::Running, S::Running, None);
        assert!(!f.service_active && f.shutdown_active && f.stop_service_active);

        let f = PermissionFlags::derive(I::Running, S::Unknown, None);
        assert!(f.service_active && f.stop_service_active);
    }

    #[test]
    fn test_lock_disables_everything() {
        let instances = [I::Unknown, I::Stopped, I::Pending, I::Running, I::Stopping];
        let services = [S::Unknown, S::Stopped, S::Running];
        for instance in instances {
            for service in services {
                for lock in ActionKind::ALL {
                    let flags = PermissionFlags::derive(instance, service, Some(lock));
                    assert_eq!(flags, PermissionFlags::default());
                }
                let flags = PermissionFlags::derive(instance, service, None);
                assert_eq!(flags.instance_active, !instance.is_running());
                assert_eq!(flags.shutdown_active, instance.is_running());
                assert!(!flags.service_active || instance.is_running());
                assert_eq!(flags.gated(false), PermissionFlags::default());
                assert_eq!(flags.gated(true), flags);
            }
        }
    }

    #[test]
    fn test_optimistic_transitions_keep_invariants() {
        let mut state = MachineState {
            instance: InstanceStatus::new(I::Running, Some("10.0.0.5".to_string())),
            service: ServiceStatus::new(S::Running),
            ..Default::default()
        };
        state.apply_optimistic(ActionKind::StopInstance);
        assert_eq!(state.instance.state(), I::Stopping);
        assert_eq!(state.instance.ip_address(), None);
        assert_eq!(state.service.state, S::Stopped);

        state.apply_optimistic(ActionKind::StartInstance);
        assert_eq!(state.instance.state(), I::Pending);
        assert_eq!(state.service.state, S::Stopped);
    }

    #[test]
    fn test_rejection_reasons() {
        let state = MachineState {
            instance: InstanceStatus::new(I::Stopped, None),
            service: ServiceStatus::new(S::Stopped),
            ..Default::default()
        };
        assert!(state.rejection(ActionKind::StartInstance, true, true).is_none());
        assert_eq!(
            state.rejection(ActionKind::StartService, true, true).unwrap(),
            "instance is stopped"
        );
        assert_eq!(
            state.rejection(ActionKind::StartInstance, false, true).unwrap(),
            "status is stale, refresh first"
        );
        assert!(state.rejection(ActionKind::StartInstance, false, false).is_none());

        let locked = MachineState {
            lock: Some(ActionKind::StartInstance),
            ..state
        };
        assert_eq!(
            locked.rejection(ActionKind::StartInstance, true, true).unwrap(),
            "start-instance is already in progress"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let (orch, sim) = setup(SimulatedBackend::new(), ControlConfig::default()).await;
        let view = orch.view();
        assert_eq!(view.instance.state(), I::Unknown);
        assert_eq!(view.service.state, S::Unknown);
        assert_eq!(view.action_lock, None);
        assert!(!view.fresh);
        // Stale before the first fetch, so nothing is offered
        assert_eq!(view.flags, PermissionFlags::default());
        assert!(orch.start_instance().is_err());
        assert_eq!(sim.call_count("/start_instance"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_stopped_skips_service_call() {
        let (orch, sim) = setup(SimulatedBackend::new(), ControlConfig::default()).await;
        orch.refresh().await.unwrap();

        assert_eq!(orch.instance_status().state(), I::Stopped);
        assert_eq!(orch.service_status().state, S::Stopped);
        assert!(orch.is_fresh());
        assert_eq!(sim.call_count("/service_status"), 0);
        assert!(orch.flags().instance_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_running_fetches_service() {
        let (orch, sim) = setup(SimulatedBackend::new().running(S::Running), ControlConfig::default()).await;
        orch.refresh().await.unwrap();

        assert_eq!(orch.instance_status().ip_address(), Some("203.0.113.10"));
        assert_eq!(orch.service_status().state, S::Running);
        // Service fetch strictly after the instance fetch
        assert_eq!(
            sim.calls(),
            vec!["/login", "/instance_status", "/service_status"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_failure_keeps_status() {
        let (orch, sim) = setup(SimulatedBackend::new().running(S::Running), ControlConfig::default()).await;
        orch.refresh().await.unwrap();
        let before = orch.view();

        let mut notices = orch.notices();
        tokio::time::advance(Duration::from_secs(20)).await;
        sim.inject(
            "/instance_status",
            Fault::Status {
                status: 500,
                body: serde_json::json!({"error": "Remote Instance is Unreachable"}),
            },
        );
        assert!(orch.refresh().await.is_err());

        assert_eq!(orch.instance_status(), before.instance);
        assert_eq!(orch.service_status(), before.service);
        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert!(notice.message.contains("Remote Instance is Unreachable"));

        // Freshness was not restarted by the failed fetch
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!orch.is_fresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_failure_is_unknown() {
        let (orch, sim) = setup(SimulatedBackend::new().running(S::Running), ControlConfig::default()).await;
        sim.inject("/service_status", Fault::Transport("timed out".to_string()));
        let mut notices = orch.notices();

        orch.refresh().await.unwrap();
        assert_eq!(orch.instance_status().state(), I::Running);
        assert_eq!(orch.service_status().state, S::Unknown);
        assert!(orch.is_fresh());
        assert_eq!(notices.try_recv().unwrap().title, "Service status error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_service_mode() {
        let config = ControlConfig {
            service_status_mode: ServiceStatusMode::Derived,
            ..Default::default()
        };
        let (orch, sim) = setup(SimulatedBackend::new().running(S::Stopped), config).await;
        orch.refresh().await.unwrap();

        assert_eq!(orch.service_status().state, S::Running);
        assert_eq!(sim.call_count("/service_status"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_clears_ip() {
        let (orch, _sim) = setup(
            SimulatedBackend::new()
                .running(S::Stopped)
                .with_shutdown_time(Duration::from_secs(1)),
            ControlConfig::default(),
        )
        .await;
        orch.refresh().await.unwrap();
        assert!(orch.instance_status().ip_address().is_some());

        orch.stop_instance().unwrap().reconciled().await;
        assert_eq!(orch.instance_status().state(), I::Stopped);
        assert_eq!(orch.instance_status().ip_address(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_action_rejected_not_queued() {
        let (orch, sim) = setup(
            SimulatedBackend::new().with_latency(Duration::from_millis(500)),
            ControlConfig::default(),
        )
        .await;
        orch.refresh().await.unwrap();

        let first = orch.start_instance().unwrap();
        match orch.start_instance() {
            Err(Error::ActionRejected { action, reason }) => {
                assert_eq!(action, ActionKind::StartInstance);
                assert!(reason.contains("in progress"));
            }
            other => panic!("unexpected {:?}", other.map(|h| h.action())),
        }
        assert!(orch.stop_service().is_err());

        first.reconciled().await;
        assert_eq!(sim.call_count("/start_instance"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_status_blocks_actions() {
        let (orch, _sim) = setup(SimulatedBackend::new(), ControlConfig::default()).await;
        orch.refresh().await.unwrap();
        assert!(orch.flags().instance_active);

        let mut views = orch.subscribe();
        views.borrow_and_update();
        tokio::time::advance(Duration::from_secs(30)).await;

        // Expiry republishes the view
        views.changed().await.unwrap();
        assert!(!views.borrow().fresh);
        assert_eq!(views.borrow().flags, PermissionFlags::default());
        assert!(orch.start_instance().is_err());

        orch.refresh().await.unwrap();
        assert!(orch.start_instance().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lenient_gating_ignores_freshness() {
        let config = ControlConfig {
            require_fresh_status: false,
            ..Default::default()
        };
        let (orch, _sim) = setup(SimulatedBackend::new(), config).await;
        orch.refresh().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(!orch.is_fresh());
        assert!(orch.flags().instance_active);
        assert!(orch.start_instance().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_flag() {
        let (orch, _sim) = setup(
            SimulatedBackend::new().with_latency(Duration::from_secs(1)),
            ControlConfig::default(),
        )
        .await;
        let pending = orch.spawn_refresh();
        tokio::task::yield_now().await;
        assert!(orch.view().loading);

        pending.await.unwrap().unwrap();
        assert!(!orch.view().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_result_discarded_when_newer_action_dispatched() {
        let (orch, sim) = setup(
            SimulatedBackend::new()
                .running(S::Stopped)
                .with_latency(Duration::from_secs(2)),
            ControlConfig::default(),
        )
        .await;
        orch.refresh().await.unwrap();
        assert_eq!(sim.call_count("/instance_status"), 1);

        let first = orch.start_service().unwrap();

        // Wait until the reconciliation fetch is on the wire
        while sim.call_count("/instance_status") < 2 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sim.inject(
            "/service_status",
            Fault::Status {
                status: 200,
                body: serde_json::json!({"status": "success", "state": "running"}),
            },
        );
        let second = orch.stop_service().unwrap();

        first.reconciled().await;
        // The poll completed but a newer action owns the state now
        assert_eq!(sim.call_count("/service_status"), 2);
        assert_eq!(orch.service_status().state, S::Stopped);

        second.reconciled().await;
        assert_eq!(sim.call_count("/instance_status"), 3);
        assert_eq!(orch.service_status().state, S::Stopped);
        assert_eq!(orch.instance_status().state(), I::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down() {
        let (orch, sim) = setup(SimulatedBackend::new(), ControlConfig::default()).await;
        orch.refresh().await.unwrap();
        let views = orch.subscribe();

        let handle = orch.start_instance().unwrap();
        let copy = orch.clone();
        drop(orch);
        assert!(!copy.is_shut_down());

        let mut unlocked = copy.subscribe();
        unlocked.wait_for(|v| v.action_lock.is_none()).await.unwrap();
        drop(unlocked);
        drop(copy);

        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.reconciled().await;
        assert_eq!(sim.call_count("/instance_status"), 1);
        assert_eq!(views.borrow().instance.state(), I::Pending);
    }
}
