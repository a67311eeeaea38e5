//! FSQSB control client
//!
//! Drives a single remote game-server machine through a signed JSON API:
//! login, status polling, and the start/stop lifecycle of both the
//! instance and the service running on it.

pub mod client;
pub mod commands;
pub mod config;
pub mod freshness;
pub mod orchestrator;
pub mod output;
pub mod simulator;
pub mod transport;

pub use client::RequestClient;
pub use config::{ControlConfig, ReconcileConfig, ServiceStatusMode};
pub use freshness::FreshnessTracker;
pub use orchestrator::{ActionHandle, DashboardView, LifecycleOrchestrator, Notice, NoticeLevel, PermissionFlags};
pub use simulator::{Fault, SimulatedBackend};
pub use transport::{HttpTransport, RawResponse, Transport};
