//! Hatohol core library.
//!
//! This library provides:
//! - Per-server polling state machines ("arms") with self-monitor trigger
//!   escalation
//! - Per-tracker incident send queues with bounded retry
//! - Store capabilities and in-memory implementations
//! - Configuration loading and structured logging
//!
//! The binary entry point is in `main.rs`.

pub mod arm;
pub mod config;
pub mod exit_codes;
pub mod incident;
pub mod logging;
pub mod memory;
pub mod simulate;
pub mod store;

pub use arm::{Arm, ArmError, PollingTarget};
pub use incident::{IncidentSender, IncidentSenderManager};
pub use store::{IncidentStore, SelfMonitorStore};
