//! Hatohol common types, IDs, and errors.
//!
//! This crate provides foundational types shared across hatohol-core modules:
//! - Server, tracker, and user identity types
//! - Monitoring data shared by pollers and incident senders
//! - Common error types

pub mod error;
pub mod id;
pub mod monitoring;

pub use error::{Error, ErrorCategory, Result};
pub use id::{EventId, ServerId, TrackerId, TriggerId, UserId};
pub use monitoring::{EventInfo, EventType, IncidentInfo, Severity, TriggerStatus};
