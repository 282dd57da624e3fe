//! Semantic checks that serde cannot express.

use std::collections::HashSet;

use hatohol_common::ServerId;
use thiserror::Error;

use super::HatoholConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("arm {server_id}: polling_interval_secs must be positive")]
    ZeroPollingInterval { server_id: ServerId },

    #[error("arm {server_id}: retry_interval_secs must be positive")]
    ZeroRetryInterval { server_id: ServerId },

    #[error("arm {server_id}: name must not be empty")]
    EmptyName { server_id: ServerId },

    #[error("arm {server_id} is configured more than once")]
    DuplicateServer { server_id: ServerId },

    #[error("arm {server_id}: failure slot {slot} listed twice")]
    DuplicateSlot { server_id: ServerId, slot: String },

    #[error("incident_sender.retry_interval_ms must be positive")]
    ZeroSendRetryInterval,
}

/// Return the first problem found, if any.
pub fn validate_config(config: &HatoholConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for arm in &config.arms {
        let server_id = arm.server_id;
        if !seen.insert(server_id) {
            return Err(ValidationError::DuplicateServer { server_id });
        }
        if arm.name.trim().is_empty() {
            return Err(ValidationError::EmptyName { server_id });
        }
        if arm.polling_interval_secs == 0 {
            return Err(ValidationError::ZeroPollingInterval { server_id });
        }
        if arm.retry_interval_secs == 0 {
            return Err(ValidationError::ZeroRetryInterval { server_id });
        }
        if let Some(slots) = &arm.failure_slots {
            let mut kinds = HashSet::new();
            for kind in slots {
                if !kinds.insert(*kind) {
                    return Err(ValidationError::DuplicateSlot {
                        server_id,
                        slot: kind.to_string(),
                    });
                }
            }
        }
    }
    if config.incident_sender.retry_interval_ms == 0 {
        return Err(ValidationError::ZeroSendRetryInterval);
    }
    Ok(())
}
