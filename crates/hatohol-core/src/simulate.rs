//! Dry runs of configured arms against scripted poll outcomes.
//!
//! Each step runs one arm iteration on the calling thread, so a script of
//! `n` outcomes produces exactly `n` snapshots with no sleeping involved.

use std::sync::Arc;

use hatohol_common::ServerId;
use serde::Serialize;

use crate::arm::{Arm, ArmError, ArmInfo, PollResult, SlotSnapshot, SlotStatus};
use crate::config::{ArmConfig, HatoholConfig};
use crate::memory::{MemorySelfMonitorStore, ScriptedFetcher};

/// Escalation table after one step.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStep {
    pub step: usize,
    pub result: PollResult,
    pub slots: Vec<SlotSnapshot>,
}

/// Outcome of simulating one arm.
#[derive(Debug, Clone, Serialize)]
pub struct ArmSimulation {
    pub server_id: ServerId,
    pub name: String,
    pub steps: Vec<SimulationStep>,
    pub records_written: usize,
    pub events_written: usize,
    pub status: ArmInfo,
}

impl ArmSimulation {
    /// Whether the final table has any slot in PROBLEM.
    pub fn has_problems(&self) -> bool {
        self.steps.last().is_some_and(|step| {
            step.slots
                .iter()
                .any(|slot| slot.status == SlotStatus::Problem)
        })
    }
}

pub fn simulate_arm(config: &ArmConfig, script: &[PollResult]) -> Result<ArmSimulation, ArmError> {
    let store = Arc::new(MemorySelfMonitorStore::new());
    let fetcher = ScriptedFetcher::new(config.slot_specs()).with_script(script.iter().copied());
    let arm = Arm::new(config.target(), Box::new(fetcher), store.clone());

    let mut steps = Vec::with_capacity(script.len());
    for step in 1..=script.len() {
        let result = arm.poll_once()?;
        steps.push(SimulationStep {
            step,
            result,
            slots: arm.escalation_snapshot(),
        });
    }

    Ok(ArmSimulation {
        server_id: arm.server_id(),
        name: arm.name().to_string(),
        steps,
        records_written: store.records().len(),
        events_written: store.events().len(),
        status: arm.status().info(),
    })
}

/// Simulate every configured arm, or a single default arm when none are.
pub fn simulate(config: &HatoholConfig, script: &[PollResult]) -> Result<Vec<ArmSimulation>, ArmError> {
    if config.arms.is_empty() {
        let arm = ArmConfig::new(ServerId(1), "simulated");
        return Ok(vec![simulate_arm(&arm, script)?]);
    }
    config
        .arms
        .iter()
        .map(|arm| simulate_arm(arm, script))
        .collect()
}
