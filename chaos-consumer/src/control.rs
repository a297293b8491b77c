use std::sync::Arc;

use serde::Serialize;

use crate::counters::RuntimeCounters;
use crate::fault::{FaultConfig, FaultSettings};
use crate::lifecycle::{LifecycleManager, LifecycleState};

/// Result of a `pause()` or `resume()` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransition {
    pub previous_state: LifecycleState,
    pub current_state: LifecycleState,
    pub last_sequence_number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub state_code: u8,
    pub last_sequence_number: i64,
    pub total_messages_received: u64,
}

/// Operator commands. Cheap to clone; every clone drives the same lifecycle, fault
/// parameters and counters.
#[derive(Clone)]
pub struct ControlService {
    lifecycle: Arc<LifecycleManager>,
    faults: Arc<FaultConfig>,
    counters: Arc<RuntimeCounters>,
}

impl ControlService {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        faults: Arc<FaultConfig>,
        counters: Arc<RuntimeCounters>,
    ) -> Self {
        Self {
            lifecycle,
            faults,
            counters,
        }
    }

    /// Blocks while the broker pause runs.
    pub fn pause(&self) -> LifecycleTransition {
        let previous_state = self.lifecycle.state();
        let current_state = self.lifecycle.pause();
        self.transition(previous_state, current_state)
    }

    pub fn resume(&self) -> LifecycleTransition {
        let previous_state = self.lifecycle.state();
        let current_state = self.lifecycle.resume();
        self.transition(previous_state, current_state)
    }

    pub fn status(&self) -> LifecycleStatus {
        let state = self.lifecycle.state();
        LifecycleStatus {
            state,
            state_code: state.code(),
            last_sequence_number: self.counters.last_sequence_number(),
            total_messages_received: self.counters.total_messages_received(),
        }
    }

    pub fn faults(&self) -> FaultSettings {
        self.faults.snapshot()
    }

    pub fn set_processing_delay_ms(&self, delay_ms: u64) -> u64 {
        self.faults.set_processing_delay_ms(delay_ms);
        delay_ms
    }

    /// Returns the clamped rate actually applied.
    pub fn set_error_rate_percent(&self, percent: i64) -> u8 {
        self.faults.set_error_rate_percent(percent)
    }

    pub fn set_commit_delay_ms(&self, delay_ms: u64) -> u64 {
        self.faults.set_commit_delay_ms(delay_ms);
        delay_ms
    }

    pub fn set_poll_timeout_exceed(&self, enabled: bool) -> bool {
        self.faults.set_poll_timeout_exceed(enabled);
        enabled
    }

    fn transition(
        &self,
        previous_state: LifecycleState,
        current_state: LifecycleState,
    ) -> LifecycleTransition {
        LifecycleTransition {
            previous_state,
            current_state,
            last_sequence_number: self.counters.last_sequence_number(),
        }
    }
}
