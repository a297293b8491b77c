use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ContainerError, ParseLifecycleStateError};
use crate::metrics_consts::LIFECYCLE_STATE_GAUGE;

/// Operator-controlled consumption mode. Each variant carries a stable code used for
/// external reporting; behavior never depends on the ordering of the codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Active,
    Draining,
    Paused,
}

impl LifecycleState {
    pub const fn code(self) -> u8 {
        match self {
            LifecycleState::Active => 0,
            LifecycleState::Draining => 1,
            LifecycleState::Paused => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Draining => "DRAINING",
            LifecycleState::Paused => "PAUSED",
        }
    }

    /// Whether partitions handed to this consumer should be paused at the broker.
    pub const fn holds_partitions_paused(self) -> bool {
        matches!(self, LifecycleState::Paused | LifecycleState::Draining)
    }

    /// Parse the startup state, falling back to `ACTIVE` on anything unrecognized.
    pub fn parse_or_active(raw: &str) -> Self {
        match raw.parse() {
            Ok(state) => state,
            Err(e) => {
                warn!(initial_state = raw, error = %e, "Invalid initial state, defaulting to ACTIVE");
                LifecycleState::Active
            }
        }
    }

    // The cell only ever holds codes written through `code()`.
    fn from_code(code: u8) -> Self {
        match code {
            2 => LifecycleState::Paused,
            1 => LifecycleState::Draining,
            _ => LifecycleState::Active,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = ParseLifecycleStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(LifecycleState::Active),
            "DRAINING" => Ok(LifecycleState::Draining),
            "PAUSED" => Ok(LifecycleState::Paused),
            _ => Err(ParseLifecycleStateError(s.to_string())),
        }
    }
}

/// The single lifecycle cell for the process. Cloning shares the cell, it never copies
/// the state: every clone observes every write immediately.
#[derive(Debug, Clone)]
pub struct SharedLifecycleState {
    cell: Arc<AtomicU8>,
}

impl SharedLifecycleState {
    pub fn new(initial: LifecycleState) -> Self {
        report_state(initial);
        Self {
            cell: Arc::new(AtomicU8::new(initial.code())),
        }
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_code(self.cell.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: LifecycleState) {
        self.cell.store(state.code(), Ordering::SeqCst);
        report_state(state);
    }

    /// Atomically move from `current` to `new`. Returns false if another writer got there
    /// first.
    pub fn compare_and_set(&self, current: LifecycleState, new: LifecycleState) -> bool {
        let swapped = self
            .cell
            .compare_exchange(
                current.code(),
                new.code(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if swapped {
            report_state(new);
        }
        swapped
    }
}

fn report_state(state: LifecycleState) {
    metrics::gauge!(LIFECYCLE_STATE_GAUGE).set(f64::from(state.code()));
}

/// Broker-level controls over every partition currently assigned to this process.
#[cfg_attr(test, automock)]
pub trait ListenerContainer: Send + Sync {
    /// Pause fetching on all currently assigned partitions. May block on the broker client.
    fn pause(&self) -> Result<(), ContainerError>;

    /// Resume fetching on all currently assigned partitions.
    fn resume(&self) -> Result<(), ContainerError>;

    fn is_running(&self) -> bool;

    /// True between a `pause()` and the next `resume()`.
    fn is_pause_requested(&self) -> bool;
}

/// Drives the `ACTIVE -> DRAINING -> PAUSED` and `PAUSED -> ACTIVE` transitions.
///
/// There is no lock around a transition: concurrent `pause()` callers race on the
/// `ACTIVE -> DRAINING` compare-and-set and only the winner touches the broker.
pub struct LifecycleManager {
    state: SharedLifecycleState,
    container: Arc<dyn ListenerContainer>,
}

impl LifecycleManager {
    pub fn new(state: SharedLifecycleState, container: Arc<dyn ListenerContainer>) -> Self {
        Self { state, container }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Returns the state after the call. `DRAINING` is visible to other readers while the
    /// broker pause runs.
    pub fn pause(&self) -> LifecycleState {
        let current = self.state.get();
        if current.holds_partitions_paused() {
            info!(state = %current, "Consumer already {current}");
            return current;
        }

        if !self
            .state
            .compare_and_set(LifecycleState::Active, LifecycleState::Draining)
        {
            debug!("Concurrent pause won the ACTIVE -> DRAINING transition");
            return self.state.get();
        }
        info!(from = "ACTIVE", to = "DRAINING", "Lifecycle state changed");

        self.pause_container();

        self.state.set(LifecycleState::Paused);
        info!(from = "DRAINING", to = "PAUSED", "Lifecycle state changed");
        LifecycleState::Paused
    }

    /// Returns the state after the call, always `ACTIVE`.
    pub fn resume(&self) -> LifecycleState {
        let current = self.state.get();
        if current == LifecycleState::Active {
            info!("Consumer already ACTIVE");
            return current;
        }

        if self.container.is_pause_requested() || !self.container.is_running() {
            match self.container.resume() {
                Ok(()) => info!("Kafka listener container resumed"),
                Err(e) => error!(error = ?e, "Failed to resume kafka listener container"),
            }
        }

        self.state.set(LifecycleState::Active);
        info!(from = %current, to = "ACTIVE", "Lifecycle state changed");
        LifecycleState::Active
    }

    /// Re-apply the broker pause for a process that started in `PAUSED`.
    pub fn apply_initial_state(&self) {
        if self.state.get() == LifecycleState::Paused {
            self.pause_container();
            info!("Consumer started in PAUSED state");
        }
    }

    fn pause_container(&self) {
        if !self.container.is_running() {
            warn!("Kafka listener container not running, skipping broker pause");
            return;
        }
        match self.container.pause() {
            Ok(()) => info!("Kafka listener container paused"),
            Err(e) => error!(error = ?e, "Failed to pause kafka listener container"),
        }
    }
}
