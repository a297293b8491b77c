use std::fmt;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use rdkafka::topic_partition_list::TopicPartitionListElem;
use tracing::{error, info};

use crate::counters::RuntimeCounters;
use crate::error::ContainerError;
use crate::lifecycle::{LifecycleState, SharedLifecycleState};
use crate::metrics_consts::REBALANCE_COUNTER;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

/// Broker-level pause on an explicit set of partitions, handed to the rebalance handler
/// by the broker client for the duration of a callback.
#[cfg_attr(test, automock)]
pub trait PartitionPauser {
    fn pause_partitions(&self, partitions: &[Partition]) -> Result<(), ContainerError>;
}

/// What the coordinator decided for one assignment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentOutcome {
    pub observed_state: LifecycleState,
    pub repaused: bool,
}

/// Rebalance callbacks registered with the broker client. Implementations run on the
/// group coordination thread, concurrently with record processing on other members.
pub trait RebalanceHandler: Send + Sync {
    /// `partitions` holds only the newly assigned partitions.
    fn on_partitions_assigned(
        &self,
        partitions: &[Partition],
        pauser: &dyn PartitionPauser,
    ) -> AssignmentOutcome;

    /// Called once the broker client has finished committing for the revoked partitions.
    fn on_partitions_revoked_after_commit(&self, partitions: &[Partition]);
}

/// Re-applies the operator's pause to partitions that arrive through a rebalance.
///
/// Broker-level pause does not survive reassignment: a newly assigned partition always
/// starts fetching. While the lifecycle is `PAUSED` or `DRAINING`, the new partitions are
/// paused before the callback returns.
pub struct PauseAwareRebalanceCoordinator {
    state: SharedLifecycleState,
    counters: Arc<RuntimeCounters>,
}

impl PauseAwareRebalanceCoordinator {
    pub fn new(state: SharedLifecycleState, counters: Arc<RuntimeCounters>) -> Self {
        Self { state, counters }
    }
}

fn partition_numbers(partitions: &[Partition]) -> Vec<i32> {
    partitions.iter().map(Partition::partition_number).collect()
}

impl RebalanceHandler for PauseAwareRebalanceCoordinator {
    fn on_partitions_assigned(
        &self,
        partitions: &[Partition],
        pauser: &dyn PartitionPauser,
    ) -> AssignmentOutcome {
        self.counters.record_rebalance();
        metrics::counter!(REBALANCE_COUNTER).increment(1);

        let observed_state = self.state.get();
        let numbers = partition_numbers(partitions);

        // Cooperative rebalances deliver empty assignments when membership changes elsewhere.
        if !observed_state.holds_partitions_paused() || partitions.is_empty() {
            info!(partitions = ?numbers, repaused = false, state = %observed_state, "Partitions assigned");
            return AssignmentOutcome {
                observed_state,
                repaused: false,
            };
        }

        let repaused = match pauser.pause_partitions(partitions) {
            Ok(()) => {
                info!(
                    partitions = ?numbers,
                    repaused = true,
                    state = %observed_state,
                    "Partitions assigned - re-paused due to lifecycle state"
                );
                true
            }
            Err(e) => {
                error!(
                    partitions = ?numbers,
                    state = %observed_state,
                    error = ?e,
                    "Failed to re-pause newly assigned partitions"
                );
                false
            }
        };

        AssignmentOutcome {
            observed_state,
            repaused,
        }
    }

    fn on_partitions_revoked_after_commit(&self, partitions: &[Partition]) {
        if partitions.is_empty() {
            return;
        }
        info!(
            partitions = ?partition_numbers(partitions),
            state = %self.state.get(),
            "Partitions revoked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn coordinator(state: LifecycleState) -> (PauseAwareRebalanceCoordinator, Arc<RuntimeCounters>) {
        let counters = Arc::new(RuntimeCounters::new());
        (
            PauseAwareRebalanceCoordinator::new(SharedLifecycleState::new(state), counters.clone()),
            counters,
        )
    }

    fn assigned() -> Vec<Partition> {
        vec![
            Partition::new("bg-test-topic", 2),
            Partition::new("bg-test-topic", 5),
        ]
    }

    #[test_case(LifecycleState::Paused; "paused")]
    #[test_case(LifecycleState::Draining; "draining")]
    fn repauses_exactly_the_new_partitions(state: LifecycleState) {
        let (coordinator, counters) = coordinator(state);
        let mut pauser = MockPartitionPauser::new();
        pauser
            .expect_pause_partitions()
            .withf(|partitions| partitions == assigned().as_slice())
            .times(1)
            .returning(|_| Ok(()));

        let outcome = coordinator.on_partitions_assigned(&assigned(), &pauser);

        assert_eq!(
            outcome,
            AssignmentOutcome {
                observed_state: state,
                repaused: true,
            }
        );
        assert_eq!(counters.rebalance_count(), 1);
    }

    #[test]
    fn active_assignment_only_counts() {
        let (coordinator, counters) = coordinator(LifecycleState::Active);
        let mut pauser = MockPartitionPauser::new();
        pauser.expect_pause_partitions().never();

        let outcome = coordinator.on_partitions_assigned(&assigned(), &pauser);

        assert!(!outcome.repaused);
        assert_eq!(outcome.observed_state, LifecycleState::Active);
        assert_eq!(counters.rebalance_count(), 1);
    }

    #[test]
    fn empty_assignment_counts_without_pausing() {
        let (coordinator, counters) = coordinator(LifecycleState::Paused);
        let mut pauser = MockPartitionPauser::new();
        pauser.expect_pause_partitions().never();

        let outcome = coordinator.on_partitions_assigned(&[], &pauser);

        assert!(!outcome.repaused);
        assert_eq!(counters.rebalance_count(), 1);
    }

    #[test]
    fn failed_repause_is_reported() {
        let (coordinator, counters) = coordinator(LifecycleState::Paused);
        let mut pauser = MockPartitionPauser::new();
        pauser.expect_pause_partitions().times(1).returning(|_| {
            Err(ContainerError::Pause(
                rdkafka::error::KafkaError::PauseResume("unknown partition".to_string()),
            ))
        });

        let outcome = coordinator.on_partitions_assigned(&assigned(), &pauser);

        assert!(!outcome.repaused);
        assert_eq!(counters.rebalance_count(), 1);
    }

    #[test]
    fn state_change_is_seen_by_next_assignment() {
        let counters = Arc::new(RuntimeCounters::new());
        let state = SharedLifecycleState::new(LifecycleState::Active);
        let coordinator = PauseAwareRebalanceCoordinator::new(state.clone(), counters.clone());
        let mut pauser = MockPartitionPauser::new();
        pauser.expect_pause_partitions().times(1).returning(|_| Ok(()));

        assert!(!coordinator.on_partitions_assigned(&assigned(), &pauser).repaused);
        state.set(LifecycleState::Paused);
        assert!(coordinator.on_partitions_assigned(&assigned(), &pauser).repaused);
        assert_eq!(counters.rebalance_count(), 2);
    }

    #[test]
    fn revocation_is_observability_only() {
        let (coordinator, counters) = coordinator(LifecycleState::Paused);

        coordinator.on_partitions_revoked_after_commit(&assigned());

        assert_eq!(counters.rebalance_count(), 0);
    }
}
