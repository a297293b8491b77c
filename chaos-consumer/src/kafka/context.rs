use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{debug, error, warn};

use crate::error::ContainerError;
use crate::metrics_consts::KAFKA_ERRORS_COUNTER;
use crate::rebalance::{Partition, PartitionPauser, RebalanceHandler};

/// rdkafka context shared by every consumer thread. Rebalance callbacks run inside
/// `poll()` on whichever member is being rebalanced.
pub struct ChaosConsumerContext {
    rebalance_handler: Arc<dyn RebalanceHandler>,
}

impl ChaosConsumerContext {
    pub fn new(rebalance_handler: Arc<dyn RebalanceHandler>) -> Self {
        Self { rebalance_handler }
    }
}

/// Broker pause primitive of a single member, lent to the rebalance handler.
pub struct MemberPauser<'a>(pub &'a BaseConsumer<ChaosConsumerContext>);

impl PartitionPauser for MemberPauser<'_> {
    fn pause_partitions(&self, partitions: &[Partition]) -> Result<(), ContainerError> {
        self.0
            .pause(&partition_list(partitions))
            .map_err(ContainerError::Pause)
    }
}

pub fn partition_list(partitions: &[Partition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition_number());
    }
    tpl
}

pub fn partitions_of(tpl: &TopicPartitionList) -> Vec<Partition> {
    tpl.elements().into_iter().map(Partition::from).collect()
}

impl ClientContext for ChaosConsumerContext {}

impl ConsumerContext for ChaosConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                debug!(count = partitions.count(), "Pre-rebalance revoke event");
            }
            Rebalance::Assign(partitions) => {
                debug!(count = partitions.count(), "Pre-rebalance assign event");
            }
            Rebalance::Error(e) => {
                metrics::counter!(KAFKA_ERRORS_COUNTER, "stage" => "rebalance").increment(1);
                error!(error = %e, "Rebalance error");
            }
        }
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                // The pause must land before this callback returns, otherwise the next
                // poll() fetches from the new partitions.
                self.rebalance_handler.on_partitions_assigned(
                    &partitions_of(partitions),
                    &MemberPauser(base_consumer),
                );
            }
            Rebalance::Revoke(partitions) => {
                self.rebalance_handler
                    .on_partitions_revoked_after_commit(&partitions_of(partitions));
            }
            Rebalance::Error(e) => {
                error!(error = %e, "Post-rebalance error");
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(count = offsets.count(), "Committed offsets"),
            Err(e) => warn!(count = offsets.count(), error = %e, "Failed to commit offsets"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_list_round_trips_through_rdkafka() {
        let partitions = vec![
            Partition::new("bg-test-topic", 0),
            Partition::new("bg-test-topic", 3),
        ];

        let tpl = partition_list(&partitions);

        assert_eq!(tpl.count(), 2);
        assert_eq!(partitions_of(&tpl), partitions);
    }

    #[test]
    fn empty_partition_list_has_no_elements() {
        let tpl = partition_list(&[]);
        assert_eq!(tpl.count(), 0);
        assert!(partitions_of(&tpl).is_empty());
    }
}
