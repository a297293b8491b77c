use rdkafka::error::KafkaError;
use thiserror::Error;

/// Errors raised by the broker-level pause and resume primitives.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("failed to read the current partition assignment")]
    Assignment(#[source] KafkaError),
    #[error("failed to pause partitions")]
    Pause(#[source] KafkaError),
    #[error("failed to resume partitions")]
    Resume(#[source] KafkaError),
}

/// An acknowledgment (offset commit) could not be submitted.
#[derive(Error, Debug)]
pub enum AckError {
    #[error("failed to commit offset {offset} for partition {partition}")]
    Commit {
        partition: i32,
        offset: i64,
        #[source]
        source: KafkaError,
    },
    #[error("acknowledgment panicked: {0}")]
    Panicked(String),
}

/// Unexpected failures while processing a record. These are caught at the consumption loop
/// boundary, counted and acknowledged, never propagated to the consuming thread.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("acknowledgment failed")]
    Acknowledge(#[from] AckError),
    #[error("processing panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to create kafka consumer {member}")]
    CreateConsumer {
        member: usize,
        #[source]
        source: KafkaError,
    },
    #[error("failed to subscribe to topic {topic}")]
    Subscribe {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("failed to spawn consumer thread {member}")]
    SpawnThread {
        member: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("consumer concurrency must be at least 1")]
    NoConsumers,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown lifecycle state: {0}")]
pub struct ParseLifecycleStateError(pub String);
