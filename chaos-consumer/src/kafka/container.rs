use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{error, info, warn};

use crate::consumer::{Acknowledgment, ConsumptionLoop, RecordOutcome};
use crate::error::{AckError, ContainerError, StartupError};
use crate::kafka::config::member_config;
use crate::kafka::context::ChaosConsumerContext;
use crate::lifecycle::ListenerContainer;
use crate::message::InboundRecord;
use crate::metrics_consts::KAFKA_ERRORS_COUNTER;
use crate::rebalance::RebalanceHandler;
use crate::shutdown::ShutdownSignal;

type Member = BaseConsumer<ChaosConsumerContext>;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ContainerSettings {
    pub topic: String,
    pub concurrency: usize,
    pub poll_timeout: Duration,
    /// Base static membership id; member `i` joins as `{id}-{i}`.
    pub group_instance_id: Option<String>,
}

/// N consumer group members, each polled on its own OS thread.
///
/// Records are handled synchronously on the polling thread, so a fault delay keeps that
/// member from polling for its whole duration.
pub struct KafkaListenerContainer {
    members: Vec<Arc<Member>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    pause_requested: AtomicBool,
    shutdown: ShutdownSignal,
}

impl KafkaListenerContainer {
    /// Create and subscribe every member, then start one polling thread per member.
    pub fn start(
        client_config: &ClientConfig,
        settings: ContainerSettings,
        rebalance_handler: Arc<dyn RebalanceHandler>,
        consumption: ConsumptionLoop,
        shutdown: ShutdownSignal,
    ) -> Result<Self, StartupError> {
        if settings.concurrency == 0 {
            return Err(StartupError::NoConsumers);
        }

        let mut members = Vec::with_capacity(settings.concurrency);
        for member in 0..settings.concurrency {
            let consumer: Member =
                member_config(client_config, settings.group_instance_id.as_deref(), member)
                    .create_with_context(ChaosConsumerContext::new(rebalance_handler.clone()))
                    .map_err(|source| StartupError::CreateConsumer { member, source })?;
            consumer
                .subscribe(&[settings.topic.as_str()])
                .map_err(|source| StartupError::Subscribe {
                    topic: settings.topic.clone(),
                    source,
                })?;
            members.push(Arc::new(consumer));
        }

        let container = Self {
            members,
            threads: Mutex::new(Vec::with_capacity(settings.concurrency)),
            running: AtomicBool::new(true),
            pause_requested: AtomicBool::new(false),
            shutdown,
        };

        for (member, consumer) in container.members.iter().enumerate() {
            let worker = MemberWorker {
                member,
                consumer: consumer.clone(),
                consumption: consumption.clone(),
                shutdown: container.shutdown.clone(),
                poll_timeout: settings.poll_timeout,
            };
            let handle = thread::Builder::new()
                .name(format!("chaos-consumer-{member}"))
                .spawn(move || worker.run());
            match handle {
                Ok(handle) => container.lock_threads().push(handle),
                Err(source) => {
                    container.stop();
                    return Err(StartupError::SpawnThread { member, source });
                }
            }
        }

        info!(
            topic = %settings.topic,
            concurrency = settings.concurrency,
            "Kafka listener container started"
        );
        Ok(container)
    }

    /// Trigger shutdown, interrupting any fault delay, and join every polling thread.
    pub fn stop(&self) {
        self.shutdown.trigger();
        let threads: Vec<_> = self.lock_threads().drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Consumer thread panicked");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Kafka listener container stopped");
    }

    fn lock_threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListenerContainer for KafkaListenerContainer {
    fn pause(&self) -> Result<(), ContainerError> {
        self.pause_requested.store(true, Ordering::SeqCst);
        for consumer in &self.members {
            let assignment = consumer.assignment().map_err(ContainerError::Assignment)?;
            consumer.pause(&assignment).map_err(ContainerError::Pause)?;
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), ContainerError> {
        for consumer in &self.members {
            let assignment = consumer.assignment().map_err(ContainerError::Assignment)?;
            consumer.resume(&assignment).map_err(ContainerError::Resume)?;
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::SeqCst)
    }
}

struct MemberWorker {
    member: usize,
    consumer: Arc<Member>,
    consumption: ConsumptionLoop,
    shutdown: ShutdownSignal,
    poll_timeout: Duration,
}

impl MemberWorker {
    fn run(self) {
        info!(member = self.member, "Consumer thread started");

        while !self.shutdown.is_triggered() {
            match self.consumer.poll(self.poll_timeout) {
                None => {}
                Some(Err(e)) => {
                    metrics::counter!(KAFKA_ERRORS_COUNTER, "stage" => "poll").increment(1);
                    error!(member = self.member, error = %e, "Error polling kafka");
                }
                Some(Ok(message)) => self.dispatch(&message),
            }
        }

        info!(member = self.member, "Consumer thread stopped");
    }

    fn dispatch(&self, message: &BorrowedMessage<'_>) {
        let record = InboundRecord::decode(
            message.topic(),
            message.partition(),
            message.offset(),
            message.payload(),
        );
        let ack = KafkaAcknowledgment {
            consumer: &self.consumer,
            topic: &record.topic,
            partition: record.partition,
            offset: record.offset,
        };

        if needs_rewind(self.consumption.handle(&record, &ack)) {
            self.rewind(&record);
        }
    }

    /// Put a skipped record back so it is redelivered once the partition resumes. The seek
    /// drops anything already prefetched for the partition, so a record arriving after an
    /// earlier rewind is one the broker delivered again and must be rewound again.
    fn rewind(&self, record: &InboundRecord) {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&record.topic, record.partition);
        let result = self.consumer.pause(&tpl).and_then(|()| {
            self.consumer.seek(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset),
                SEEK_TIMEOUT,
            )
        });
        if let Err(e) = result {
            warn!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Failed to rewind skipped record"
            );
        }
    }
}

/// Every skipped record is rewound, however many pause cycles the partition has seen.
fn needs_rewind(outcome: RecordOutcome) -> bool {
    matches!(outcome, RecordOutcome::SkippedPaused)
}

/// Synchronous commit of `offset + 1` for one record.
struct KafkaAcknowledgment<'a> {
    consumer: &'a Member,
    topic: &'a str,
    partition: i32,
    offset: i64,
}

impl KafkaAcknowledgment<'_> {
    fn commit_error(&self, source: KafkaError) -> AckError {
        AckError::Commit {
            partition: self.partition,
            offset: self.offset,
            source,
        }
    }
}

impl Acknowledgment for KafkaAcknowledgment<'_> {
    fn acknowledge(&self) -> Result<(), AckError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| self.commit_error(e))?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| self.commit_error(e))
    }
}
