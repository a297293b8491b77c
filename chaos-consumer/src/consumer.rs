use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, warn};

use crate::counters::RuntimeCounters;
use crate::error::{AckError, ProcessingError};
use crate::fault::FaultInjector;
use crate::lifecycle::{LifecycleState, SharedLifecycleState};
use crate::message::{InboundRecord, TestMessage};
use crate::metrics_consts::{
    COMMIT_ERRORS_COUNTER, COMMIT_LATENCY_HISTOGRAM, LAST_SEQUENCE_NUMBER_GAUGE,
    MESSAGES_RECEIVED_COUNTER, NULL_MESSAGES_COUNTER, PROCESSING_ERRORS_COUNTER,
};

/// Manual offset commit for one delivered record.
#[cfg_attr(test, automock)]
pub trait Acknowledgment {
    fn acknowledge(&self) -> Result<(), AckError>;
}

/// How a single record left the consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Lifecycle was `PAUSED`: not acknowledged, left for redelivery.
    SkippedPaused,
    /// Value was absent or undecodable.
    AcknowledgedEmpty,
    SimulatedFailure,
    Processed,
    /// Processing raised an error or panicked; the record was still acknowledged.
    Failed,
}

/// Per-record orchestration: lifecycle check, fault stages, acknowledgment.
///
/// Every path except `SkippedPaused` ends in an acknowledgment. Nothing raised while
/// handling a record escapes to the polling thread.
#[derive(Debug, Clone)]
pub struct ConsumptionLoop {
    group_id: String,
    state: SharedLifecycleState,
    faults: FaultInjector,
    counters: Arc<RuntimeCounters>,
}

impl ConsumptionLoop {
    pub fn new(
        group_id: impl Into<String>,
        state: SharedLifecycleState,
        faults: FaultInjector,
        counters: Arc<RuntimeCounters>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            state,
            faults,
            counters,
        }
    }

    pub fn handle(&self, record: &InboundRecord, ack: &dyn Acknowledgment) -> RecordOutcome {
        if self.state.get() == LifecycleState::Paused {
            debug!(
                partition = record.partition,
                offset = record.offset,
                "Consumer paused, skipping record"
            );
            return RecordOutcome::SkippedPaused;
        }

        let Some(message) = record.value.as_ref() else {
            warn!(
                partition = record.partition,
                offset = record.offset,
                "Received null or undecodable message, acknowledging"
            );
            metrics::counter!(NULL_MESSAGES_COUNTER).increment(1);
            self.acknowledge_best_effort(record, ack);
            return RecordOutcome::AcknowledgedEmpty;
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.process(record, message, ack)))
            .unwrap_or_else(|payload| Err(ProcessingError::Panicked(panic_message(payload))));

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.counters.record_processing_error();
                metrics::counter!(
                    PROCESSING_ERRORS_COUNTER,
                    "group_id" => self.group_id.clone(),
                    "cause" => "unexpected"
                )
                .increment(1);
                error!(
                    sequence_number = message.sequence_number,
                    partition = record.partition,
                    offset = record.offset,
                    group_id = %self.group_id,
                    error = ?e,
                    "Unexpected error processing message"
                );
                self.acknowledge_best_effort(record, ack);
                RecordOutcome::Failed
            }
        }
    }

    fn process(
        &self,
        record: &InboundRecord,
        message: &TestMessage,
        ack: &dyn Acknowledgment,
    ) -> Result<RecordOutcome, ProcessingError> {
        self.faults.apply_poll_timeout_exceed();
        self.faults.apply_processing_delay();

        if self.faults.should_fail() {
            self.counters.record_processing_error();
            metrics::counter!(
                PROCESSING_ERRORS_COUNTER,
                "group_id" => self.group_id.clone(),
                "cause" => "simulated"
            )
            .increment(1);
            error!(
                sequence_number = message.sequence_number,
                partition = record.partition,
                offset = record.offset,
                group_id = %self.group_id,
                "Simulated processing failure"
            );
            ack.acknowledge()?;
            return Ok(RecordOutcome::SimulatedFailure);
        }

        self.counters.record_processed(message.sequence_number);
        metrics::counter!(MESSAGES_RECEIVED_COUNTER, "group_id" => self.group_id.clone()).increment(1);
        metrics::gauge!(LAST_SEQUENCE_NUMBER_GAUGE).set(message.sequence_number as f64);

        let commit_start = Instant::now();
        self.faults.apply_commit_delay();
        ack.acknowledge()?;
        let commit_latency = commit_start.elapsed();
        metrics::histogram!(COMMIT_LATENCY_HISTOGRAM, "group_id" => self.group_id.clone())
            .record(commit_latency.as_secs_f64() * 1000.0);

        info!(
            sequence_number = message.sequence_number,
            producer_id = %message.producer_id,
            partition = record.partition,
            offset = record.offset,
            commit_latency_ms = commit_latency.as_millis() as u64,
            "Message consumed"
        );
        Ok(RecordOutcome::Processed)
    }

    /// Last line of defence on the failure and empty paths: a panicking acknowledgment is
    /// logged like any other commit failure.
    fn acknowledge_best_effort(&self, record: &InboundRecord, ack: &dyn Acknowledgment) {
        let result = catch_unwind(AssertUnwindSafe(|| ack.acknowledge()))
            .unwrap_or_else(|payload| Err(AckError::Panicked(panic_message(payload))));
        if let Err(e) = result {
            metrics::counter!(COMMIT_ERRORS_COUNTER).increment(1);
            error!(
                partition = record.partition,
                offset = record.offset,
                error = ?e,
                "Failed to acknowledge record"
            );
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultConfig, FaultSettings};
    use crate::shutdown::ShutdownSignal;
    use chrono::Utc;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        consumption: ConsumptionLoop,
        state: SharedLifecycleState,
        faults: Arc<FaultConfig>,
        counters: Arc<RuntimeCounters>,
    }

    fn harness(settings: FaultSettings) -> Harness {
        let state = SharedLifecycleState::new(LifecycleState::Active);
        let faults = Arc::new(FaultConfig::new(settings));
        let counters = Arc::new(RuntimeCounters::new());
        let injector = FaultInjector::new(
            faults.clone(),
            ShutdownSignal::new(),
            Duration::from_secs(360),
        );
        Harness {
            consumption: ConsumptionLoop::new(
                "bg-test-group",
                state.clone(),
                injector,
                counters.clone(),
            ),
            state,
            faults,
            counters,
        }
    }

    fn record(sequence_number: i64) -> InboundRecord {
        InboundRecord {
            topic: "bg-test-topic".to_string(),
            partition: 0,
            offset: sequence_number,
            value: Some(TestMessage {
                sequence_number,
                producer_id: "producer-1".to_string(),
                timestamp: Utc::now(),
                partition: 0,
                payload: vec![1, 2, 3],
            }),
        }
    }

    fn counter_value(snapshotter: &Snapshotter, name: &str) -> Option<u64> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == name)
            .and_then(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => Some(v),
                _ => None,
            })
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Runs `f` with a thread-local debugging recorder and JSON log capture.
    fn observed<T>(f: impl FnOnce() -> T) -> (T, Snapshotter, String) {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || {
            metrics::with_local_recorder(&recorder, f)
        });
        (result, snapshotter, logs.contents())
    }

    fn acks(times: usize) -> MockAcknowledgment {
        let mut ack = MockAcknowledgment::new();
        ack.expect_acknowledge().times(times).returning(|| Ok(()));
        ack
    }

    #[test]
    fn processed_record_updates_counters_and_acknowledges() {
        let h = harness(FaultSettings::default());

        let outcome = h.consumption.handle(&record(17), &acks(1));

        assert_eq!(outcome, RecordOutcome::Processed);
        assert_eq!(h.counters.last_sequence_number(), 17);
        assert_eq!(h.counters.total_messages_received(), 1);
        assert_eq!(h.counters.processing_errors(), 0);
    }

    #[test]
    fn full_error_rate_fails_and_acknowledges_every_record() {
        let h = harness(FaultSettings::default());
        h.counters.record_processed(5);
        h.faults.set_error_rate_percent(100);
        let ack = acks(10);

        for seq in 100..110 {
            assert_eq!(
                h.consumption.handle(&record(seq), &ack),
                RecordOutcome::SimulatedFailure
            );
        }

        assert_eq!(h.counters.processing_errors(), 10);
        assert_eq!(h.counters.last_sequence_number(), 5);
        assert_eq!(h.counters.total_messages_received(), 1);
    }

    #[test]
    fn processing_delay_precedes_acknowledgment() {
        let h = harness(FaultSettings {
            processing_delay_ms: 50,
            ..Default::default()
        });
        let start = Instant::now();
        let mut ack = MockAcknowledgment::new();
        ack.expect_acknowledge().times(1).returning(move || {
            assert!(start.elapsed() >= Duration::from_millis(50));
            Ok(())
        });

        assert_eq!(h.consumption.handle(&record(1), &ack), RecordOutcome::Processed);
    }

    #[test]
    fn commit_delay_precedes_acknowledgment() {
        let h = harness(FaultSettings {
            commit_delay_ms: 40,
            ..Default::default()
        });
        let start = Instant::now();
        let mut ack = MockAcknowledgment::new();
        ack.expect_acknowledge().times(1).returning(move || {
            assert!(start.elapsed() >= Duration::from_millis(40));
            Ok(())
        });

        h.consumption.handle(&record(1), &ack);
        assert_eq!(h.counters.last_sequence_number(), 1);
    }

    #[test]
    fn paused_records_are_neither_acknowledged_nor_counted() {
        let h = harness(FaultSettings::default());
        h.counters.record_processed(9);
        h.state.set(LifecycleState::Paused);
        let ack = acks(0);

        for seq in 10..13 {
            assert_eq!(
                h.consumption.handle(&record(seq), &ack),
                RecordOutcome::SkippedPaused
            );
        }

        assert_eq!(h.counters.last_sequence_number(), 9);
        assert_eq!(h.counters.total_messages_received(), 1);
        assert_eq!(h.counters.processing_errors(), 0);
    }

    #[test]
    fn draining_records_are_processed() {
        let h = harness(FaultSettings::default());
        h.state.set(LifecycleState::Draining);

        assert_eq!(h.consumption.handle(&record(3), &acks(1)), RecordOutcome::Processed);
    }

    #[test]
    fn empty_record_is_acknowledged_without_counting() {
        let h = harness(FaultSettings {
            error_rate_percent: 100,
            ..Default::default()
        });
        let empty = InboundRecord {
            value: None,
            ..record(0)
        };

        let ack = acks(1);

        let (outcome, snapshotter, logs) = observed(|| h.consumption.handle(&empty, &ack));

        assert_eq!(outcome, RecordOutcome::AcknowledgedEmpty);
        assert_eq!(counter_value(&snapshotter, NULL_MESSAGES_COUNTER), Some(1));
        assert_eq!(counter_value(&snapshotter, PROCESSING_ERRORS_COUNTER), None);
        assert!(logs.contains(r#""level":"WARN""#), "{logs}");
        assert!(
            logs.contains("Received null or undecodable message, acknowledging"),
            "{logs}"
        );
        assert_eq!(h.counters.processing_errors(), 0);
        assert_eq!(h.counters.last_sequence_number(), 0);
        assert_eq!(h.counters.total_messages_received(), 0);
    }

    #[test]
    fn failed_acknowledgment_is_counted_and_retried_once() {
        let h = harness(FaultSettings::default());
        let mut ack = MockAcknowledgment::new();
        ack.expect_acknowledge()
            .times(2)
            .returning(|| {
                Err(AckError::Commit {
                    partition: 0,
                    offset: 4,
                    source: KafkaError::ConsumerCommit(RDKafkaErrorCode::BrokerTransportFailure),
                })
            });

        assert_eq!(h.consumption.handle(&record(4), &ack), RecordOutcome::Failed);
        assert_eq!(h.counters.processing_errors(), 1);
    }

    struct PanicsOnFirstAck {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Acknowledgment for PanicsOnFirstAck {
        fn acknowledge(&self) -> Result<(), AckError> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                panic!("downstream exploded");
            }
            Ok(())
        }
    }

    #[test]
    fn panic_during_processing_is_contained() {
        let h = harness(FaultSettings::default());
        let ack = PanicsOnFirstAck {
            calls: Default::default(),
        };

        assert_eq!(h.consumption.handle(&record(8), &ack), RecordOutcome::Failed);
        assert_eq!(ack.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(h.counters.processing_errors(), 1);
    }

    struct AlwaysPanics;

    impl Acknowledgment for AlwaysPanics {
        fn acknowledge(&self) -> Result<(), AckError> {
            panic!("commit path exploded");
        }
    }

    #[test]
    fn panicking_acknowledgment_on_empty_record_is_contained() {
        let h = harness(FaultSettings::default());
        let empty = InboundRecord {
            value: None,
            ..record(0)
        };

        let (outcome, snapshotter, logs) = observed(|| h.consumption.handle(&empty, &AlwaysPanics));

        assert_eq!(outcome, RecordOutcome::AcknowledgedEmpty);
        assert_eq!(counter_value(&snapshotter, COMMIT_ERRORS_COUNTER), Some(1));
        assert!(logs.contains("commit path exploded"), "{logs}");
    }

    #[test]
    fn panicking_acknowledgment_after_failure_is_contained() {
        let h = harness(FaultSettings::default());

        let (outcome, snapshotter, _) = observed(|| h.consumption.handle(&record(6), &AlwaysPanics));

        assert_eq!(outcome, RecordOutcome::Failed);
        assert_eq!(h.counters.processing_errors(), 1);
        assert_eq!(counter_value(&snapshotter, PROCESSING_ERRORS_COUNTER), Some(1));
        assert_eq!(counter_value(&snapshotter, COMMIT_ERRORS_COUNTER), Some(1));
    }

    #[test]
    fn consumption_continues_after_panicking_acknowledgment() {
        let h = harness(FaultSettings::default());

        h.consumption.handle(&record(1), &AlwaysPanics);

        assert_eq!(h.consumption.handle(&record(2), &acks(1)), RecordOutcome::Processed);
        assert_eq!(h.counters.last_sequence_number(), 2);
    }

    #[test]
    fn panic_message_is_extracted() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(7)), "unknown panic payload");
    }
}
