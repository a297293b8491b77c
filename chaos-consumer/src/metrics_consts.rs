/// Counter for records that made it through the fault pipeline without a simulated failure
pub const MESSAGES_RECEIVED_COUNTER: &str = "bg_consumer_messages_received_total";

/// Counter for simulated and unexpected processing failures (with cause label)
pub const PROCESSING_ERRORS_COUNTER: &str = "bg_consumer_processing_errors_total";

/// Counter for partition assignment callbacks
pub const REBALANCE_COUNTER: &str = "bg_consumer_rebalance_count_total";

/// Histogram for the time between starting the commit delay and the acknowledgment completing
pub const COMMIT_LATENCY_HISTOGRAM: &str = "bg_consumer_commit_latency_ms";

/// Gauge for the numeric code of the current lifecycle state
pub const LIFECYCLE_STATE_GAUGE: &str = "bg_consumer_lifecycle_state";

/// Gauge for the last successfully processed sequence number
pub const LAST_SEQUENCE_NUMBER_GAUGE: &str = "bg_consumer_last_sequence_number";

/// Counter for records acknowledged without processing because their value was absent
pub const NULL_MESSAGES_COUNTER: &str = "bg_consumer_null_messages_total";

/// Counter for failed acknowledgments
pub const COMMIT_ERRORS_COUNTER: &str = "bg_consumer_commit_errors_total";

/// Counter for errors surfaced by the broker client while polling
pub const KAFKA_ERRORS_COUNTER: &str = "bg_consumer_kafka_errors_total";
