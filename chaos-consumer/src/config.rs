use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::warn;

use crate::fault::{clamp_error_rate, FaultSettings};
use crate::lifecycle::LifecycleState;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "bg-test-group")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "bg-test-topic")]
    pub kafka_consumer_topic: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Enables static membership when set
    pub kafka_group_instance_id: Option<String>,

    #[envconfig(default = "300000")]
    pub kafka_max_poll_interval_ms: u32,

    #[envconfig(default = "45000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "15000")]
    pub kafka_heartbeat_interval_ms: u32,

    #[envconfig(default = "1")]
    pub consumer_concurrency: usize,

    #[envconfig(default = "100")]
    pub consumer_poll_timeout: EnvMsDuration,

    #[envconfig(default = "ACTIVE")]
    pub initial_state: String,

    #[envconfig(default = "360000")]
    pub poll_timeout_exceed_block: EnvMsDuration,

    #[envconfig(nested = true)]
    pub fault: FaultDefaults,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Unknown names fall back to `ACTIVE` with a warning.
    pub fn initial_lifecycle_state(&self) -> LifecycleState {
        LifecycleState::parse_or_active(&self.initial_state)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.kafka_max_poll_interval_ms))
    }

    /// The poll-timeout-exceed block must outlast `max.poll.interval.ms`, otherwise the
    /// broker never evicts the member.
    pub fn poll_timeout_exceed_block(&self) -> Duration {
        let configured = self.poll_timeout_exceed_block.0;
        let max_poll_interval = self.max_poll_interval();
        if configured > max_poll_interval {
            return configured;
        }

        let adjusted = max_poll_interval + Duration::from_secs(60);
        warn!(
            configured_ms = configured.as_millis() as u64,
            max_poll_interval_ms = self.kafka_max_poll_interval_ms,
            adjusted_ms = adjusted.as_millis() as u64,
            "Poll timeout exceed block does not exceed max.poll.interval.ms, raising it"
        );
        adjusted
    }

    pub fn fault_settings(&self) -> FaultSettings {
        self.fault.settings()
    }
}

/// Fault parameters in effect at startup. All of them can be changed at runtime.
#[derive(Envconfig, Clone)]
pub struct FaultDefaults {
    #[envconfig(from = "FAULT_PROCESSING_DELAY_MS", default = "0")]
    pub processing_delay_ms: u64,

    #[envconfig(from = "FAULT_ERROR_RATE_PERCENT", default = "0")]
    pub error_rate_percent: i64,

    #[envconfig(from = "FAULT_COMMIT_DELAY_MS", default = "0")]
    pub commit_delay_ms: u64,

    #[envconfig(from = "FAULT_POLL_TIMEOUT_EXCEED", default = "false")]
    pub poll_timeout_exceed: bool,
}

impl FaultDefaults {
    pub fn settings(&self) -> FaultSettings {
        FaultSettings {
            processing_delay_ms: self.processing_delay_ms,
            error_rate_percent: clamp_error_rate(self.error_rate_percent),
            commit_delay_ms: self.commit_delay_ms,
            poll_timeout_exceed: self.poll_timeout_exceed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
