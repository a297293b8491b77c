use rdkafka::ClientConfig;

use crate::config::Config;

/// Consumer group settings for the chaos consumer.
///
/// Offsets are only ever committed by hand, one record at a time, so auto commit and
/// auto offset store are always off.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "45000")
            .set("heartbeat.interval.ms", "15000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Everything the harness reads from the environment.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.kafka_hosts, &config.kafka_consumer_group)
            .with_tls(config.kafka_tls)
            .with_offset_reset(&config.kafka_consumer_offset_reset)
            .with_max_poll_interval_ms(config.kafka_max_poll_interval_ms)
            .with_session_timeout_ms(config.kafka_session_timeout_ms)
            .with_heartbeat_interval_ms(config.kafka_heartbeat_interval_ms)
            .with_cooperative_sticky_assignment()
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    /// Maximum time between poll() calls before the member is evicted from the group.
    pub fn with_max_poll_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("max.poll.interval.ms", ms.to_string());
        self
    }

    pub fn with_session_timeout_ms(mut self, ms: u32) -> Self {
        self.config.set("session.timeout.ms", ms.to_string());
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u32) -> Self {
        self.config.set("heartbeat.interval.ms", ms.to_string());
        self
    }

    /// Partitions move incrementally, so a rebalance only hands over newly assigned
    /// partitions and never resets the pause state of partitions already held.
    pub fn with_cooperative_sticky_assignment(mut self) -> Self {
        self.config
            .set("partition.assignment.strategy", "cooperative-sticky");
        self
    }

    /// Static membership for one consumer thread. Each member needs its own instance id.
    pub fn with_group_instance_id(mut self, instance_id: &str) -> Self {
        self.config
            .set("client.id", instance_id)
            .set("group.instance.id", instance_id);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Derive the config of consumer thread `member` from the shared base config.
pub fn member_config(
    base: &ClientConfig,
    group_instance_id: Option<&str>,
    member: usize,
) -> ClientConfig {
    let builder = ConsumerConfigBuilder {
        config: base.clone(),
    };
    match group_instance_id {
        Some(instance_id) => builder
            .with_group_instance_id(&format!("{instance_id}-{member}"))
            .build(),
        None => builder.build(),
    }
}
