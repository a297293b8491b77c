use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::shutdown::{ShutdownSignal, SleepOutcome};

/// Runtime-mutable fault parameters.
///
/// Every field is an independent atomic. A record may observe a half-applied update when
/// a mutation races with it; there is no cross-field consistency.
#[derive(Debug, Default)]
pub struct FaultConfig {
    processing_delay_ms: AtomicU64,
    error_rate_percent: AtomicU8,
    commit_delay_ms: AtomicU64,
    poll_timeout_exceed: AtomicBool,
}

/// Point-in-time read of every fault parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultSettings {
    pub processing_delay_ms: u64,
    pub error_rate_percent: u8,
    pub commit_delay_ms: u64,
    pub poll_timeout_exceed: bool,
}

pub fn clamp_error_rate(percent: i64) -> u8 {
    percent.clamp(0, 100) as u8
}

impl FaultConfig {
    pub fn new(settings: FaultSettings) -> Self {
        Self {
            processing_delay_ms: AtomicU64::new(settings.processing_delay_ms),
            error_rate_percent: AtomicU8::new(settings.error_rate_percent.min(100)),
            commit_delay_ms: AtomicU64::new(settings.commit_delay_ms),
            poll_timeout_exceed: AtomicBool::new(settings.poll_timeout_exceed),
        }
    }

    pub fn processing_delay_ms(&self) -> u64 {
        self.processing_delay_ms.load(Ordering::Relaxed)
    }

    pub fn error_rate_percent(&self) -> u8 {
        self.error_rate_percent.load(Ordering::Relaxed)
    }

    pub fn commit_delay_ms(&self) -> u64 {
        self.commit_delay_ms.load(Ordering::Relaxed)
    }

    pub fn poll_timeout_exceed(&self) -> bool {
        self.poll_timeout_exceed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FaultSettings {
        FaultSettings {
            processing_delay_ms: self.processing_delay_ms(),
            error_rate_percent: self.error_rate_percent(),
            commit_delay_ms: self.commit_delay_ms(),
            poll_timeout_exceed: self.poll_timeout_exceed(),
        }
    }

    pub fn set_processing_delay_ms(&self, delay_ms: u64) {
        self.processing_delay_ms.store(delay_ms, Ordering::Relaxed);
        info!(fault = "processing-delay", value = delay_ms, "Fault injection updated");
    }

    /// Silently clamps to `[0, 100]`. Returns the applied value.
    pub fn set_error_rate_percent(&self, percent: i64) -> u8 {
        let applied = clamp_error_rate(percent);
        self.error_rate_percent.store(applied, Ordering::Relaxed);
        info!(
            fault = "error-rate",
            requested = percent,
            value = applied,
            "Fault injection updated"
        );
        applied
    }

    pub fn set_commit_delay_ms(&self, delay_ms: u64) {
        self.commit_delay_ms.store(delay_ms, Ordering::Relaxed);
        info!(fault = "commit-delay", value = delay_ms, "Fault injection updated");
    }

    pub fn set_poll_timeout_exceed(&self, enabled: bool) {
        self.poll_timeout_exceed.store(enabled, Ordering::Relaxed);
        info!(
            fault = "poll-timeout-exceed",
            value = enabled,
            "Fault injection updated"
        );
    }
}

/// Failure decision for a single record. `0` never fails, `100` always fails, anything in
/// between fails when a uniform draw from `[0, 100)` lands below the rate.
pub fn should_fail_with<R: Rng>(error_rate_percent: u8, rng: &mut R) -> bool {
    if error_rate_percent == 0 {
        return false;
    }
    if error_rate_percent >= 100 {
        return true;
    }
    rng.gen_range(0..100u8) < error_rate_percent
}

/// The per-record fault stages, in the order the consumption loop runs them:
/// poll-timeout-exceed, processing delay, failure decision, commit delay.
///
/// Every delay blocks the calling consumer thread. A delay interrupted by shutdown is
/// treated as elapsed.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    config: Arc<FaultConfig>,
    shutdown: ShutdownSignal,
    poll_timeout_exceed_block: Duration,
}

impl FaultInjector {
    /// `poll_timeout_exceed_block` must exceed the group's `max.poll.interval.ms`.
    pub fn new(
        config: Arc<FaultConfig>,
        shutdown: ShutdownSignal,
        poll_timeout_exceed_block: Duration,
    ) -> Self {
        Self {
            config,
            shutdown,
            poll_timeout_exceed_block,
        }
    }

    /// Stall long enough for the broker to consider this member dead and rebalance.
    pub fn apply_poll_timeout_exceed(&self) {
        if !self.config.poll_timeout_exceed() {
            return;
        }
        warn!(
            block_secs = self.poll_timeout_exceed_block.as_secs(),
            "Simulating poll timeout exceed"
        );
        self.block_for(self.poll_timeout_exceed_block, "poll-timeout-exceed");
    }

    pub fn apply_processing_delay(&self) {
        let delay_ms = self.config.processing_delay_ms();
        if delay_ms > 0 {
            self.block_for(Duration::from_millis(delay_ms), "processing-delay");
        }
    }

    pub fn should_fail(&self) -> bool {
        should_fail_with(self.config.error_rate_percent(), &mut rand::thread_rng())
    }

    pub fn apply_commit_delay(&self) {
        let delay_ms = self.config.commit_delay_ms();
        if delay_ms > 0 {
            self.block_for(Duration::from_millis(delay_ms), "commit-delay");
        }
    }

    fn block_for(&self, delay: Duration, stage: &'static str) {
        if self.shutdown.sleep(delay) == SleepOutcome::Interrupted {
            warn!(stage, "Fault delay interrupted, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::thread;
    use std::time::Instant;
    use test_case::test_case;

    fn injector(settings: FaultSettings) -> (FaultInjector, ShutdownSignal) {
        let shutdown = ShutdownSignal::new();
        let injector = FaultInjector::new(
            Arc::new(FaultConfig::new(settings)),
            shutdown.clone(),
            Duration::from_secs(360),
        );
        (injector, shutdown)
    }

    #[test]
    fn zero_rate_never_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..10_000).all(|_| !should_fail_with(0, &mut rng)));
    }

    #[test]
    fn full_rate_always_fails() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..10_000).all(|_| should_fail_with(100, &mut rng)));
    }

    #[test_case(1)]
    #[test_case(30)]
    #[test_case(50)]
    #[test_case(99)]
    fn partial_rate_tracks_frequency(rate: u8) {
        let trials = 10_000;
        let failures = (0..trials)
            .filter(|_| should_fail_with(rate, &mut rand::thread_rng()))
            .count();

        let observed = failures as f64 / trials as f64 * 100.0;
        assert!(
            (observed - f64::from(rate)).abs() < 5.0,
            "rate {rate}% observed {observed:.2}%"
        );
    }

    #[test_case(-20, 0; "negative clamps to zero")]
    #[test_case(0, 0; "zero")]
    #[test_case(42, 42; "in range")]
    #[test_case(100, 100; "upper bound")]
    #[test_case(250, 100; "above clamps to hundred")]
    fn error_rate_is_clamped(requested: i64, applied: u8) {
        let config = FaultConfig::default();
        assert_eq!(config.set_error_rate_percent(requested), applied);
        assert_eq!(config.error_rate_percent(), applied);
    }

    #[test]
    fn mutations_are_visible_in_snapshot() {
        let config = FaultConfig::default();
        config.set_processing_delay_ms(15);
        config.set_commit_delay_ms(30);
        config.set_poll_timeout_exceed(true);
        config.set_error_rate_percent(12);

        assert_eq!(
            config.snapshot(),
            FaultSettings {
                processing_delay_ms: 15,
                error_rate_percent: 12,
                commit_delay_ms: 30,
                poll_timeout_exceed: true,
            }
        );
    }

    #[test]
    fn processing_delay_blocks_caller() {
        let (injector, _shutdown) = injector(FaultSettings {
            processing_delay_ms: 50,
            ..Default::default()
        });

        let start = Instant::now();
        injector.apply_processing_delay();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn disabled_stages_do_not_block() {
        let (injector, _shutdown) = injector(FaultSettings::default());

        let start = Instant::now();
        injector.apply_poll_timeout_exceed();
        injector.apply_processing_delay();
        injector.apply_commit_delay();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(!injector.should_fail());
    }

    #[test]
    fn shutdown_interrupts_poll_timeout_block() {
        let (injector, shutdown) = injector(FaultSettings {
            poll_timeout_exceed: true,
            ..Default::default()
        });
        let start = Instant::now();

        let handle = thread::spawn(move || injector.apply_poll_timeout_exceed());
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();

        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn serializes_with_wire_names() {
        let settings = FaultSettings {
            processing_delay_ms: 5,
            error_rate_percent: 10,
            commit_delay_ms: 0,
            poll_timeout_exceed: false,
        };
        assert_eq!(
            serde_json::to_value(settings).unwrap(),
            serde_json::json!({
                "processingDelayMs": 5,
                "errorRatePercent": 10,
                "commitDelayMs": 0,
                "pollTimeoutExceed": false,
            })
        );
    }
}
