use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Process shutdown flag that doubles as an interrupt for blocking fault delays.
///
/// Fault delays are real blocking sleeps on the consumer thread. Triggering the signal
/// wakes every sleeper early, and the flag stays set so any later sleep returns at once.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    triggered: Mutex<bool>,
    wakeup: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Interrupted,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *triggered = true;
        self.inner.wakeup.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling thread for `duration`, or until the signal is triggered.
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        let triggered = self
            .inner
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (triggered, _) = self
            .inner
            .wakeup
            .wait_timeout_while(triggered, duration, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);

        if *triggered {
            SleepOutcome::Interrupted
        } else {
            SleepOutcome::Elapsed
        }
    }
}
