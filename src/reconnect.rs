use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Outcome of a stale-heartbeat detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

/// Bounded exponential backoff for the viewer's restarts.
pub struct ReconnectSupervisor {
    attempts: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    /// Armed retry timer and its generation; stays set until the retry is
    /// handled, not merely until the timer fires.
    pending: Option<(u64, JoinHandle<()>)>,
    generation: u64,
}

impl ReconnectSupervisor {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base,
            cap,
            pending: None,
            generation: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `min(base * 2^(attempt-1), cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    pub fn on_stale(&mut self) -> Backoff {
        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "reconnection attempts exhausted");
            return Backoff::Exhausted;
        }
        self.attempts += 1;
        let delay = self.delay_for(self.attempts);
        info!(
            attempt = self.attempts,
            max = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnection"
        );
        Backoff::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Arms a retry timer built for a fresh generation, cancelling any
    /// previous one. Returns the generation the timer must report back.
    pub fn arm(&mut self, spawn: impl FnOnce(u64) -> JoinHandle<()>) -> u64 {
        self.cancel_pending();
        self.generation += 1;
        let generation = self.generation;
        self.pending = Some((generation, spawn(generation)));
        generation
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Claims the retry of `generation`. False for a timer that was
    /// cancelled or replaced in the meantime.
    pub fn take_pending(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some((armed, _)) if *armed == generation => {
                self.cancel_pending();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_pending(&mut self) {
        if let Some((_, timer)) = self.pending.take() {
            timer.abort();
        }
    }

    /// Successful reconnection or a fresh user start.
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.attempts = 0;
    }
}
