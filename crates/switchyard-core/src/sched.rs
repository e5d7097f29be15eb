//! The retry scheduler seam and the bundled timer implementation.
//!
//! The core never computes backoff inline: when a setup fails with a
//! retryable cause, the manager hands the failure to a
//! [`RetryScheduler`] and forgets about it. The scheduler decides
//! whether and when a retry fires — as a
//! [`ManagerEvent::RetryDue`] back on the manager queue — and answers
//! throttling queries in the meantime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use quanta::Instant;
use rand::RngExt;
use tracing::debug;

use switchyard_common::{CapabilitySet, FailCause, RequestId, Transport};
use switchyard_policy::{ConfigHandle, find_retry_rule};

use crate::event::ManagerEvent;

/// One failed attempt the manager wants retried.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    pub profile: u32,
    pub transport: Transport,
    pub requests: Vec<RequestId>,
    pub capabilities: CapabilitySet,
    pub cause: FailCause,
    /// Network-suggested delay; overrides the configured ladder.
    pub suggested_delay: Option<Duration>,
    /// 0-based count of failures so far for this (profile, transport).
    pub attempt: u32,
}

/// Decides whether and when failed setups are retried.
pub trait RetryScheduler: Send + Sync {
    /// Returns true when a retry timer was armed.
    fn schedule(&self, request: RetryRequest) -> bool;

    /// Whether setups for this pair should be held back right now.
    fn is_throttled(&self, profile: u32, transport: Transport) -> bool;
}

struct TimerEntry {
    due: Instant,
    profile: u32,
    transport: Transport,
    requests: Vec<RequestId>,
}

/// Ladder-driven scheduler on a dedicated timer thread.
///
/// Delays come from the configured retry rules (or the network's
/// suggestion), with ±10% jitter so a fleet of devices does not retry in
/// lockstep. Permanent causes and exhausted ladders are dropped.
pub struct TimerRetryScheduler {
    tx: Sender<TimerEntry>,
    config: Arc<ConfigHandle>,
    throttled: Arc<Mutex<HashSet<(u32, Transport)>>>,
}

impl TimerRetryScheduler {
    pub fn new(manager: Sender<ManagerEvent>, config: Arc<ConfigHandle>) -> TimerRetryScheduler {
        let (tx, rx) = unbounded();
        let throttled = Arc::new(Mutex::new(HashSet::new()));
        let worker_throttled = throttled.clone();
        thread::Builder::new()
            .name("retry-timer".into())
            .spawn(move || timer_worker(rx, manager, worker_throttled))
            .expect("failed to spawn retry timer worker");
        TimerRetryScheduler { tx, config, throttled }
    }
}

impl RetryScheduler for TimerRetryScheduler {
    fn schedule(&self, request: RetryRequest) -> bool {
        if request.cause.is_permanent() {
            debug!(cause = %request.cause, "permanent cause, not retrying");
            return false;
        }
        let base = match request.suggested_delay {
            Some(delay) => Some(delay),
            None => {
                let compiled = self.config.load();
                find_retry_rule(&compiled.retry_rules, request.capabilities, request.cause)
                    .and_then(|rule| rule.delay_for_attempt(request.attempt))
            }
        };
        let Some(base) = base else {
            debug!(profile = request.profile, "no retry rule applies or ladder exhausted");
            return false;
        };
        let delay = jitter(base);
        debug!(profile = request.profile, transport = %request.transport,
               delay_ms = delay.as_millis() as u64, "retry armed");
        self.throttled.lock().unwrap().insert((request.profile, request.transport));
        self.tx
            .send(TimerEntry {
                due: Instant::now() + delay,
                profile: request.profile,
                transport: request.transport,
                requests: request.requests,
            })
            .is_ok()
    }

    fn is_throttled(&self, profile: u32, transport: Transport) -> bool {
        self.throttled.lock().unwrap().contains(&(profile, transport))
    }
}

/// ±10% of the base delay.
fn jitter(base: Duration) -> Duration {
    let spread = base.as_millis() as i64 / 10;
    if spread == 0 {
        return base;
    }
    let offset = rand::rng().random_range(-spread..=spread);
    let ms = (base.as_millis() as i64 + offset).max(0) as u64;
    Duration::from_millis(ms)
}

fn timer_worker(
    rx: Receiver<TimerEntry>,
    manager: Sender<ManagerEvent>,
    throttled: Arc<Mutex<HashSet<(u32, Transport)>>>,
) {
    let mut pending: Vec<TimerEntry> = Vec::new();
    loop {
        let next_due = pending.iter().map(|e| e.due).min();
        let incoming = match next_due {
            Some(due) => {
                let now = Instant::now();
                let timeout = if due > now { due.duration_since(now) } else { Duration::ZERO };
                match rx.recv_timeout(timeout) {
                    Ok(entry) => Some(entry),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(entry) => Some(entry),
                Err(_) => return,
            },
        };
        if let Some(entry) = incoming {
            pending.push(entry);
        }
        let now = Instant::now();
        let mut i = 0;
        while i < pending.len() {
            if pending[i].due <= now {
                let entry = pending.remove(i);
                throttled.lock().unwrap().remove(&(entry.profile, entry.transport));
                let _ = manager.send(ManagerEvent::RetryDue {
                    profile: entry.profile,
                    transport: entry.transport,
                    requests: entry.requests,
                });
            } else {
                i += 1;
            }
        }
    }
}
