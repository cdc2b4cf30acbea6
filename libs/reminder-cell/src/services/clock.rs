// libs/reminder-cell/src/services/clock.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::models::CancelToken;

pub type ScheduledTask = BoxFuture<'static, ()>;

/// "Run this callback at time T". Hosts may back it with OS timers, cron or a durable job queue.
#[async_trait]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn schedule_at(&self, at: DateTime<Utc>, task: ScheduledTask) -> CancelToken;

    /// Returns false when the callback already fired or was never registered.
    async fn cancel(&self, token: &CancelToken) -> bool;
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==============================================================================
// TOKIO CLOCK
// ==============================================================================

/// Wall-clock timers backed by spawned tokio tasks. Registrations do not survive a restart;
/// the orchestrator re-arms pending entries from the plan store on startup.
#[derive(Debug, Default, Clone)]
pub struct TokioClock {
    timers: Arc<Mutex<HashMap<CancelToken, AbortHandle>>>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> usize {
        lock_or_recover(&self.timers).len()
    }
}

#[async_trait]
impl ClockPort for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn schedule_at(&self, at: DateTime<Utc>, task: ScheduledTask) -> CancelToken {
        let token = CancelToken::new();
        let delay = (at - Utc::now()).to_std().unwrap_or_default();

        // Hold the table while spawning so the timer cannot fire before it is registered.
        let mut timers = lock_or_recover(&self.timers);
        let registry = self.timers.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_armed = lock_or_recover(&registry).remove(&token).is_some();
            if still_armed {
                task.await;
            }
        });
        timers.insert(token, handle.abort_handle());

        debug!("Timer {} armed for {}", token, at);
        token
    }

    async fn cancel(&self, token: &CancelToken) -> bool {
        match lock_or_recover(&self.timers).remove(token) {
            Some(handle) => {
                handle.abort();
                debug!("Timer {} cancelled", token);
                true
            }
            None => false,
        }
    }
}

// ==============================================================================
// MANUAL CLOCK
// ==============================================================================

#[derive(Default)]
struct ManualTimers {
    queue: BTreeMap<(DateTime<Utc>, u64), (CancelToken, ScheduledTask)>,
    keys: HashMap<CancelToken, (DateTime<Utc>, u64)>,
    next_id: u64,
}

/// Deterministic clock: time only moves when told to, and due callbacks run inline.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    timers: Mutex<ManualTimers>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            timers: Mutex::new(ManualTimers::default()),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock_or_recover(&self.now) = now;
    }

    pub fn pending_timers(&self) -> usize {
        lock_or_recover(&self.timers).queue.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        lock_or_recover(&self.timers)
            .queue
            .keys()
            .next()
            .map(|(at, _)| *at)
    }

    /// Move time forward, running every callback due on the way in deadline order.
    pub async fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut fired = 0;

        loop {
            let due = {
                let mut timers = lock_or_recover(&self.timers);
                let next_key = timers.queue.keys().next().copied();
                match next_key {
                    Some(key) if key.0 <= target => timers.queue.remove(&key).map(|(token, task)| {
                        timers.keys.remove(&token);
                        (key.0, task)
                    }),
                    _ => None,
                }
            };

            let Some((at, task)) = due else {
                break;
            };

            {
                let mut now = lock_or_recover(&self.now);
                if at > *now {
                    *now = at;
                }
            }
            task.await;
            fired += 1;
        }

        let mut now = lock_or_recover(&self.now);
        if target > *now {
            *now = target;
        } else if target < *now {
            warn!("ManualClock asked to move backwards to {}, ignoring", target);
        }
        fired
    }

    pub async fn advance_by(&self, step: Duration) -> usize {
        let target = self.now() + step;
        self.advance_to(target).await
    }
}

#[async_trait]
impl ClockPort for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock_or_recover(&self.now)
    }

    async fn schedule_at(&self, at: DateTime<Utc>, task: ScheduledTask) -> CancelToken {
        let token = CancelToken::new();
        let mut timers = lock_or_recover(&self.timers);
        timers.next_id += 1;
        let key = (at, timers.next_id);
        timers.queue.insert(key, (token, task));
        timers.keys.insert(token, key);
        token
    }

    async fn cancel(&self, token: &CancelToken) -> bool {
        let mut timers = lock_or_recover(&self.timers);
        match timers.keys.remove(token) {
            Some(key) => timers.queue.remove(&key).is_some(),
            None => false,
        }
    }
}
