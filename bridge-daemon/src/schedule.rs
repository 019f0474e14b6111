//! Wall-clock aligned scheduling.
//!
//! A pass is due at `floor_minute(now) + offset`, moved forward by whole
//! intervals until it lies in the future. Both loops of the daemon use one
//! [`Ticker`] each; its timer is re-armed rather than recreated.

use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_OFFSET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval: Duration,
    pub offset: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            offset: DEFAULT_OFFSET,
        }
    }
}

impl Schedule {
    pub fn new(interval: Duration, offset: Duration) -> Self {
        Self { interval, offset }
    }

    /// The first slot strictly after `now`.
    pub fn next_run_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now_secs = now.timestamp();
        let interval = self.interval.as_secs().max(1) as i64;
        let offset = self.offset.as_secs() as i64;

        let mut next = now_secs - now_secs.rem_euclid(60) + offset;
        if next <= now_secs {
            next += ((now_secs - next) / interval + 1) * interval;
        }
        Utc.timestamp_opt(next, 0).single().unwrap_or(now)
    }

    /// Time left until the next slot after `now`.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_run_at(now) - now).to_std().unwrap_or_default()
    }
}

/// A reusable timer firing on a [`Schedule`]'s slots.
pub struct Ticker {
    schedule: Schedule,
    sleep: Pin<Box<Sleep>>,
}

impl Ticker {
    /// Create a ticker armed for the next slot.
    pub fn new(schedule: Schedule) -> Self {
        let delay = schedule.delay_from(Utc::now());
        Self {
            schedule,
            sleep: Box::pin(tokio::time::sleep(delay)),
        }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Wait for the timer. Returns `false` if `cancel` fired first.
    pub async fn tick(&mut self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.sleep.as_mut() => true,
        }
    }

    /// Re-arm for the slot after the current wall-clock time.
    pub fn rearm(&mut self) {
        let delay = self.schedule.delay_from(Utc::now());
        self.sleep.as_mut().reset(Instant::now() + delay);
    }
}
