//! Deadline-bounded polling.
//!
//! Every wait in the checks has the same shape: observe something, stop
//! when it satisfies a condition, give up when a wall-clock deadline passes,
//! and hand the last observation back so the caller can explain what it saw.
//! [`poll_until`] is that loop; [`try_poll_until`] is the variant whose
//! observation can fail outright (a missing binary is not worth retrying).

use std::thread;
use std::time::{Duration, Instant};

use tracing::trace;

/// An absolute point in time computed once from a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Instant,
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            at: start + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Outcome of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polled<T> {
    /// The most recent observation, whether or not it satisfied the condition.
    pub last: T,
    pub satisfied: bool,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> Polled<T> {
    pub fn timed_out(&self) -> bool {
        !self.satisfied
    }
}

/// Observe until `done` holds or `timeout` elapses.
///
/// The first observation always happens, even with a zero timeout, so there
/// is always a `last` value to report. Between observations the loop sleeps
/// for `interval`, capped at the time left; a zero interval spins.
pub fn poll_until<T, F, D>(
    timeout: Duration,
    interval: Duration,
    mut observe: F,
    done: D,
) -> Polled<T>
where
    F: FnMut() -> T,
    D: Fn(&T) -> bool,
{
    match try_poll_until::<T, std::convert::Infallible, _, _>(
        timeout,
        interval,
        || Ok(observe()),
        done,
    ) {
        Ok(polled) => polled,
        Err(never) => match never {},
    }
}

/// Like [`poll_until`], but an observation error ends the poll immediately.
pub fn try_poll_until<T, E, F, D>(
    timeout: Duration,
    interval: Duration,
    mut observe: F,
    done: D,
) -> Result<Polled<T>, E>
where
    F: FnMut() -> Result<T, E>,
    D: Fn(&T) -> bool,
{
    let deadline = Deadline::after(timeout);
    let mut attempts = 0u32;

    loop {
        let value = observe()?;
        attempts += 1;

        if done(&value) {
            trace!(attempts, "poll condition satisfied");
            return Ok(Polled {
                last: value,
                satisfied: true,
                attempts,
                elapsed: deadline.elapsed(),
            });
        }

        if deadline.expired() {
            trace!(attempts, "poll deadline reached");
            return Ok(Polled {
                last: value,
                satisfied: false,
                attempts,
                elapsed: deadline.elapsed(),
            });
        }

        if !interval.is_zero() {
            thread::sleep(interval.min(deadline.remaining()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_satisfied_on_first_observation() {
        let polled = poll_until(Duration::from_secs(5), Duration::ZERO, || 7, |v| *v == 7);
        assert!(polled.satisfied);
        assert_eq!(polled.attempts, 1);
        assert_eq!(polled.last, 7);
    }

    #[test]
    fn test_zero_timeout_still_observes_once() {
        let polled = poll_until(Duration::ZERO, Duration::ZERO, || "seen", |_| false);
        assert!(polled.timed_out());
        assert_eq!(polled.attempts, 1);
        assert_eq!(polled.last, "seen");
    }

    #[test]
    fn test_keeps_polling_until_condition() {
        let counter = Cell::new(0);
        let polled = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(1),
            || {
                counter.set(counter.get() + 1);
                counter.get()
            },
            |v| *v >= 4,
        );
        assert!(polled.satisfied);
        assert_eq!(polled.last, 4);
        assert_eq!(polled.attempts, 4);
    }

    #[test]
    fn test_times_out_and_returns_last_observation() {
        let counter = Cell::new(0);
        let timeout = Duration::from_millis(30);
        let polled = poll_until(
            timeout,
            Duration::from_millis(5),
            || {
                counter.set(counter.get() + 1);
                counter.get()
            },
            |_| false,
        );
        assert!(polled.timed_out());
        assert_eq!(polled.last, counter.get());
        assert!(polled.elapsed >= timeout);
        assert!(polled.elapsed < timeout + Duration::from_secs(1));
    }

    #[test]
    fn test_observation_error_stops_immediately() {
        let calls = Cell::new(0);
        let result: Result<Polled<u32>, &str> = try_poll_until(
            Duration::from_secs(5),
            Duration::ZERO,
            || {
                calls.set(calls.get() + 1);
                Err("binary missing")
            },
            |_| true,
        );
        assert_eq!(result.unwrap_err(), "binary missing");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_deadline_remaining_never_negative() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
