//! Outbound ports: what the reject cache needs from the host process.
//!
//! The cache never reads the OS clock, owns a socket, or runs a timer itself.
//! The host supplies a [`Clock`], closes connections through [`Disconnect`]
//! and drives the periodic work through a [`Scheduler`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in whole seconds. Read once per cache operation so every
/// comparison inside one call sees the same instant.
pub trait Clock {
    fn now(&self) -> u64;
}

/// Unix-epoch seconds from the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // a clock set before 1970 reads as 0 rather than aborting the event loop
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one
/// copy and give the other to the cache.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::Release);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Connection-management side: tears down a client the cache turned away.
pub trait Disconnect<H> {
    fn close(&mut self, handle: H, reason: &str);
}

impl<H, F> Disconnect<H> for F
where
    F: FnMut(H, &str),
{
    fn close(&mut self, handle: H, reason: &str) {
        self(handle, reason)
    }
}

pub type Task = Box<dyn FnMut()>;

/// Cooperative event scheduler. Tasks run on the event-loop thread, never
/// more than one invocation of a task at a time.
pub trait Scheduler {
    fn schedule_periodic(&mut self, name: &'static str, period: Duration, task: Task);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now(), 105);
        other.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn closures_are_disconnect_sinks() {
        let mut closed = Vec::new();
        let mut sink = |h: u32, reason: &str| closed.push((h, reason.to_string()));
        sink.close(4, "bye");
        assert_eq!(closed, vec![(4, "bye".to_string())]);
    }
}
