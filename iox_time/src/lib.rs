//! A time source abstraction.
//!
//! Production code asks a [`TimeProvider`] for the current time rather than calling
//! `Utc::now()` / `Instant::now()` directly, so that TTL and invalidation logic can be driven
//! deterministically in tests via [`MockProvider`].
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, clippy::clone_on_ref_ptr)]

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{
    fmt::Debug,
    ops::Add,
    time::Duration,
};

/// A point in time, represented as a UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Construct from a millisecond UNIX timestamp.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(
            DateTime::from_timestamp_millis(millis)
                .expect("timestamp millis out of range"),
        )
    }

    /// The underlying `chrono` timestamp.
    pub fn date_time(&self) -> DateTime<Utc> {
        self.0
    }

    /// Duration elapsed between `earlier` and `self`; zero if `earlier` is in the future.
    pub fn checked_duration_since(&self, earlier: Self) -> Option<Duration> {
        (self.0 - earlier.0).to_std().ok()
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("duration overflow"))
    }
}

/// Source of the current time.
///
/// Implemented by [`SystemProvider`] in production and [`MockProvider`] in tests.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Return the current time.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that returns the real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create a new provider backed by the system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] with a value that can be set and advanced by tests.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a new mock provider fixed at `start`.
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Overwrite the current time.
    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }

    /// Advance the current time by `duration`.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut guard = self.now.write();
        *guard = *guard + duration;
        *guard
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_advances() {
        let start = Time::from_timestamp_millis(0);
        let provider = MockProvider::new(start);
        assert_eq!(provider.now(), start);

        let next = provider.inc(Duration::from_secs(5));
        assert_eq!(provider.now(), next);
        assert_eq!(
            next.checked_duration_since(start),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn system_provider_moves_forward() {
        let provider = SystemProvider::new();
        let t0 = provider.now();
        std::thread::sleep(Duration::from_millis(5));
        let t1 = provider.now();
        assert!(t1 >= t0);
    }
}
