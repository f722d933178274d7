//! Throttle module.
//!
//! This module contains the minimum pause check applied between two
//! emails sent by the same client.

/// Represents the timestamp of the last email sent, in seconds since
/// the Unix epoch (UTC). It starts at 0 so the first email is never
/// throttled.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Throttle {
    last_send: i64,
}

impl Throttle {
    pub fn last_send(&self) -> i64 {
        self.last_send
    }

    /// Gets the seconds elapsed since the last email.
    pub fn elapsed(&self, now: i64) -> i64 {
        now - self.last_send
    }

    /// Checks that at least `minpause` seconds elapsed since the last
    /// email. Returns the elapsed seconds otherwise. A negative
    /// minimum pause never throttles.
    pub fn check(&self, now: i64, minpause: i64) -> Result<(), i64> {
        let elapsed = self.elapsed(now);
        if minpause >= 0 && elapsed < minpause {
            Err(elapsed)
        } else {
            Ok(())
        }
    }

    pub fn record(&mut self, now: i64) {
        self.last_send = now;
    }
}
