//! Upload throttling.
//!
//! Beacons advertise many times per second while the telemetry API only
//! needs one sample per interval. [`ThrottleGate`] decides when the next
//! upload may go out; it is a plain value so callers choose how to share it
//! and tests drive it with synthetic instants.

use std::time::{Duration, Instant};

/// Time gate allowing at most one upload per `interval`.
///
/// The window is consumed when an upload is *attempted*, not when it
/// succeeds. A failed upload therefore still blocks the next reading for a
/// full interval.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    /// Minimum time between upload attempts
    interval: Duration,
    /// Instant of the last attempt, `None` until the first one
    last_sent_at: Option<Instant>,
}

impl ThrottleGate {
    /// Create a gate that is open for the first reading.
    ///
    /// # Example
    /// ```
    /// use std::time::{Duration, Instant};
    /// use beacon_gateway::throttle::ThrottleGate;
    ///
    /// let mut gate = ThrottleGate::new(Duration::from_secs(1));
    /// let now = Instant::now();
    /// assert!(gate.try_acquire(now));
    /// assert!(!gate.try_acquire(now));
    /// ```
    pub fn new(interval: Duration) -> Self {
        ThrottleGate {
            interval,
            last_sent_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// `true` iff at least `interval` has passed since the last recorded upload.
    ///
    /// An instant earlier than the last upload counts as no time elapsed.
    pub fn should_upload(&self, now: Instant) -> bool {
        match self.last_sent_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn record_upload(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
    }

    /// Check the gate and, if open, record the upload in the same step.
    ///
    /// Callers sharing a gate must hold their lock across this call so two
    /// readings cannot both pass.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.should_upload(now) {
            self.record_upload(now);
            true
        } else {
            false
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// Fractions are accepted (`1.5s`, `0.25`).
///
/// # Examples
/// ```
/// use beacon_gateway::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
/// assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" has to be tried before "m" and "s"
    let (number, multiplier, divisor) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1.0, 1000.0)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3600.0, 1.0)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60.0, 1.0)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1.0, 1.0)
    } else {
        (src, 1.0, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;

    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration: {src}"));
    }

    Duration::try_from_secs_f64(value * multiplier / divisor)
        .map_err(|e| format!("invalid duration {src}: {e}"))
}
