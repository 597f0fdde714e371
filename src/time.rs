//! Simulated time and durations.
//!
//! A [`SimTime`] is a point on the simulated timeline and a [`SimDuration`]
//! the difference between two such points. Both carry a [`TimeUnit`] so that
//! models written against seconds can be composed with models written against
//! milliseconds: comparisons convert to a common unit, and arithmetic keeps
//! the unit of the left-hand operand.
//!
//! # Example
//!
//! ```
//! use cyphy::time::{SimDuration, SimTime, TimeUnit};
//!
//! let t = SimTime::new(1.5, TimeUnit::Seconds);
//! let later = t + SimDuration::new(500.0, TimeUnit::Milliseconds);
//! assert_eq!(later, SimTime::new(2.0, TimeUnit::Seconds));
//! assert!(later < SimTime::infinity(TimeUnit::Seconds));
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Unit attached to simulated times and durations.
///
/// Also used by schedulers to declare their wall-clock resolution, which the
/// real-time layer rounds delays to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Number of nanoseconds in one unit.
    #[inline]
    pub fn nanos(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1e3,
            TimeUnit::Milliseconds => 1e6,
            TimeUnit::Seconds => 1e9,
            TimeUnit::Minutes => 60e9,
            TimeUnit::Hours => 3600e9,
        }
    }

    /// Converts `value` expressed in `self` into `target` units.
    #[inline]
    pub fn convert(self, value: f64, target: TimeUnit) -> f64 {
        if self == target || value.is_infinite() {
            value
        } else {
            value * self.nanos() / target.nanos()
        }
    }

    /// Short symbol used when displaying times.
    pub fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
        }
    }

    /// Rounds a wall-clock duration to the nearest multiple of this unit.
    ///
    /// Returns `None` when the result does not fit in a
    /// [`std::time::Duration`].
    pub fn round_std(self, secs: f64) -> Option<std::time::Duration> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let ticks = (secs * 1e9 / self.nanos()).round();
        let nanos = ticks * self.nanos();
        if nanos > u64::MAX as f64 {
            return None;
        }
        Some(std::time::Duration::from_nanos(nanos as u64))
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A point on the simulated timeline.
///
/// NaN is rejected at construction; `+∞` is a valid value and denotes
/// "never" (the time of next event of an idle model).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimTime {
    value: f64,
    unit: TimeUnit,
}

impl SimTime {
    /// Creates a new simulated time.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN.
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        assert!(!value.is_nan(), "simulated time cannot be NaN");
        Self { value, unit }
    }

    /// Time zero in the given unit.
    pub const fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// The `+∞` sentinel in the given unit.
    pub const fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    /// Shorthand for a time in seconds.
    pub fn seconds(value: f64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite()
    }

    /// Returns the same instant expressed in `unit`.
    pub fn to_unit(&self, unit: TimeUnit) -> SimTime {
        SimTime {
            value: self.unit.convert(self.value, unit),
            unit,
        }
    }

    /// Returns this instant as seconds since time zero.
    pub fn as_secs_f64(&self) -> f64 {
        self.unit.convert(self.value, TimeUnit::Seconds)
    }

    /// Returns the later of two instants.
    pub fn max(self, other: SimTime) -> SimTime {
        if other > self {
            other.to_unit(self.unit)
        } else {
            self
        }
    }

    /// Returns the earlier of two instants.
    pub fn min(self, other: SimTime) -> SimTime {
        if other < self {
            other.to_unit(self.unit)
        } else {
            self
        }
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let rhs = other.unit.convert(other.value, self.unit);
        self.value.total_cmp(&rhs)
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> SimTime {
        if self.is_infinite() || rhs.is_infinite() {
            return SimTime::infinity(self.unit);
        }
        SimTime::new(self.value + rhs.unit.convert(rhs.value, self.unit), self.unit)
    }
}

impl Sub<SimDuration> for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimDuration) -> SimTime {
        if self.is_infinite() {
            return self;
        }
        SimTime::new(self.value - rhs.unit.convert(rhs.value, self.unit), self.unit)
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;

    /// Duration elapsed from `rhs` to `self`. Two infinite instants are
    /// considered equal, so their difference is zero.
    fn sub(self, rhs: SimTime) -> SimDuration {
        match (self.is_infinite(), rhs.is_infinite()) {
            (true, true) => SimDuration::zero(self.unit),
            (true, false) => SimDuration::infinity(self.unit),
            _ => SimDuration::new(self.value - rhs.unit.convert(rhs.value, self.unit), self.unit),
        }
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf{}", self.unit)
        } else {
            write!(f, "{}{}", self.value, self.unit)
        }
    }
}

/// The difference between two simulated times.
///
/// [`SimDuration::infinity`] is the time advance of a model with no pending
/// internal event. Unlike [`SimTime`], a duration may be NaN or negative so
/// that a faulty time advance can be detected and reported instead of
/// panicking inside model code.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimDuration {
    value: f64,
    unit: TimeUnit,
}

impl SimDuration {
    pub const fn new(value: f64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub const fn zero(unit: TimeUnit) -> Self {
        Self { value: 0.0, unit }
    }

    /// "No pending internal event".
    pub const fn infinity(unit: TimeUnit) -> Self {
        Self {
            value: f64::INFINITY,
            unit,
        }
    }

    pub fn seconds(value: f64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    pub fn millis(value: f64) -> Self {
        Self::new(value, TimeUnit::Milliseconds)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn is_infinite(&self) -> bool {
        self.value.is_infinite() && self.value > 0.0
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0.0
    }

    /// A valid time advance is non-negative and not NaN (`+∞` is valid).
    pub fn is_valid_advance(&self) -> bool {
        !self.value.is_nan() && self.value >= 0.0
    }

    pub fn to_unit(&self, unit: TimeUnit) -> SimDuration {
        SimDuration {
            value: self.unit.convert(self.value, unit),
            unit,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.unit.convert(self.value, TimeUnit::Seconds)
    }
}

impl PartialEq for SimDuration {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimDuration {}

impl PartialOrd for SimDuration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimDuration {
    fn cmp(&self, other: &Self) -> Ordering {
        let rhs = other.unit.convert(other.value, self.unit);
        self.value.total_cmp(&rhs)
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration::new(self.value + rhs.unit.convert(rhs.value, self.unit), self.unit)
    }
}

impl Sub for SimDuration {
    type Output = SimDuration;

    fn sub(self, rhs: SimDuration) -> SimDuration {
        SimDuration::new(self.value - rhs.unit.convert(rhs.value, self.unit), self.unit)
    }
}

impl Mul<f64> for SimDuration {
    type Output = SimDuration;

    fn mul(self, rhs: f64) -> SimDuration {
        SimDuration::new(self.value * rhs, self.unit)
    }
}

impl Div<f64> for SimDuration {
    type Output = SimDuration;

    fn div(self, rhs: f64) -> SimDuration {
        SimDuration::new(self.value / rhs, self.unit)
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf{}", self.unit)
        } else {
            write!(f, "{}{}", self.value, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(TimeUnit::Seconds.convert(1.5, TimeUnit::Milliseconds), 1500.0);
        assert_eq!(TimeUnit::Minutes.convert(2.0, TimeUnit::Seconds), 120.0);
        assert_eq!(TimeUnit::Hours.convert(f64::INFINITY, TimeUnit::Seconds), f64::INFINITY);
    }

    #[test]
    fn test_ordering_across_units() {
        let a = SimTime::new(1.0, TimeUnit::Seconds);
        let b = SimTime::new(999.0, TimeUnit::Milliseconds);
        let c = SimTime::new(1000.0, TimeUnit::Milliseconds);
        assert!(b < a);
        assert_eq!(a, c);
        assert!(a < SimTime::infinity(TimeUnit::Nanoseconds));
    }

    #[test]
    fn test_arithmetic_keeps_left_unit() {
        let t = SimTime::seconds(2.0) + SimDuration::millis(250.0);
        assert_eq!(t.unit(), TimeUnit::Seconds);
        assert_eq!(t.value(), 2.25);

        let d = SimTime::seconds(5.0) - SimTime::new(1000.0, TimeUnit::Milliseconds);
        assert_eq!(d, SimDuration::seconds(4.0));
    }

    #[test]
    fn test_infinity_arithmetic() {
        let t = SimTime::seconds(3.0) + SimDuration::infinity(TimeUnit::Seconds);
        assert!(t.is_infinite());
        let inf = SimTime::infinity(TimeUnit::Seconds);
        assert!((inf - SimTime::seconds(1.0)).is_infinite());
        assert!((inf - inf).is_zero());
    }

    #[test]
    fn test_valid_advance() {
        assert!(SimDuration::seconds(0.0).is_valid_advance());
        assert!(SimDuration::infinity(TimeUnit::Seconds).is_valid_advance());
        assert!(!SimDuration::seconds(-1.0).is_valid_advance());
        assert!(!SimDuration::seconds(f64::NAN).is_valid_advance());
    }

    #[test]
    #[should_panic]
    fn test_nan_time_rejected() {
        let _ = SimTime::new(f64::NAN, TimeUnit::Seconds);
    }

    #[test]
    fn test_round_std() {
        let d = TimeUnit::Milliseconds.round_std(0.0104).unwrap();
        assert_eq!(d, std::time::Duration::from_millis(10));
        assert!(TimeUnit::Milliseconds.round_std(-1.0).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(SimTime::seconds(3.0).to_string(), "3s");
        assert_eq!(SimDuration::infinity(TimeUnit::Milliseconds).to_string(), "infms");
    }
}
