//! Mapping between simulated time and the scheduler's wall clock.

use std::time::Duration;

use crate::error::{ConfigurationError, SimResult};
use crate::time::{SimDuration, SimTime, TimeUnit};

/// Result of converting a simulated deadline into a scheduler delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    /// Delay to hand to the scheduler
    pub delay: Duration,
    /// How far the wall-clock target was already in the past, if it was
    pub late_by: Option<Duration>,
}

/// Linear map from simulated time to wall-clock time.
///
/// `wall(t) = start_wall + round((t - start_sim) / acceleration)`, rounded to
/// the scheduler's resolution.
#[derive(Clone, Copy, Debug)]
pub struct RtClock {
    start_wall: Duration,
    start_sim: SimTime,
    end_sim: SimTime,
    acceleration: f64,
    resolution: TimeUnit,
}

impl RtClock {
    /// Builds the clock of a run of `duration` starting at `start_sim`,
    /// aligned with wall-clock instant `start_wall`.
    pub fn new(
        start_wall: Duration,
        start_sim: SimTime,
        duration: SimDuration,
        acceleration: f64,
        resolution: TimeUnit,
    ) -> SimResult<Self> {
        if !(acceleration > 0.0) || !acceleration.is_finite() {
            return Err(ConfigurationError::NonPositiveAcceleration(acceleration).into());
        }
        if start_sim.is_infinite() || duration.is_infinite() || !duration.is_valid_advance() {
            return Err(ConfigurationError::Validation(format!(
                "run duration must be finite and non-negative, got {duration}"
            ))
            .into());
        }
        let clock = Self {
            start_wall,
            start_sim,
            end_sim: start_sim + duration,
            acceleration,
            resolution,
        };
        clock.wall_of(clock.end_sim)?;
        Ok(clock)
    }

    pub fn start_wall(&self) -> Duration {
        self.start_wall
    }

    pub fn start_sim(&self) -> SimTime {
        self.start_sim
    }

    pub fn end_sim(&self) -> SimTime {
        self.end_sim
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    /// Wall-clock instant at which simulated time `t` is reached. Times
    /// before the start map to the start.
    pub fn wall_of(&self, t: SimTime) -> SimResult<Duration> {
        let offset = ((t - self.start_sim).as_secs_f64() / self.acceleration).max(0.0);
        let rounded = self.resolution.round_std(offset).ok_or_else(|| {
            ConfigurationError::WallClockOverflow(format!("simulated time {t} is out of range"))
        })?;
        self.start_wall.checked_add(rounded).ok_or_else(|| {
            ConfigurationError::WallClockOverflow(format!("simulated time {t} is out of range")).into()
        })
    }

    /// Delay from `now` until simulated time `t`, clamped to zero when the
    /// target already passed.
    pub fn delay_until(&self, t: SimTime, now: Duration) -> SimResult<Deadline> {
        let target = self.wall_of(t)?;
        Ok(match target.checked_sub(now) {
            Some(delay) => Deadline {
                delay,
                late_by: None,
            },
            None => Deadline {
                delay: Duration::ZERO,
                late_by: Some(now - target),
            },
        })
    }

    /// Simulated time corresponding to wall-clock instant `wall`.
    pub fn sim_time_at(&self, wall: Duration) -> SimTime {
        match wall.checked_sub(self.start_wall) {
            None => self.start_sim,
            Some(elapsed) => {
                let secs = elapsed.as_secs_f64() * self.acceleration;
                self.start_sim + SimDuration::seconds(secs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(accel: f64) -> RtClock {
        RtClock::new(
            Duration::from_secs(100),
            SimTime::seconds(0.0),
            SimDuration::seconds(60.0),
            accel,
            TimeUnit::Milliseconds,
        )
        .unwrap()
    }

    #[test]
    fn test_wall_mapping_with_acceleration() {
        let c = clock(2.0);
        assert_eq!(c.wall_of(SimTime::seconds(10.0)).unwrap(), Duration::from_secs(105));
        assert_eq!(c.end_sim(), SimTime::seconds(60.0));
        assert_eq!(c.sim_time_at(Duration::from_secs(105)), SimTime::seconds(10.0));
    }

    #[test]
    fn test_rounding_to_resolution() {
        let c = clock(3.0);
        // 1 s / 3 = 333.33 ms, rounded to 333 ms
        assert_eq!(
            c.wall_of(SimTime::seconds(1.0)).unwrap(),
            Duration::from_secs(100) + Duration::from_millis(333)
        );
    }

    #[test]
    fn test_delay_clamped_when_late() {
        let c = clock(1.0);
        let d = c.delay_until(SimTime::seconds(5.0), Duration::from_secs(101)).unwrap();
        assert_eq!(d.delay, Duration::from_secs(4));
        assert!(d.late_by.is_none());

        let d = c.delay_until(SimTime::seconds(5.0), Duration::from_secs(107)).unwrap();
        assert_eq!(d.delay, Duration::ZERO);
        assert_eq!(d.late_by, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_non_positive_acceleration_rejected() {
        for accel in [0.0, -1.0, f64::NAN] {
            let err = RtClock::new(
                Duration::from_secs(1),
                SimTime::seconds(0.0),
                SimDuration::seconds(1.0),
                accel,
                TimeUnit::Milliseconds,
            )
            .unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_overflow_is_configuration_error() {
        let err = RtClock::new(
            Duration::from_secs(1),
            SimTime::seconds(0.0),
            SimDuration::seconds(1e30),
            1.0,
            TimeUnit::Nanoseconds,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SimError::Configuration(ConfigurationError::WallClockOverflow(_))
        ));
    }
}
