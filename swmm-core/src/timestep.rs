//! The simulation clock.
//!
//! Unlike a model with a fixed reporting frequency, this engine's runoff step is chosen
//! at runtime (§4.5): it is bounded above by the dry-weather step and by the next change
//! in rainfall or evaporation, and clamped so it never overshoots the end of the run.
//! `Clock` owns the current simulation time and advances by a caller-supplied duration
//! each step, rather than iterating a precomputed vector of timesteps.

use chrono::{Datelike, NaiveDateTime, TimeDelta, Timelike};
use std::ops::Add;
use thiserror::Error;

const SECS_IN_DAY: i64 = 60 * 60 * 24;

fn is_leap_year(year: i32) -> bool {
    // see http://stackoverflow.com/a/11595914/1300519
    (year & 3) == 0 && ((year % 25) != 0 || (year & 15) == 0)
}

/// A newtype for `chrono::TimeDelta` that provides convenience methods used throughout
/// the routing and runoff engines, where durations are most naturally expressed as a
/// fractional number of seconds or days.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SimDuration(TimeDelta);

impl SimDuration {
    pub fn from_seconds(seconds: f64) -> Self {
        Self(TimeDelta::milliseconds((seconds * 1000.0).round() as i64))
    }

    pub fn from_days(days: i64) -> Self {
        Self(TimeDelta::days(days))
    }

    pub fn zero() -> Self {
        Self(TimeDelta::zero())
    }

    pub fn seconds(&self) -> f64 {
        self.0.num_milliseconds() as f64 / 1000.0
    }

    pub fn fractional_days(&self) -> f64 {
        self.seconds() / SECS_IN_DAY as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == TimeDelta::zero()
    }
}

impl From<TimeDelta> for SimDuration {
    fn from(duration: TimeDelta) -> Self {
        Self(duration)
    }
}

impl Add<SimDuration> for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Add<NaiveDateTime> for SimDuration {
    type Output = NaiveDateTime;

    fn add(self, datetime: NaiveDateTime) -> NaiveDateTime {
        datetime + self.0
    }
}

impl PartialOrd for SimDuration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

pub type TimestepIndex = usize;

/// A single advance of the simulation clock.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Timestep {
    pub date: NaiveDateTime,
    pub index: TimestepIndex,
    pub duration: SimDuration,
}

impl Timestep {
    pub fn new(date: NaiveDateTime, index: TimestepIndex, duration: SimDuration) -> Self {
        Self { date, index, duration }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    /// The duration of this step in days, including any fractional part.
    pub fn days(&self) -> f64 {
        self.duration.fractional_days()
    }

    /// The duration of this step in seconds.
    pub fn seconds(&self) -> f64 {
        self.duration.seconds()
    }

    pub fn is_leap_year(&self) -> bool {
        is_leap_year(self.date.year())
    }

    pub fn day_of_year(&self) -> usize {
        self.date.ordinal() as usize
    }

    pub fn fractional_day_of_year(&self) -> f64 {
        let seconds_in_day = self.date.num_seconds_from_midnight() as f64 / SECS_IN_DAY as f64;
        (self.day_of_year() - 1) as f64 + seconds_in_day
    }
}

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("requested step duration is not positive")]
    NonPositiveStep,
    #[error("clock has already reached the end of the simulation")]
    EndOfSimulation,
}

/// Drives the simulation forward in variable-length steps between `start` and `end`.
///
/// The clock itself does not decide the step length — that is the job of the runoff
/// step controller (§4.5) and the routing engine (§4.6), both of which call
/// [`Clock::advance`] with a duration they have computed. This mirrors the teacher's
/// separation between a `Timestepper` (duration policy) and the `Timestep` it produces,
/// generalized here from a fixed frequency to a caller-chosen one.
#[derive(Debug, Clone)]
pub struct Clock {
    start: NaiveDateTime,
    end: NaiveDateTime,
    current: NaiveDateTime,
    index: TimestepIndex,
}

impl Clock {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            current: start,
            index: 0,
        }
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn now(&self) -> NaiveDateTime {
        self.current
    }

    pub fn index(&self) -> TimestepIndex {
        self.index
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.end
    }

    /// Seconds remaining until the end of the simulation; never negative.
    pub fn time_remaining(&self) -> SimDuration {
        if self.current >= self.end {
            SimDuration::zero()
        } else {
            SimDuration::from(self.end - self.current)
        }
    }

    /// Advance the clock by `duration`, clamped so it never overshoots `end` (spec.md
    /// §4.5: "Clamp step so `currentTime + step <= totalDuration`").
    pub fn advance(&mut self, duration: SimDuration) -> Result<Timestep, ClockError> {
        if duration.is_zero() || duration.seconds() < 0.0 {
            return Err(ClockError::NonPositiveStep);
        }
        if self.is_finished() {
            return Err(ClockError::EndOfSimulation);
        }

        let remaining = self.time_remaining();
        let clamped = if duration.seconds() > remaining.seconds() {
            remaining
        } else {
            duration
        };

        let step = Timestep::new(self.current, self.index, clamped);
        self.current = clamped + self.current;
        self.index += 1;
        Ok(step)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_advance_clamps_to_end() {
        let mut clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 01:00:00"));
        let step = clock.advance(SimDuration::from_seconds(1800.0)).unwrap();
        assert_eq!(step.index, 0);
        assert!(!clock.is_finished());

        // Requesting a step larger than what remains must clamp, not overshoot.
        let step = clock.advance(SimDuration::from_seconds(3600.0)).unwrap();
        assert_eq!(step.duration.seconds(), 1800.0);
        assert!(clock.is_finished());
    }

    #[test]
    fn test_advance_past_end_errors() {
        let mut clock = Clock::new(dt("2021-01-01 00:00:00"), dt("2021-01-01 00:00:00"));
        assert!(matches!(
            clock.advance(SimDuration::from_seconds(1.0)),
            Err(ClockError::EndOfSimulation)
        ));
    }

    #[test]
    fn test_is_leap_year() {
        assert!(is_leap_year(2016));
        assert!(!is_leap_year(2017));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
    }

    #[test]
    fn test_duration_conversions() {
        let d = SimDuration::from_seconds(5400.0);
        assert_eq!(d.seconds(), 5400.0);
        assert!((d.fractional_days() - 0.0625).abs() < 1e-9);
    }
}
