//! Simulated time of day.

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::time::Instant;

const SECS_PER_DAY: f64 = 86_400.0;

/// Wall-clock time of day advanced at the simulation's time scale.
///
/// With a scale of 1.0 this tracks local time. With a scale of 0.001 one
/// real second moves the clock forward by 1000 simulated seconds.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin_wall: NaiveDateTime,
    origin: Instant,
    scale: f64,
}

impl SimClock {
    pub fn new(scale: f64) -> Self {
        Self::starting_at(Local::now().naive_local(), scale)
    }

    pub fn starting_at(origin_wall: NaiveDateTime, scale: f64) -> Self {
        Self {
            origin_wall,
            origin: Instant::now(),
            scale,
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        let simulated_ms = (self.origin.elapsed().as_secs_f64() / self.scale * 1000.0) as i64;
        TimeDelta::try_milliseconds(simulated_ms)
            .and_then(|elapsed| self.origin_wall.checked_add_signed(elapsed))
            .unwrap_or(self.origin_wall)
    }
}

fn at_hour(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or(NaiveTime::MIN);
    now.date().and_time(time)
}

/// Simulated seconds from `now` until the next occurrence of `hour`:00.
///
/// Zero at exactly that hour; once it has passed, the target is tomorrow.
pub fn seconds_until(hour: u32, now: NaiveDateTime) -> f64 {
    let target = at_hour(now, hour);
    let secs = (target - now).num_milliseconds() as f64 / 1000.0;
    if secs >= 0.0 { secs } else { secs + SECS_PER_DAY }
}

/// Simulated seconds elapsed today since `hour`:00, or 0 before that hour.
pub fn seconds_since(hour: u32, now: NaiveDateTime) -> f64 {
    let since = (now - at_hour(now, hour)).num_milliseconds() as f64 / 1000.0;
    since.max(0.0)
}
