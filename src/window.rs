use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use log::warn;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref END_OF_DAY: NaiveTime = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap();
}

const DEFAULT_TIME_ZONE: &str = "UTC";

/// OperationalWindow restricts a flag to a time-of-day span on selected weekdays.
///
/// The span is interpreted in a time zone: the evaluation context's if it names one, the
/// window's own otherwise. A span whose start is later than its stop wraps past midnight, so
/// `22:00`–`06:00` covers the night. An empty `days_active` set means every day.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalWindow {
    start_on: NaiveTime,
    stop_on: NaiveTime,
    #[serde(default = "default_time_zone")]
    time_zone: String,
    #[serde(default)]
    days_active: HashSet<Weekday>,
}

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

/// Where an instant falls relative to an [OperationalWindow].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowStatus {
    Within,
    OutsideTime,
    OutsideDays,
}

impl OperationalWindow {
    pub fn new(start_on: NaiveTime, stop_on: NaiveTime, time_zone: impl Into<String>) -> Self {
        OperationalWindow {
            start_on,
            stop_on,
            time_zone: time_zone.into(),
            days_active: HashSet::new(),
        }
    }

    /// The window covering the whole day, every day.
    pub fn always_open() -> Self {
        OperationalWindow::new(NaiveTime::MIN, *END_OF_DAY, DEFAULT_TIME_ZONE)
    }

    /// Restricts the window to `days`.
    pub fn on_days<I: IntoIterator<Item = Weekday>>(mut self, days: I) -> Self {
        self.days_active = days.into_iter().collect();
        self
    }

    pub fn start_on(&self) -> NaiveTime {
        self.start_on
    }

    pub fn stop_on(&self) -> NaiveTime {
        self.stop_on
    }

    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }

    pub fn days_active(&self) -> &HashSet<Weekday> {
        &self.days_active
    }

    pub fn is_always_open(&self) -> bool {
        self.start_on == NaiveTime::MIN && self.stop_on == *END_OF_DAY && self.days_active.is_empty()
    }

    /// Locates `at` relative to this window, reading the local clock in `zone_override` when
    /// given and in the window's own zone otherwise.
    pub fn status_at(&self, at: DateTime<Utc>, zone_override: Option<&str>) -> WindowStatus {
        if self.is_always_open() {
            return WindowStatus::Within;
        }

        let zone = resolve_zone(zone_override.unwrap_or(&self.time_zone));
        let local = at.with_timezone(&zone);

        if !self.days_active.is_empty() && !self.days_active.contains(&local.weekday()) {
            return WindowStatus::OutsideDays;
        }

        let time = local.time();
        let within = if self.start_on <= self.stop_on {
            self.start_on <= time && time <= self.stop_on
        } else {
            time >= self.start_on || time <= self.stop_on
        };

        if within {
            WindowStatus::Within
        } else {
            WindowStatus::OutsideTime
        }
    }
}

impl Default for OperationalWindow {
    fn default() -> Self {
        OperationalWindow::always_open()
    }
}

fn resolve_zone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(zone) => zone,
        Err(e) => {
            warn!("unknown time zone {:?} ({}), falling back to UTC", name, e);
            Tz::UTC
        }
    }
}
