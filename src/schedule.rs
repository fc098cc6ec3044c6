use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};

use crate::config::BookingConfig;

/// Short Portuguese day labels indexed by day number (0=Sunday).
const DAY_LABELS: [&str; 7] = ["Dom", "Seg", "Ter", "Qua", "Qui", "Sex", "Sáb"];

/// Operating window and allowed weekdays of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSchedule {
    open: NaiveTime,
    close: NaiveTime,
    days: Vec<Weekday>,
}

impl RoomSchedule {
    /// Create a schedule. An empty `days` list means every day is allowed.
    pub fn new(open: NaiveTime, close: NaiveTime, days: Vec<Weekday>) -> Self {
        let mut days = days;
        days.sort_by_key(|d| d.num_days_from_sunday());
        days.dedup();
        Self { open, close, days }
    }

    /// Schedule using the configured fallback hours, every day allowed.
    pub fn from_config(config: &BookingConfig) -> Self {
        Self::new(config.default_min_time, config.default_max_time, Vec::new())
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    pub fn days(&self) -> &[Weekday] {
        &self.days
    }

    /// Whether `[start, end]` lies inside the operating window (bounds inclusive).
    pub fn contains_range(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.open && end <= self.close
    }

    /// Whether bookings are accepted on the weekday of `date`.
    pub fn is_day_available(&self, date: NaiveDate) -> bool {
        self.days.is_empty() || self.days.contains(&date.weekday())
    }

    /// Human-readable list of allowed days, e.g. "Seg, Ter, Qua".
    pub fn describe_days(&self) -> String {
        if self.days.is_empty() {
            return "Todos os dias".to_string();
        }
        self.days
            .iter()
            .map(|d| DAY_LABELS[d.num_days_from_sunday() as usize])
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Operating window formatted as "HH:MM às HH:MM".
    pub fn describe_hours(&self) -> String {
        format!(
            "{} às {}",
            self.open.format("%H:%M"),
            self.close.format("%H:%M")
        )
    }
}

impl Default for RoomSchedule {
    fn default() -> Self {
        Self::from_config(&BookingConfig::default())
    }
}

/// Convert a day number (0=Sunday..6=Saturday) into a weekday.
pub fn weekday_from_number(day: i32) -> Option<Weekday> {
    match day {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// Day number (0=Sunday..6=Saturday) of a weekday.
pub fn weekday_number(day: Weekday) -> i32 {
    day.num_days_from_sunday() as i32
}
