//! Room booking availability check.
//!
//! A pure decision over a room's schedule, the occupied intervals of that room
//! and the unit's advance-notice policy. It only fails fast for the user; the
//! store's exclusion constraint remains the authority on conflicts.

use chrono::{
    DateTime, DurationRound, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc,
};
use thiserror::Error;

use crate::{
    models::{AdvanceNotice, Interval, Settings},
    schedule::RoomSchedule,
    traits::Clock,
};

/// Why a candidate booking was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("A hora de término deve ser posterior à hora de início.")]
    EndBeforeStart,

    #[error(
        "O horário deve estar entre {} e {}.",
        .open.format("%H:%M"),
        .close.format("%H:%M")
    )]
    OutsideOperatingHours { open: NaiveTime, close: NaiveTime },

    #[error("A sala não está disponível neste dia da semana.")]
    DayNotAvailable,

    #[error("Este horário já está ocupado por outro agendamento.")]
    SlotOccupied,

    #[error("Não é possível realizar agendamentos para horários que já passaram.")]
    InPast,

    #[error("Não é possível agendar para datas passadas.")]
    PastDate,

    #[error(
        "É necessário agendar com no mínimo {hours} horas de antecedência. Por favor, escolha outro horário."
    )]
    InsufficientLeadTime { hours: u32 },
}

impl Rejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::EndBeforeStart => "end_before_start",
            Rejection::OutsideOperatingHours { .. } => "outside_operating_hours",
            Rejection::DayNotAvailable => "day_not_available",
            Rejection::SlotOccupied => "slot_occupied",
            Rejection::InPast => "in_past",
            Rejection::PastDate => "past_date",
            Rejection::InsufficientLeadTime { .. } => "insufficient_lead_time",
        }
    }
}

/// A candidate booking as entered by the user: a calendar date and a
/// wall-clock range on that date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl BookingRequest {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { date, start, end }
    }

    /// The requested range as UTC instants, reading the wall-clock times at `offset`.
    pub fn interval(&self, offset: FixedOffset) -> Interval {
        Interval::new(
            local_to_utc(self.date.and_time(self.start), offset),
            local_to_utc(self.date.and_time(self.end), offset),
        )
    }
}

/// Interpret a naive local datetime at a fixed offset.
pub fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, Utc)
}

/// UTC bounds `[midnight, next midnight)` of a local calendar day.
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> Interval {
    let start = local_to_utc(date.and_time(NaiveTime::MIN), offset);
    Interval::new(start, start + TimeDelta::days(1))
}

/// Decide whether `request` can be booked, reading wall-clock times at `offset`.
///
/// Checks run in order and the first failure wins:
/// 1. end after start
/// 2. inside the room's operating window (bounds inclusive)
/// 3. weekday allowed by the room
/// 4. no overlap with an occupied interval (touching is fine)
/// 5. without an advance-notice policy, not before the current minute
/// 6. with one, at least that many whole hours ahead of `now`
pub fn check_availability(
    schedule: &RoomSchedule,
    occupied: &[Interval],
    request: &BookingRequest,
    settings: Option<&Settings>,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if request.start >= request.end {
        return Err(Rejection::EndBeforeStart);
    }

    if !schedule.contains_range(request.start, request.end) {
        return Err(Rejection::OutsideOperatingHours {
            open: schedule.open(),
            close: schedule.close(),
        });
    }

    if !schedule.is_day_available(request.date) {
        return Err(Rejection::DayNotAvailable);
    }

    let candidate = request.interval(offset);
    if occupied.iter().any(|slot| candidate.overlaps(slot)) {
        return Err(Rejection::SlotOccupied);
    }

    let advance = settings.map(|s| s.room_advance).unwrap_or_default();
    check_lead_time(candidate.start, advance, now)
}

/// Same as [`check_availability`], reading "now" from `clock`.
pub fn check_availability_with_clock<C: Clock>(
    schedule: &RoomSchedule,
    occupied: &[Interval],
    request: &BookingRequest,
    settings: Option<&Settings>,
    offset: FixedOffset,
    clock: &C,
) -> Result<(), Rejection> {
    check_availability(
        schedule,
        occupied,
        request,
        settings,
        offset,
        clock.now_utc(),
    )
}

/// Past-time and lead-time rules shared by room and equipment requests.
pub(crate) fn check_lead_time(
    start: DateTime<Utc>,
    advance: AdvanceNotice,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    match advance {
        AdvanceNotice::Disabled => {
            // Same-minute bookings are allowed.
            let now = now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now);
            if start < now {
                return Err(Rejection::InPast);
            }
        }
        AdvanceNotice::MinHours(hours) => {
            if (start - now).num_hours() < i64::from(hours) {
                return Err(Rejection::InsufficientLeadTime { hours });
            }
        }
    }
    Ok(())
}
