//! Record types exchanged with the remote store.
//!
//! Every table has a `*Row` type mirroring what the store returns (JSON from
//! the REST layer, a row from Postgres) and, where the shape needs checking,
//! a validated domain type built with `TryFrom`/`from_row`. Only validated
//! types reach the availability checker.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::BookingConfig,
    schedule::{RoomSchedule, weekday_from_number},
};

/// A record from the store failed validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("room {room}: opening time {min} is not before closing time {max}")]
    InvalidHours {
        room: String,
        min: NaiveTime,
        max: NaiveTime,
    },

    #[error("invalid weekday number: {0}")]
    InvalidWeekday(i32),

    #[error("unknown booking status: {0}")]
    InvalidStatus(String),

    #[error("negative {field}: {value}")]
    Negative { field: &'static str, value: i32 },

    #[error("booking {0} ends before it starts")]
    InvalidInterval(Uuid),
}

// ==================== Time Intervals ====================

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Strict overlap; intervals that only touch do not overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

// ==================== Rooms ====================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoomRow {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
    #[serde(default)]
    pub capacity: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub min_time: Option<NaiveTime>,
    #[serde(default)]
    pub max_time: Option<NaiveTime>,
    #[serde(default)]
    pub available_days: Option<Vec<i32>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
    pub capacity: Option<u32>,
    pub description: Option<String>,
    pub schedule: RoomSchedule,
    pub is_active: bool,
}

impl Room {
    /// Validate a row, falling back to the configured hours when unset.
    pub fn from_row(row: RoomRow, defaults: &BookingConfig) -> Result<Self, ModelError> {
        let min = row.min_time.unwrap_or(defaults.default_min_time);
        let max = row.max_time.unwrap_or(defaults.default_max_time);
        if min >= max {
            return Err(ModelError::InvalidHours {
                room: row.name,
                min,
                max,
            });
        }

        let days = row
            .available_days
            .unwrap_or_default()
            .into_iter()
            .map(|d| weekday_from_number(d).ok_or(ModelError::InvalidWeekday(d)))
            .collect::<Result<Vec<_>, _>>()?;

        let capacity = match row.capacity {
            Some(c) if c < 0 => {
                return Err(ModelError::Negative {
                    field: "capacity",
                    value: c,
                });
            }
            Some(c) => Some(c as u32),
            None => None,
        };

        Ok(Self {
            id: row.id,
            name: row.name,
            unit: row.unit,
            capacity,
            description: row.description,
            schedule: RoomSchedule::new(min, max, days),
            is_active: row.is_active,
        })
    }
}

impl TryFrom<RoomRow> for Room {
    type Error = ModelError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        Room::from_row(row, &BookingConfig::default())
    }
}

/// Room fields an administrator submits when creating or editing a room.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomDraft {
    pub name: String,
    pub unit: String,
    pub capacity: i32,
    pub description: String,
    pub min_time: NaiveTime,
    pub max_time: NaiveTime,
    pub available_days: Vec<i32>,
}

impl RoomDraft {
    /// A blank draft for `unit` with the usual defaults (40 seats, Mon-Fri).
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            unit: unit.into(),
            capacity: 40,
            description: String::new(),
            min_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            max_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            available_days: vec![1, 2, 3, 4, 5],
        }
    }
}

// ==================== Room Bookings ====================

/// Lifecycle state of a room booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    CancelledByTeacher,
    CancelledByAdmin,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CancelledByTeacher => "cancelled_by_teacher",
            BookingStatus::CancelledByAdmin => "cancelled_by_admin",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled_by_teacher" => Ok(BookingStatus::CancelledByTeacher),
            "cancelled_by_admin" => Ok(BookingStatus::CancelledByAdmin),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoomBookingRow {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurring_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomBooking {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub interval: Interval,
    pub status: BookingStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub recurring_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
}

impl RoomBooking {
    /// Confirmed and not soft-deleted: the booking holds its slot.
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Confirmed && self.deleted_at.is_none()
    }

    /// The booking has already ended.
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.interval.end <= now
    }
}

impl TryFrom<RoomBookingRow> for RoomBooking {
    type Error = ModelError;

    fn try_from(row: RoomBookingRow) -> Result<Self, Self::Error> {
        if row.start_ts >= row.end_ts {
            return Err(ModelError::InvalidInterval(row.id));
        }
        Ok(Self {
            id: row.id,
            room_id: row.room_id,
            user_id: row.user_id,
            interval: Interval::new(row.start_ts, row.end_ts),
            status: row.status.parse()?,
            deleted_at: row.deleted_at,
            recurring_id: row.recurring_id,
            created_at: row.created_at,
        })
    }
}

/// Insert payload for a room booking.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewRoomBooking {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurring_id: Option<Uuid>,
}

impl NewRoomBooking {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_ts, self.end_ts)
    }
}

/// Insert payload for a weekly recurring room booking series.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewRecurringBooking {
    pub user_id: Uuid,
    pub unit: String,
    pub room_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub last_generated_month: NaiveDate,
}

// ==================== Settings ====================

/// Minimum lead time policy between "now" and a booking's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvanceNotice {
    #[default]
    Disabled,
    MinHours(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SettingsRow {
    pub unit: String,
    #[serde(default)]
    pub room_booking_enabled: Option<bool>,
    #[serde(default)]
    pub room_min_advance_time_enabled: Option<bool>,
    #[serde(default)]
    pub room_min_advance_time_hours: Option<i32>,
    #[serde(default)]
    pub min_advance_time_enabled: Option<bool>,
    #[serde(default)]
    pub min_advance_time_hours: Option<i32>,
}

/// Per-unit booking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub unit: String,
    pub room_booking_enabled: bool,
    pub room_advance: AdvanceNotice,
    pub equipment_advance: AdvanceNotice,
}

impl Settings {
    /// Policy used when a unit has no settings row.
    pub fn disabled(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            room_booking_enabled: false,
            room_advance: AdvanceNotice::Disabled,
            equipment_advance: AdvanceNotice::Disabled,
        }
    }

    pub fn to_row(&self) -> SettingsRow {
        let (room_enabled, room_hours) = advance_to_columns(self.room_advance);
        let (equipment_enabled, equipment_hours) = advance_to_columns(self.equipment_advance);
        SettingsRow {
            unit: self.unit.clone(),
            room_booking_enabled: Some(self.room_booking_enabled),
            room_min_advance_time_enabled: Some(room_enabled),
            room_min_advance_time_hours: Some(room_hours),
            min_advance_time_enabled: Some(equipment_enabled),
            min_advance_time_hours: Some(equipment_hours),
        }
    }
}

fn advance_from_columns(
    enabled: Option<bool>,
    hours: Option<i32>,
    field: &'static str,
) -> Result<AdvanceNotice, ModelError> {
    if !enabled.unwrap_or(false) {
        return Ok(AdvanceNotice::Disabled);
    }
    let hours = hours.unwrap_or(0);
    if hours < 0 {
        return Err(ModelError::Negative {
            field,
            value: hours,
        });
    }
    Ok(AdvanceNotice::MinHours(hours as u32))
}

fn advance_to_columns(advance: AdvanceNotice) -> (bool, i32) {
    match advance {
        AdvanceNotice::Disabled => (false, 0),
        AdvanceNotice::MinHours(h) => (true, h as i32),
    }
}

impl TryFrom<SettingsRow> for Settings {
    type Error = ModelError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            room_booking_enabled: row.room_booking_enabled.unwrap_or(false),
            room_advance: advance_from_columns(
                row.room_min_advance_time_enabled,
                row.room_min_advance_time_hours,
                "room_min_advance_time_hours",
            )?,
            equipment_advance: advance_from_columns(
                row.min_advance_time_enabled,
                row.min_advance_time_hours,
                "min_advance_time_hours",
            )?,
            unit: row.unit,
        })
    }
}

// ==================== Teachers ====================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Teacher {
    pub id: Uuid,
    pub full_name: String,
    #[serde(rename = "totvs_number")]
    #[sqlx(rename = "totvs_number")]
    pub registration: String,
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default)]
    pub recurring_booking_enabled: bool,
    #[serde(default)]
    pub recurring_booking_units: Vec<String>,
}

impl Teacher {
    /// Whether the teacher may create weekly series in `unit`.
    pub fn can_book_recurring(&self, unit: &str) -> bool {
        self.recurring_booking_enabled || self.recurring_booking_units.iter().any(|u| u == unit)
    }
}

// ==================== Equipment ====================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EquipmentRow {
    pub id: Uuid,
    pub unit: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub total_quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equipment {
    pub id: Uuid,
    pub unit: String,
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub total_quantity: u32,
}

impl TryFrom<EquipmentRow> for Equipment {
    type Error = ModelError;

    fn try_from(row: EquipmentRow) -> Result<Self, Self::Error> {
        if row.total_quantity < 0 {
            return Err(ModelError::Negative {
                field: "total_quantity",
                value: row.total_quantity,
            });
        }
        Ok(Self {
            id: row.id,
            unit: row.unit,
            name: row.name,
            brand: row.brand,
            model: row.model,
            total_quantity: row.total_quantity as u32,
        })
    }
}

/// Lifecycle state of an equipment booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Active,
    /// Returned and closed by an administrator.
    Encerrado,
    Cancelled,
    CancelledByUser,
}

impl EquipmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EquipmentStatus::Active => "active",
            EquipmentStatus::Encerrado => "encerrado",
            EquipmentStatus::Cancelled => "cancelled",
            EquipmentStatus::CancelledByUser => "cancelled_by_user",
        }
    }
}

/// An equipment reservation for a date and time range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EquipmentBooking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit: String,
    #[serde(default)]
    pub local: Option<String>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub equipment_id: Uuid,
    pub quantity: i32,
    pub status: EquipmentStatus,
    #[serde(default)]
    pub verification_token: Option<String>,
}

impl EquipmentBooking {
    /// Whether the booking holds stock during `[start, end)` on `date`.
    pub fn holds(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.status == EquipmentStatus::Active
            && self.booking_date == date
            && self.start_time < end
            && self.end_time > start
    }
}

/// Insert payload for one item of a signed equipment request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewEquipmentBooking {
    pub user_id: Uuid,
    pub unit: String,
    pub local: Option<String>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub equipment_id: Uuid,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    pub status: EquipmentStatus,
    pub term_signed: bool,
    pub term_document: serde_json::Value,
    pub display_id: String,
    pub verification_token: String,
}

impl NewEquipmentBooking {
    pub fn into_booking(self, id: Uuid) -> EquipmentBooking {
        EquipmentBooking {
            id,
            user_id: self.user_id,
            unit: self.unit,
            local: self.local,
            booking_date: self.booking_date,
            start_time: self.start_time,
            end_time: self.end_time,
            equipment_id: self.equipment_id,
            quantity: self.quantity,
            status: self.status,
            verification_token: Some(self.verification_token),
        }
    }
}

/// Quantity of one equipment item held by an overlapping active booking.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct EquipmentUsage {
    pub equipment_id: Uuid,
    pub quantity: i32,
}

// ==================== Loans ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Returned,
}

/// Equipment handed out by an administrator outside the booking flow.
///
/// While a loan is active its quantity is taken out of the item's
/// `total_quantity`; returning or deleting it puts the stock back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EquipmentLoan {
    pub id: Uuid,
    pub user_full_name: String,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub equipment_id: Uuid,
    pub quantity: i32,
    #[serde(default)]
    pub asset_number: Option<String>,
    #[serde(default)]
    pub cpf: Option<String>,
    pub unit: String,
    pub status: LoanStatus,
}

impl EquipmentLoan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }
}

/// Insert payload for a loan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewLoan {
    pub user_full_name: String,
    pub user_role: Option<String>,
    pub location: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub equipment_id: Uuid,
    pub quantity: i32,
    pub asset_number: Option<String>,
    pub cpf: Option<String>,
    pub unit: String,
    pub status: LoanStatus,
}

impl NewLoan {
    pub fn into_loan(self, id: Uuid) -> EquipmentLoan {
        EquipmentLoan {
            id,
            user_full_name: self.user_full_name,
            user_role: self.user_role,
            location: self.location,
            start_at: self.start_at,
            end_at: self.end_at,
            equipment_id: self.equipment_id,
            quantity: self.quantity,
            asset_number: self.asset_number,
            cpf: self.cpf,
            unit: self.unit,
            status: self.status,
        }
    }
}

// ==================== Verification ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeacherRef {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub totvs_number: Option<String>,
}

/// Equipment booking as looked up by its QR verification token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationRow {
    pub id: Uuid,
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub booking_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: String,
    #[serde(default)]
    pub term_document: Option<serde_json::Value>,
    #[serde(default)]
    pub users: Option<TeacherRef>,
}

/// Audit trail entry for booking-related actions.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    pub booking_id: Uuid,
    pub action: String,
    pub performed_by: String,
    pub details: serde_json::Value,
}

// ==================== Classrooms ====================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Classroom {
    pub id: Uuid,
    pub name: String,
    pub unit: String,
    pub position: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}
