//! Persistence seams.
//!
//! `BookingStore` covers what teachers and the public verification page read
//! and write. `AdminStore` covers the privileged operations that the hosted
//! service runs as procedures checking the caller's admin session token.

mod memory;
mod postgres;
mod rest;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

use crate::{
    error::StoreError,
    models::{
        AuditEntry, BookingStatus, Classroom, Equipment, EquipmentBooking, EquipmentLoan,
        EquipmentUsage, Interval, NewEquipmentBooking, NewLoan, NewRecurringBooking,
        NewRoomBooking, Room, RoomBooking, RoomDraft, Settings, Teacher, VerificationRow,
    },
    timetable::ClassSchedule,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[allow(async_fn_in_trait)]
pub trait BookingStore {
    async fn teacher(&self, user_id: Uuid) -> StoreResult<Option<Teacher>>;

    /// Settings of a unit; `None` when the unit has no settings row.
    async fn settings(&self, unit: &str) -> StoreResult<Option<Settings>>;

    /// Active rooms of the given units, ordered by name.
    async fn rooms(&self, units: &[String]) -> StoreResult<Vec<Room>>;

    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>>;

    /// Intervals of confirmed, non-deleted bookings of a room overlapping `window`.
    async fn room_occupancy(&self, room_id: Uuid, window: Interval) -> StoreResult<Vec<Interval>>;

    /// Insert a booking. Fails with [`StoreError::Conflict`] when it would
    /// overlap another confirmed booking of the same room.
    async fn insert_room_booking(&self, booking: &NewRoomBooking) -> StoreResult<RoomBooking>;

    async fn room_booking(&self, booking_id: Uuid) -> StoreResult<Option<RoomBooking>>;

    /// Non-deleted bookings of a user starting at or after `from`, ascending.
    async fn user_room_bookings(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<RoomBooking>>;

    async fn set_room_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<()>;

    async fn soft_delete_room_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Record a weekly series and return its id.
    async fn insert_recurring(&self, series: &NewRecurringBooking) -> StoreResult<Uuid>;

    /// Stop a series from generating further occurrences.
    async fn deactivate_recurring(&self, series_id: Uuid) -> StoreResult<()>;

    async fn equipment(&self, unit: &str) -> StoreResult<Vec<Equipment>>;

    /// Quantities held by `active` equipment bookings of a unit overlapping
    /// `[start, end)` on `date`.
    async fn equipment_usage(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> StoreResult<Vec<EquipmentUsage>>;

    /// Insert every item of one signed request together.
    async fn insert_equipment_bookings(
        &self,
        rows: &[NewEquipmentBooking],
    ) -> StoreResult<Vec<EquipmentBooking>>;

    async fn booking_by_token(&self, token: &str) -> StoreResult<Option<VerificationRow>>;

    async fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<()>;
}

#[allow(async_fn_in_trait)]
pub trait AdminStore {
    async fn create_room(&self, draft: &RoomDraft) -> StoreResult<()>;

    async fn update_room(&self, room_id: Uuid, draft: &RoomDraft) -> StoreResult<()>;

    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()>;

    async fn set_room_active(&self, room_id: Uuid, active: bool) -> StoreResult<()>;

    /// Classrooms of a unit ordered by position.
    async fn classrooms(&self, unit: &str) -> StoreResult<Vec<Classroom>>;

    async fn create_classroom(&self, unit: &str, name: &str) -> StoreResult<()>;

    async fn update_classroom(&self, classroom_id: Uuid, name: &str) -> StoreResult<()>;

    async fn delete_classroom(&self, classroom_id: Uuid) -> StoreResult<()>;

    /// Persist `ordered` as the new position order (index = position).
    async fn reorder_classrooms(&self, ordered: &[Uuid]) -> StoreResult<()>;

    async fn upsert_settings(&self, settings: &Settings) -> StoreResult<()>;

    async fn class_schedule(
        &self,
        unit: &str,
        day_of_week: &str,
        segment: &str,
    ) -> StoreResult<Option<ClassSchedule>>;

    async fn upsert_class_schedule(&self, schedule: &ClassSchedule) -> StoreResult<()>;

    /// Loans of a unit, newest start first.
    async fn loans(&self, unit: &str) -> StoreResult<Vec<EquipmentLoan>>;

    async fn loan(&self, loan_id: Uuid) -> StoreResult<Option<EquipmentLoan>>;

    /// Record a loan and take its quantity out of the item's stock.
    async fn create_loan(&self, loan: &NewLoan) -> StoreResult<EquipmentLoan>;

    /// Mark a loan returned at `at` and put its quantity back in stock.
    async fn return_loan(&self, loan_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove a loan for good, restoring stock first if it was still active.
    async fn delete_loan(&self, loan_id: Uuid) -> StoreResult<()>;

    /// Change the signed-in administrator's password.
    async fn change_own_password(&self, current: &str, new: &str) -> StoreResult<()>;

    /// Set another administrator's password.
    async fn reset_admin_password(&self, admin_id: Uuid, new: &str) -> StoreResult<()>;
}
