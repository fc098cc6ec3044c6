use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use super::{AdminStore, BookingStore, StoreResult};
use crate::{
    error::StoreError,
    models::{
        AuditEntry, BookingStatus, Classroom, Equipment, EquipmentBooking, EquipmentLoan,
        EquipmentUsage, Interval, LoanStatus, NewEquipmentBooking, NewLoan, NewRecurringBooking,
        NewRoomBooking, Room, RoomBooking, RoomDraft, Settings, Teacher, TeacherRef,
        VerificationRow,
    },
    schedule::{RoomSchedule, weekday_from_number},
    timetable::ClassSchedule,
};

#[derive(Debug, Default)]
struct Inner {
    teachers: HashMap<Uuid, Teacher>,
    settings: HashMap<String, Settings>,
    rooms: Vec<Room>,
    bookings: Vec<RoomBooking>,
    recurring: Vec<(Uuid, NewRecurringBooking)>,
    equipment: Vec<Equipment>,
    equipment_bookings: Vec<EquipmentBooking>,
    verifications: HashMap<String, VerificationRow>,
    audit: Vec<AuditEntry>,
    classrooms: Vec<Classroom>,
    schedules: Vec<ClassSchedule>,
    loans: Vec<EquipmentLoan>,
    admins: HashMap<Uuid, String>,
    session: Option<Uuid>,
    fail_next_insert: Option<StoreError>,
}

impl Inner {
    /// Move `delta` units into (positive) or out of (negative) an item's stock.
    fn adjust_stock(&mut self, equipment_id: Uuid, delta: i64) -> StoreResult<()> {
        let item = self
            .equipment
            .iter_mut()
            .find(|e| e.id == equipment_id)
            .ok_or(StoreError::NotFound)?;
        let current = item.total_quantity;
        item.total_quantity = u32::try_from(i64::from(current) + delta).map_err(|_| {
            StoreError::Rejected(format!(
                "Quantidade indisponível. Máximo disponível: {current}"
            ))
        })?;
        Ok(())
    }

    fn signed_in(&self) -> StoreResult<Uuid> {
        self.session.ok_or(StoreError::Unauthorized)
    }
}

/// In-process store with the same exclusion rule as the database.
///
/// Clones share state, so a test can hold one handle while a service owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_teacher(&self, teacher: Teacher) {
        self.lock().teachers.insert(teacher.id, teacher);
    }

    pub fn set_settings(&self, settings: Settings) {
        self.lock().settings.insert(settings.unit.clone(), settings);
    }

    pub fn add_room(&self, room: Room) {
        self.lock().rooms.push(room);
    }

    pub fn add_equipment(&self, equipment: Equipment) {
        self.lock().equipment.push(equipment);
    }

    pub fn add_equipment_booking(&self, booking: EquipmentBooking) {
        self.lock().equipment_bookings.push(booking);
    }

    pub fn add_verification(&self, token: impl Into<String>, row: VerificationRow) {
        self.lock().verifications.insert(token.into(), row);
    }

    /// Register an administrator. Passwords are kept as given.
    pub fn add_admin(&self, admin_id: Uuid, password: impl Into<String>) {
        self.lock().admins.insert(admin_id, password.into());
    }

    /// Act as `admin_id` for the password operations.
    pub fn sign_in_admin(&self, admin_id: Uuid) {
        self.lock().session = Some(admin_id);
    }

    pub fn admin_password(&self, admin_id: Uuid) -> Option<String> {
        self.lock().admins.get(&admin_id).cloned()
    }

    pub fn equipment_stock(&self, equipment_id: Uuid) -> Option<u32> {
        self.lock()
            .equipment
            .iter()
            .find(|e| e.id == equipment_id)
            .map(|e| e.total_quantity)
    }

    pub fn equipment_bookings(&self) -> Vec<EquipmentBooking> {
        self.lock().equipment_bookings.clone()
    }

    /// Make the next booking insert fail with `error`.
    pub fn fail_next_insert(&self, error: StoreError) {
        self.lock().fail_next_insert = Some(error);
    }

    pub fn room_bookings(&self) -> Vec<RoomBooking> {
        self.lock().bookings.clone()
    }

    pub fn recurring_series(&self) -> Vec<NewRecurringBooking> {
        self.lock().recurring.iter().map(|(_, s)| s.clone()).collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }

    fn with_booking<F>(&self, booking_id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut RoomBooking),
    {
        let mut inner = self.lock();
        let booking = inner
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or(StoreError::NotFound)?;
        f(booking);
        Ok(())
    }

    fn with_room<F>(&self, room_id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Room),
    {
        let mut inner = self.lock();
        let room = inner
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or(StoreError::NotFound)?;
        f(room);
        Ok(())
    }
}

fn schedule_from_draft(draft: &RoomDraft) -> StoreResult<RoomSchedule> {
    if draft.min_time >= draft.max_time {
        return Err(StoreError::Rejected(
            "O horário de abertura deve ser anterior ao de fechamento.".to_string(),
        ));
    }
    let days = draft
        .available_days
        .iter()
        .map(|&d| weekday_from_number(d).ok_or(crate::models::ModelError::InvalidWeekday(d)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RoomSchedule::new(draft.min_time, draft.max_time, days))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.trim().is_empty()).then(|| s.to_string())
}

impl BookingStore for MemoryStore {
    async fn teacher(&self, user_id: Uuid) -> StoreResult<Option<Teacher>> {
        Ok(self.lock().teachers.get(&user_id).cloned())
    }

    async fn settings(&self, unit: &str) -> StoreResult<Option<Settings>> {
        Ok(self.lock().settings.get(unit).cloned())
    }

    async fn rooms(&self, units: &[String]) -> StoreResult<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .lock()
            .rooms
            .iter()
            .filter(|r| r.is_active && units.contains(&r.unit))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        Ok(self.lock().rooms.iter().find(|r| r.id == room_id).cloned())
    }

    async fn room_occupancy(&self, room_id: Uuid, window: Interval) -> StoreResult<Vec<Interval>> {
        Ok(self
            .lock()
            .bookings
            .iter()
            .filter(|b| b.room_id == room_id && b.is_active() && b.interval.overlaps(&window))
            .map(|b| b.interval)
            .collect())
    }

    async fn insert_room_booking(&self, booking: &NewRoomBooking) -> StoreResult<RoomBooking> {
        let mut inner = self.lock();
        if let Some(e) = inner.fail_next_insert.take() {
            return Err(e);
        }

        let candidate = booking.interval();
        if booking.status == BookingStatus::Confirmed
            && inner.bookings.iter().any(|b| {
                b.room_id == booking.room_id && b.is_active() && b.interval.overlaps(&candidate)
            })
        {
            return Err(StoreError::Conflict {
                message: "conflicting key value violates exclusion constraint \"no_overlapping_room_bookings\"".to_string(),
            });
        }

        let stored = RoomBooking {
            id: Uuid::new_v4(),
            room_id: booking.room_id,
            user_id: booking.user_id,
            interval: candidate,
            status: booking.status,
            deleted_at: None,
            recurring_id: booking.recurring_id,
            created_at: Some(Utc::now()),
        };
        inner.bookings.push(stored.clone());
        Ok(stored)
    }

    async fn room_booking(&self, booking_id: Uuid) -> StoreResult<Option<RoomBooking>> {
        Ok(self
            .lock()
            .bookings
            .iter()
            .find(|b| b.id == booking_id)
            .cloned())
    }

    async fn user_room_bookings(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<RoomBooking>> {
        let mut bookings: Vec<RoomBooking> = self
            .lock()
            .bookings
            .iter()
            .filter(|b| b.user_id == user_id && b.deleted_at.is_none() && b.interval.start >= from)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.interval.start);
        Ok(bookings)
    }

    async fn set_room_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<()> {
        self.with_booking(booking_id, |b| b.status = status)
    }

    async fn soft_delete_room_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_booking(booking_id, |b| b.deleted_at = Some(at))
    }

    async fn insert_recurring(&self, series: &NewRecurringBooking) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.lock().recurring.push((id, series.clone()));
        Ok(id)
    }

    async fn deactivate_recurring(&self, series_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let (_, series) = inner
            .recurring
            .iter_mut()
            .find(|(id, _)| *id == series_id)
            .ok_or(StoreError::NotFound)?;
        series.is_active = false;
        Ok(())
    }

    async fn equipment(&self, unit: &str) -> StoreResult<Vec<Equipment>> {
        Ok(self
            .lock()
            .equipment
            .iter()
            .filter(|e| e.unit == unit)
            .cloned()
            .collect())
    }

    async fn equipment_usage(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> StoreResult<Vec<EquipmentUsage>> {
        Ok(self
            .lock()
            .equipment_bookings
            .iter()
            .filter(|b| b.unit == unit && b.holds(date, start, end))
            .map(|b| EquipmentUsage {
                equipment_id: b.equipment_id,
                quantity: b.quantity,
            })
            .collect())
    }

    async fn insert_equipment_bookings(
        &self,
        rows: &[NewEquipmentBooking],
    ) -> StoreResult<Vec<EquipmentBooking>> {
        let mut inner = self.lock();
        if let Some(e) = inner.fail_next_insert.take() {
            return Err(e);
        }

        let created_at = Utc::now();
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let booking = row.clone().into_booking(Uuid::new_v4());
            let users = inner.teachers.get(&row.user_id).map(|t| TeacherRef {
                full_name: Some(t.full_name.clone()),
                totvs_number: Some(t.registration.clone()),
            });
            inner.verifications.insert(
                row.verification_token.clone(),
                VerificationRow {
                    id: booking.id,
                    display_id: Some(row.display_id.clone()),
                    created_at: Some(created_at),
                    booking_date: row.booking_date,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    status: row.status.as_str().to_string(),
                    term_document: Some(row.term_document.clone()),
                    users,
                },
            );
            inner.equipment_bookings.push(booking.clone());
            stored.push(booking);
        }
        Ok(stored)
    }

    async fn booking_by_token(&self, token: &str) -> StoreResult<Option<VerificationRow>> {
        Ok(self.lock().verifications.get(token).cloned())
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.lock().audit.push(entry.clone());
        Ok(())
    }
}

impl AdminStore for MemoryStore {
    async fn create_room(&self, draft: &RoomDraft) -> StoreResult<()> {
        let schedule = schedule_from_draft(draft)?;
        self.lock().rooms.push(Room {
            id: Uuid::new_v4(),
            name: draft.name.clone(),
            unit: draft.unit.clone(),
            capacity: u32::try_from(draft.capacity).ok(),
            description: non_empty(&draft.description),
            schedule,
            is_active: true,
        });
        Ok(())
    }

    async fn update_room(&self, room_id: Uuid, draft: &RoomDraft) -> StoreResult<()> {
        let schedule = schedule_from_draft(draft)?;
        self.with_room(room_id, |room| {
            room.name = draft.name.clone();
            room.unit = draft.unit.clone();
            room.capacity = u32::try_from(draft.capacity).ok();
            room.description = non_empty(&draft.description);
            room.schedule = schedule;
        })
    }

    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let before = inner.rooms.len();
        inner.rooms.retain(|r| r.id != room_id);
        if inner.rooms.len() == before {
            return Err(StoreError::NotFound);
        }
        inner.bookings.retain(|b| b.room_id != room_id);
        Ok(())
    }

    async fn set_room_active(&self, room_id: Uuid, active: bool) -> StoreResult<()> {
        self.with_room(room_id, |room| room.is_active = active)
    }

    async fn classrooms(&self, unit: &str) -> StoreResult<Vec<Classroom>> {
        let mut classrooms: Vec<Classroom> = self
            .lock()
            .classrooms
            .iter()
            .filter(|c| c.unit == unit && c.is_active)
            .cloned()
            .collect();
        classrooms.sort_by_key(|c| c.position);
        Ok(classrooms)
    }

    async fn create_classroom(&self, unit: &str, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let position = inner
            .classrooms
            .iter()
            .filter(|c| c.unit == unit)
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0);
        inner.classrooms.push(Classroom {
            id: Uuid::new_v4(),
            name: name.to_string(),
            unit: unit.to_string(),
            position,
            is_active: true,
        });
        Ok(())
    }

    async fn update_classroom(&self, classroom_id: Uuid, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let classroom = inner
            .classrooms
            .iter_mut()
            .find(|c| c.id == classroom_id)
            .ok_or(StoreError::NotFound)?;
        classroom.name = name.to_string();
        Ok(())
    }

    async fn delete_classroom(&self, classroom_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let classroom = inner
            .classrooms
            .iter_mut()
            .find(|c| c.id == classroom_id)
            .ok_or(StoreError::NotFound)?;
        classroom.is_active = false;
        Ok(())
    }

    async fn reorder_classrooms(&self, ordered: &[Uuid]) -> StoreResult<()> {
        let mut inner = self.lock();
        for (position, id) in ordered.iter().enumerate() {
            if let Some(c) = inner.classrooms.iter_mut().find(|c| c.id == *id) {
                c.position = position as i32;
            }
        }
        Ok(())
    }

    async fn upsert_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.set_settings(settings.clone());
        Ok(())
    }

    async fn class_schedule(
        &self,
        unit: &str,
        day_of_week: &str,
        segment: &str,
    ) -> StoreResult<Option<ClassSchedule>> {
        Ok(self
            .lock()
            .schedules
            .iter()
            .find(|s| s.unit == unit && s.day_of_week == day_of_week && s.segment == segment)
            .cloned())
    }

    async fn upsert_class_schedule(&self, schedule: &ClassSchedule) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.schedules.retain(|s| {
            !(s.unit == schedule.unit
                && s.day_of_week == schedule.day_of_week
                && s.segment == schedule.segment)
        });
        inner.schedules.push(schedule.clone());
        Ok(())
    }

    async fn loans(&self, unit: &str) -> StoreResult<Vec<EquipmentLoan>> {
        let mut loans: Vec<EquipmentLoan> = self
            .lock()
            .loans
            .iter()
            .filter(|l| l.unit == unit)
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.start_at.cmp(&a.start_at));
        Ok(loans)
    }

    async fn loan(&self, loan_id: Uuid) -> StoreResult<Option<EquipmentLoan>> {
        Ok(self.lock().loans.iter().find(|l| l.id == loan_id).cloned())
    }

    async fn create_loan(&self, loan: &NewLoan) -> StoreResult<EquipmentLoan> {
        let mut inner = self.lock();
        inner.adjust_stock(loan.equipment_id, -i64::from(loan.quantity))?;
        let stored = loan.clone().into_loan(Uuid::new_v4());
        inner.loans.push(stored.clone());
        Ok(stored)
    }

    async fn return_loan(&self, loan_id: Uuid, _at: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.lock();
        let loan = inner
            .loans
            .iter()
            .find(|l| l.id == loan_id)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        if !loan.is_active() {
            return Ok(());
        }
        inner.adjust_stock(loan.equipment_id, i64::from(loan.quantity))?;
        if let Some(l) = inner.loans.iter_mut().find(|l| l.id == loan_id) {
            l.status = LoanStatus::Returned;
        }
        Ok(())
    }

    async fn delete_loan(&self, loan_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let position = inner
            .loans
            .iter()
            .position(|l| l.id == loan_id)
            .ok_or(StoreError::NotFound)?;
        let loan = inner.loans.remove(position);
        if loan.is_active() {
            inner.adjust_stock(loan.equipment_id, i64::from(loan.quantity))?;
        }
        Ok(())
    }

    async fn change_own_password(&self, current: &str, new: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        let admin_id = inner.signed_in()?;
        let stored = inner.admins.get_mut(&admin_id).ok_or(StoreError::Unauthorized)?;
        if stored.as_str() != current {
            return Err(StoreError::Rejected("Senha atual incorreta.".to_string()));
        }
        *stored = new.to_string();
        Ok(())
    }

    async fn reset_admin_password(&self, admin_id: Uuid, new: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.signed_in()?;
        let stored = inner.admins.get_mut(&admin_id).ok_or(StoreError::NotFound)?;
        *stored = new.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, h, 0, 0).unwrap()
    }

    fn new_booking(room_id: Uuid, start: u32, end: u32) -> NewRoomBooking {
        NewRoomBooking {
            room_id,
            user_id: Uuid::new_v4(),
            start_ts: at(start),
            end_ts: at(end),
            status: BookingStatus::Confirmed,
            recurring_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_enforces_exclusion() {
        let store = MemoryStore::new();
        let room = Uuid::new_v4();

        store.insert_room_booking(&new_booking(room, 12, 13)).await.unwrap();
        let err = store
            .insert_room_booking(&new_booking(room, 12, 14))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Adjacent and other rooms are fine.
        store.insert_room_booking(&new_booking(room, 13, 14)).await.unwrap();
        store
            .insert_room_booking(&new_booking(Uuid::new_v4(), 12, 13))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_and_deleted_release_slot() {
        let store = MemoryStore::new();
        let room = Uuid::new_v4();

        let first = store.insert_room_booking(&new_booking(room, 12, 13)).await.unwrap();
        store
            .set_room_booking_status(first.id, BookingStatus::CancelledByTeacher)
            .await
            .unwrap();
        let second = store.insert_room_booking(&new_booking(room, 12, 13)).await.unwrap();
        store.soft_delete_room_booking(second.id, at(14)).await.unwrap();
        store.insert_room_booking(&new_booking(room, 12, 13)).await.unwrap();

        let window = Interval::new(at(0), at(0) + TimeDelta::days(1));
        assert_eq!(store.room_occupancy(room, window).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_insert_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next_insert(StoreError::NotFound);
        let room = Uuid::new_v4();
        assert!(store.insert_room_booking(&new_booking(room, 9, 10)).await.is_err());
        assert!(store.insert_room_booking(&new_booking(room, 9, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_classroom_reorder() {
        let store = MemoryStore::new();
        store.create_classroom("A", "6º Ano A").await.unwrap();
        store.create_classroom("A", "6º Ano B").await.unwrap();
        let before = store.classrooms("A").await.unwrap();
        assert_eq!(before[0].name, "6º Ano A");

        store
            .reorder_classrooms(&[before[1].id, before[0].id])
            .await
            .unwrap();
        let after = store.classrooms("A").await.unwrap();
        assert_eq!(after[0].name, "6º Ano B");
        assert_eq!(after[1].position, 1);

        store.delete_classroom(after[0].id).await.unwrap();
        assert_eq!(store.classrooms("A").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_room_rejects_inverted_hours() {
        let store = MemoryStore::new();
        let mut draft = RoomDraft::new("A");
        draft.name = "Lab".to_string();
        draft.min_time = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        draft.max_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(matches!(
            store.create_room(&draft).await,
            Err(StoreError::Rejected(_))
        ));
    }

    fn projector(total: u32) -> Equipment {
        Equipment {
            id: Uuid::new_v4(),
            unit: "A".to_string(),
            name: "Projetor".to_string(),
            brand: None,
            model: None,
            total_quantity: total,
        }
    }

    fn new_loan(equipment_id: Uuid, quantity: i32) -> NewLoan {
        NewLoan {
            user_full_name: "Carlos Souza".to_string(),
            user_role: Some("Professor".to_string()),
            location: Some("Auditório".to_string()),
            start_at: at(12),
            end_at: at(15),
            equipment_id,
            quantity,
            asset_number: Some("PAT-01, PAT-02".to_string()),
            cpf: None,
            unit: "A".to_string(),
            status: LoanStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_loan_takes_and_returns_stock() {
        let store = MemoryStore::new();
        let item = projector(5);
        store.add_equipment(item.clone());

        let loan = store.create_loan(&new_loan(item.id, 2)).await.unwrap();
        assert_eq!(store.equipment_stock(item.id), Some(3));

        store.return_loan(loan.id, at(16)).await.unwrap();
        assert_eq!(store.equipment_stock(item.id), Some(5));
        let stored = store.loan(loan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LoanStatus::Returned);

        // A second return does not add stock twice.
        store.return_loan(loan.id, at(17)).await.unwrap();
        assert_eq!(store.equipment_stock(item.id), Some(5));
    }

    #[tokio::test]
    async fn test_delete_loan_restores_only_active_stock() {
        let store = MemoryStore::new();
        let item = projector(4);
        store.add_equipment(item.clone());

        let active = store.create_loan(&new_loan(item.id, 3)).await.unwrap();
        store.delete_loan(active.id).await.unwrap();
        assert_eq!(store.equipment_stock(item.id), Some(4));
        assert!(store.loans("A").await.unwrap().is_empty());

        let returned = store.create_loan(&new_loan(item.id, 1)).await.unwrap();
        store.return_loan(returned.id, at(16)).await.unwrap();
        store.delete_loan(returned.id).await.unwrap();
        assert_eq!(store.equipment_stock(item.id), Some(4));

        assert!(matches!(
            store.delete_loan(returned.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_loan_beyond_stock_is_refused() {
        let store = MemoryStore::new();
        let item = projector(1);
        store.add_equipment(item.clone());

        assert!(matches!(
            store.create_loan(&new_loan(item.id, 2)).await,
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(store.equipment_stock(item.id), Some(1));
        assert!(store.loans("A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_password_changes_need_a_session() {
        let store = MemoryStore::new();
        let me = Uuid::new_v4();
        let colleague = Uuid::new_v4();
        store.add_admin(me, "Antiga@123");
        store.add_admin(colleague, "Outra@123");

        assert!(matches!(
            store.change_own_password("Antiga@123", "Nova@1234").await,
            Err(StoreError::Unauthorized)
        ));

        store.sign_in_admin(me);
        assert!(matches!(
            store.change_own_password("errada", "Nova@1234").await,
            Err(StoreError::Rejected(_))
        ));
        store.change_own_password("Antiga@123", "Nova@1234").await.unwrap();
        assert_eq!(store.admin_password(me).as_deref(), Some("Nova@1234"));

        store.reset_admin_password(colleague, "Reset@1234").await.unwrap();
        assert_eq!(store.admin_password(colleague).as_deref(), Some("Reset@1234"));
        assert!(matches!(
            store.reset_admin_password(Uuid::new_v4(), "Reset@1234").await,
            Err(StoreError::NotFound)
        ));
    }
}
