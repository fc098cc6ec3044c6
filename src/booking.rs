//! Room booking flow: fresh occupancy, local check, submit, surface the outcome.

use std::collections::BTreeMap;

use chrono::{Datelike, FixedOffset, Months, NaiveDate, NaiveTime, Weekday};
use uuid::Uuid;

use crate::{
    availability::{self, BookingRequest},
    error::BookingError,
    models::{
        BookingStatus, Interval, NewRecurringBooking, NewRoomBooking, Room, RoomBooking, Teacher,
    },
    schedule::weekday_number,
    store::BookingStore,
    traits::{Clock, FeedbackKind, Notifier},
};

/// What a teacher's cancellation did to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Upcoming booking released its slot.
    Cancelled,
    /// Finished booking hidden from the teacher's list.
    Hidden,
}

/// Result of creating a weekly series: the series id and one outcome per date.
#[derive(Debug)]
pub struct RecurringOutcome {
    pub series_id: Uuid,
    pub occurrences: Vec<(NaiveDate, Result<RoomBooking, BookingError>)>,
}

impl RecurringOutcome {
    pub fn booked(&self) -> usize {
        self.occurrences.iter().filter(|(_, r)| r.is_ok()).count()
    }
}

pub struct RoomBookingService<S, C, N> {
    store: S,
    clock: C,
    notifier: N,
    offset: FixedOffset,
}

impl<S: BookingStore, C: Clock, N: Notifier> RoomBookingService<S, C, N> {
    pub fn new(store: S, clock: C, notifier: N, offset: FixedOffset) -> Self {
        Self {
            store,
            clock,
            notifier,
            offset,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Today's date at the configured offset.
    pub fn today(&self) -> NaiveDate {
        self.clock.now_at(self.offset).date_naive()
    }

    fn feedback(&self, kind: FeedbackKind, message: &str) {
        if let Err(e) = self.notifier.notify(kind, message) {
            tracing::warn!(error = %e, "Failed to deliver feedback");
        }
    }

    fn report<T>(&self, result: Result<T, BookingError>, success: &str) -> Result<T, BookingError> {
        match &result {
            Ok(_) => self.feedback(FeedbackKind::Success, success),
            Err(e) => self.feedback(FeedbackKind::Error, &e.user_message()),
        }
        result
    }

    /// Active rooms the teacher may book, grouped by unit. Units with room
    /// booking disabled (or no settings) are left out.
    pub async fn bookable_rooms(
        &self,
        teacher: &Teacher,
    ) -> Result<BTreeMap<String, Vec<Room>>, BookingError> {
        let mut enabled = Vec::new();
        for unit in &teacher.units {
            let settings = self.store.settings(unit).await?;
            if settings.is_some_and(|s| s.room_booking_enabled) {
                enabled.push(unit.clone());
            }
        }

        let mut grouped: BTreeMap<String, Vec<Room>> = BTreeMap::new();
        for room in self.store.rooms(&enabled).await? {
            grouped.entry(room.unit.clone()).or_default().push(room);
        }
        tracing::debug!(teacher = %teacher.id, units = enabled.len(), "Loaded bookable rooms");
        Ok(grouped)
    }

    /// Confirmed bookings of a room overlapping the local day `date`.
    pub async fn occupancy(
        &self,
        room_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Interval>, BookingError> {
        let window = availability::day_bounds(date, self.offset);
        Ok(self.store.room_occupancy(room_id, window).await?)
    }

    /// Run the availability check against fresh data. Returns the room when
    /// the request may be submitted.
    pub async fn evaluate(
        &self,
        room_id: Uuid,
        request: &BookingRequest,
    ) -> Result<Room, BookingError> {
        let room = self
            .store
            .room(room_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or(BookingError::RoomNotFound)?;

        let settings = self.store.settings(&room.unit).await?;
        if !settings.as_ref().is_some_and(|s| s.room_booking_enabled) {
            return Err(BookingError::BookingDisabled {
                unit: room.unit.clone(),
            });
        }

        let occupied = self.occupancy(room_id, request.date).await?;
        availability::check_availability_with_clock(
            &room.schedule,
            &occupied,
            request,
            settings.as_ref(),
            self.offset,
            &self.clock,
        )?;
        Ok(room)
    }

    /// Check and submit a booking. A conflict reported by the store means
    /// another booking won the slot after the check; nothing is retried.
    pub async fn book(
        &self,
        teacher: &Teacher,
        room_id: Uuid,
        request: &BookingRequest,
    ) -> Result<RoomBooking, BookingError> {
        let result = self.submit(teacher, room_id, request, None).await;
        if let Err(e) = &result {
            tracing::info!(room = %room_id, date = %request.date, code = e.code(), "Room booking refused");
        }
        self.report(result, "Agendamento realizado com sucesso!")
    }

    async fn submit(
        &self,
        teacher: &Teacher,
        room_id: Uuid,
        request: &BookingRequest,
        recurring_id: Option<Uuid>,
    ) -> Result<RoomBooking, BookingError> {
        self.evaluate(room_id, request).await?;

        let interval = request.interval(self.offset);
        let booking = NewRoomBooking {
            room_id,
            user_id: teacher.id,
            start_ts: interval.start,
            end_ts: interval.end,
            status: BookingStatus::Confirmed,
            recurring_id,
        };
        let stored = self.store.insert_room_booking(&booking).await?;
        tracing::info!(booking = %stored.id, room = %room_id, start = %stored.interval.start, "Room booked");
        Ok(stored)
    }

    /// Upcoming bookings of the teacher from the start of today, soonest first.
    pub async fn my_bookings(&self, teacher: &Teacher) -> Result<Vec<RoomBooking>, BookingError> {
        let today = availability::day_bounds(self.today(), self.offset);
        Ok(self.store.user_room_bookings(teacher.id, today.start).await?)
    }

    /// Cancel one of the teacher's own bookings.
    pub async fn cancel(
        &self,
        teacher: &Teacher,
        booking_id: Uuid,
    ) -> Result<CancelOutcome, BookingError> {
        let result = self.cancel_inner(teacher, booking_id).await;
        self.report(result, "Agendamento cancelado com sucesso.")
    }

    async fn cancel_inner(
        &self,
        teacher: &Teacher,
        booking_id: Uuid,
    ) -> Result<CancelOutcome, BookingError> {
        let booking = self
            .store
            .room_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;
        if booking.user_id != teacher.id {
            return Err(BookingError::NotOwner);
        }

        let now = self.clock.now_utc();
        if booking.is_past(now) {
            self.store.soft_delete_room_booking(booking_id, now).await?;
            tracing::info!(booking = %booking_id, "Past room booking hidden");
            Ok(CancelOutcome::Hidden)
        } else {
            self.store
                .set_room_booking_status(booking_id, BookingStatus::CancelledByTeacher)
                .await?;
            tracing::info!(booking = %booking_id, "Room booking cancelled by teacher");
            Ok(CancelOutcome::Cancelled)
        }
    }

    /// Cancel any booking on behalf of an administrator.
    pub async fn admin_cancel(&self, booking_id: Uuid) -> Result<(), BookingError> {
        let result = self.admin_cancel_inner(booking_id).await;
        self.report(result, "Agendamento cancelado com sucesso.")
    }

    async fn admin_cancel_inner(&self, booking_id: Uuid) -> Result<(), BookingError> {
        self.store
            .room_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;
        self.store
            .set_room_booking_status(booking_id, BookingStatus::CancelledByAdmin)
            .await?;
        tracing::info!(booking = %booking_id, "Room booking cancelled by admin");
        Ok(())
    }

    /// Record a weekly series and book each matching date from today to the
    /// end of the current month. Every date is checked on its own, so one
    /// occupied week does not block the rest. A series that booked nothing
    /// is left inactive.
    pub async fn book_recurring(
        &self,
        teacher: &Teacher,
        room_id: Uuid,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<RecurringOutcome, BookingError> {
        let result = self
            .book_recurring_inner(teacher, room_id, weekday, start, end)
            .await;
        match &result {
            Ok(outcome) => self.feedback(
                FeedbackKind::Success,
                &format!(
                    "Agendamento recorrente criado: {} de {} datas reservadas.",
                    outcome.booked(),
                    outcome.occurrences.len()
                ),
            ),
            Err(e) => self.feedback(FeedbackKind::Error, &e.user_message()),
        }
        result
    }

    async fn book_recurring_inner(
        &self,
        teacher: &Teacher,
        room_id: Uuid,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<RecurringOutcome, BookingError> {
        let room = self
            .store
            .room(room_id)
            .await?
            .filter(|r| r.is_active)
            .ok_or(BookingError::RoomNotFound)?;
        if !teacher.can_book_recurring(&room.unit) {
            return Err(BookingError::RecurringNotAllowed { unit: room.unit });
        }
        if start >= end {
            return Err(availability::Rejection::EndBeforeStart.into());
        }

        let today = self.today();
        let month_start = today.with_day(1).unwrap_or(today);
        let series_id = self
            .store
            .insert_recurring(&NewRecurringBooking {
                user_id: teacher.id,
                unit: room.unit.clone(),
                room_id,
                day_of_week: weekday_number(weekday),
                start_time: start,
                end_time: end,
                is_active: true,
                last_generated_month: month_start,
            })
            .await?;

        let mut occurrences = Vec::new();
        for date in remaining_dates_in_month(today, weekday) {
            let request = BookingRequest::new(date, start, end);
            let outcome = self.submit(teacher, room_id, &request, Some(series_id)).await;
            if let Err(e) = &outcome {
                tracing::debug!(%date, code = e.code(), "Recurring occurrence skipped");
            }
            occurrences.push((date, outcome));
        }

        let outcome = RecurringOutcome {
            series_id,
            occurrences,
        };
        if outcome.booked() == 0 {
            self.store.deactivate_recurring(series_id).await?;
            tracing::warn!(series = %series_id, dates = outcome.occurrences.len(), "Recurring series booked nothing, deactivated");
        } else {
            tracing::info!(series = %series_id, booked = outcome.booked(), dates = outcome.occurrences.len(), "Recurring series created");
        }
        Ok(outcome)
    }
}

/// Dates from `from` (inclusive) to the end of its month falling on `weekday`.
pub fn remaining_dates_in_month(from: NaiveDate, weekday: Weekday) -> Vec<NaiveDate> {
    let next_month = from
        .with_day(1)
        .and_then(|d| d.checked_add_months(Months::new(1)));
    from.iter_days()
        .take_while(|d| next_month.is_none_or(|n| *d < n))
        .filter(|d| d.weekday() == weekday)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        availability::Rejection,
        models::{AdvanceNotice, Settings},
        schedule::RoomSchedule,
        store::MemoryStore,
        traits::{MockClock, MockNotifier},
    };

    const UNIT: &str = "Objetivo Embaré";

    fn offset() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn local(date: NaiveDate, h: u32) -> DateTime<Utc> {
        offset()
            .from_local_datetime(&date.and_time(time(h, 0)))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn teacher() -> Teacher {
        Teacher {
            id: Uuid::new_v4(),
            full_name: "Rosane".to_string(),
            registration: "1234".to_string(),
            units: vec![UNIT.to_string()],
            recurring_booking_enabled: false,
            recurring_booking_units: Vec::new(),
        }
    }

    fn room(name: &str) -> Room {
        Room {
            id: Uuid::new_v4(),
            name: name.to_string(),
            unit: UNIT.to_string(),
            capacity: Some(30),
            description: None,
            schedule: RoomSchedule::default(),
            is_active: true,
        }
    }

    fn enabled(advance: AdvanceNotice) -> Settings {
        Settings {
            unit: UNIT.to_string(),
            room_booking_enabled: true,
            room_advance: advance,
            equipment_advance: AdvanceNotice::Disabled,
        }
    }

    struct Fixture {
        store: MemoryStore,
        clock: MockClock,
        notifier: MockNotifier,
        service: RoomBookingService<MemoryStore, MockClock, MockNotifier>,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let store = MemoryStore::new();
        store.set_settings(enabled(AdvanceNotice::Disabled));
        let clock = MockClock::new(now);
        let notifier = MockNotifier::new();
        let service =
            RoomBookingService::new(store.clone(), clock.clone(), notifier.clone(), offset());
        Fixture {
            store,
            clock,
            notifier,
            service,
        }
    }

    fn request(start: u32, end: u32) -> BookingRequest {
        BookingRequest::new(monday(), time(start, 0), time(end, 0))
    }

    #[tokio::test]
    async fn test_book_then_same_slot_is_occupied() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let t = teacher();

        let booked = f.service.book(&t, lab.id, &request(9, 10)).await.unwrap();
        assert_eq!(booked.status, BookingStatus::Confirmed);
        assert_eq!(
            f.notifier.last().map(|(k, _)| k),
            Some(FeedbackKind::Success)
        );

        let again = f.service.evaluate(lab.id, &request(9, 10)).await;
        assert!(matches!(
            again,
            Err(BookingError::Rejected(Rejection::SlotOccupied))
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_reported_inline() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());

        let result = f.service.book(&teacher(), lab.id, &request(10, 9)).await;
        assert!(matches!(
            result,
            Err(BookingError::Rejected(Rejection::EndBeforeStart))
        ));
        assert_eq!(
            f.notifier.last(),
            Some((
                FeedbackKind::Error,
                Rejection::EndBeforeStart.to_string()
            ))
        );
        assert!(f.store.room_bookings().is_empty());
    }

    #[tokio::test]
    async fn test_store_conflict_surfaces_distinct_message() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        f.store.fail_next_insert(crate::error::StoreError::Conflict {
            message: "exclusion".to_string(),
        });

        let result = f.service.book(&teacher(), lab.id, &request(9, 10)).await;
        assert!(matches!(result, Err(BookingError::Conflict)));
        assert_eq!(
            f.notifier.last().map(|(_, m)| m),
            Some(crate::error::CONFLICT_MESSAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_disabled_unit_cannot_book() {
        let f = fixture(local(monday(), 7));
        f.store.set_settings(Settings::disabled(UNIT));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());

        let result = f.service.book(&teacher(), lab.id, &request(9, 10)).await;
        assert!(matches!(result, Err(BookingError::BookingDisabled { .. })));
    }

    #[tokio::test]
    async fn test_lead_time_policy_applies() {
        let f = fixture(local(monday(), 10));
        f.store.set_settings(enabled(AdvanceNotice::MinHours(2)));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());

        let early = f.service.evaluate(lab.id, &request(11, 12)).await;
        assert!(matches!(
            early,
            Err(BookingError::Rejected(Rejection::InsufficientLeadTime { hours: 2 }))
        ));
        assert!(f.service.evaluate(lab.id, &request(12, 13)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_room() {
        let f = fixture(local(monday(), 7));
        let mut closed = room("Closed");
        closed.is_active = false;
        f.store.add_room(closed.clone());

        assert!(matches!(
            f.service.evaluate(closed.id, &request(9, 10)).await,
            Err(BookingError::RoomNotFound)
        ));
        assert!(matches!(
            f.service.evaluate(Uuid::new_v4(), &request(9, 10)).await,
            Err(BookingError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn test_bookable_rooms_grouped_and_filtered() {
        let f = fixture(local(monday(), 7));
        f.store.add_room(room("Lab 2"));
        f.store.add_room(room("Auditório"));
        let mut other = room("Elsewhere");
        other.unit = "Outra Unidade".to_string();
        f.store.add_room(other);

        let mut t = teacher();
        t.units.push("Outra Unidade".to_string());
        let grouped = f.service.bookable_rooms(&t).await.unwrap();

        assert_eq!(grouped.len(), 1);
        let names: Vec<&str> = grouped[UNIT].iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Auditório", "Lab 2"]);
    }

    #[tokio::test]
    async fn test_cancel_future_and_past() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let t = teacher();

        let morning = f.service.book(&t, lab.id, &request(8, 9)).await.unwrap();
        let later = f.service.book(&t, lab.id, &request(14, 15)).await.unwrap();

        f.clock.set_time(local(monday(), 12));

        assert_eq!(
            f.service.cancel(&t, morning.id).await.unwrap(),
            CancelOutcome::Hidden
        );
        assert_eq!(
            f.service.cancel(&t, later.id).await.unwrap(),
            CancelOutcome::Cancelled
        );

        let stored = f.store.room_bookings();
        let morning = stored.iter().find(|b| b.id == morning.id).unwrap();
        assert_eq!(morning.status, BookingStatus::Confirmed);
        assert!(morning.deleted_at.is_some());
        let later = stored.iter().find(|b| b.id == later.id).unwrap();
        assert_eq!(later.status, BookingStatus::CancelledByTeacher);

        // The released slot can be booked again.
        assert!(f.service.evaluate(lab.id, &request(14, 15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_requires_ownership() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let booked = f.service.book(&teacher(), lab.id, &request(9, 10)).await.unwrap();

        let result = f.service.cancel(&teacher(), booked.id).await;
        assert!(matches!(result, Err(BookingError::NotOwner)));
    }

    #[tokio::test]
    async fn test_admin_cancel() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let booked = f.service.book(&teacher(), lab.id, &request(9, 10)).await.unwrap();

        f.service.admin_cancel(booked.id).await.unwrap();
        assert_eq!(
            f.store.room_bookings()[0].status,
            BookingStatus::CancelledByAdmin
        );
        assert!(matches!(
            f.service.admin_cancel(Uuid::new_v4()).await,
            Err(BookingError::BookingNotFound)
        ));
    }

    #[tokio::test]
    async fn test_my_bookings_from_today() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let t = teacher();
        f.service.book(&t, lab.id, &request(14, 15)).await.unwrap();
        f.service.book(&t, lab.id, &request(9, 10)).await.unwrap();

        let mine = f.service.my_bookings(&t).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine[0].interval.start < mine[1].interval.start);

        f.clock.set_time(local(monday().succ_opt().unwrap(), 7));
        assert!(f.service.my_bookings(&t).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_requires_authorisation() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());

        let result = f
            .service
            .book_recurring(&teacher(), lab.id, Weekday::Wed, time(9, 0), time(10, 0))
            .await;
        assert!(matches!(
            result,
            Err(BookingError::RecurringNotAllowed { .. })
        ));
        assert!(f.store.recurring_series().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_books_rest_of_month() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let mut t = teacher();
        t.recurring_booking_units = vec![UNIT.to_string()];

        // Block one Wednesday so that occurrence fails on its own.
        let other = teacher();
        let blocked = BookingRequest::new(
            NaiveDate::from_ymd_opt(2024, 6, 19).unwrap(),
            time(9, 0),
            time(10, 0),
        );
        f.service.book(&other, lab.id, &blocked).await.unwrap();

        let outcome = f
            .service
            .book_recurring(&t, lab.id, Weekday::Wed, time(9, 0), time(10, 0))
            .await
            .unwrap();

        // June 2024 Wednesdays from the 10th: 12, 19, 26.
        let dates: Vec<u32> = outcome.occurrences.iter().map(|(d, _)| d.day()).collect();
        assert_eq!(dates, vec![12, 19, 26]);
        assert_eq!(outcome.booked(), 2);

        let series = f.store.recurring_series();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].day_of_week, 3);
        assert_eq!(
            series[0].last_generated_month,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );
        assert!(
            f.store
                .room_bookings()
                .iter()
                .filter(|b| b.recurring_id == Some(outcome.series_id))
                .count()
                == 2
        );
    }

    #[tokio::test]
    async fn test_recurring_with_no_free_date_is_deactivated() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let mut t = teacher();
        t.recurring_booking_units = vec![UNIT.to_string()];

        // 23:00 is past closing time on every date.
        let outcome = f
            .service
            .book_recurring(&t, lab.id, Weekday::Wed, time(22, 0), time(23, 0))
            .await
            .unwrap();

        assert_eq!(outcome.occurrences.len(), 3);
        assert_eq!(outcome.booked(), 0);
        let series = f.store.recurring_series();
        assert_eq!(series.len(), 1);
        assert!(!series[0].is_active);
        assert!(f.store.room_bookings().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_with_one_booking_stays_active() {
        let f = fixture(local(monday(), 7));
        let lab = room("Lab 1");
        f.store.add_room(lab.clone());
        let mut t = teacher();
        t.recurring_booking_units = vec![UNIT.to_string()];

        // Only the last Friday of June 2024 is free.
        let other = teacher();
        for day in [14, 21] {
            let taken = BookingRequest::new(
                NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
                time(9, 0),
                time(10, 0),
            );
            f.service.book(&other, lab.id, &taken).await.unwrap();
        }

        let outcome = f
            .service
            .book_recurring(&t, lab.id, Weekday::Fri, time(9, 0), time(10, 0))
            .await
            .unwrap();
        assert_eq!(outcome.booked(), 1);
        assert!(f.store.recurring_series()[0].is_active);
    }

    #[test]
    fn test_remaining_dates_in_month() {
        let from = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        let dates = remaining_dates_in_month(from, Weekday::Thu);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 2, 22).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            ]
        );

        let dec = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(remaining_dates_in_month(dec, Weekday::Tue), vec![dec]);
    }
}
