use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{BookingStore, StoreResult};
use crate::{
    config::BookingConfig,
    models::{
        AuditEntry, BookingStatus, Equipment, EquipmentBooking, EquipmentRow, EquipmentUsage,
        Interval, NewEquipmentBooking, NewRecurringBooking, NewRoomBooking, Room, RoomBooking,
        RoomBookingRow, RoomRow, Settings, SettingsRow, Teacher, TeacherRef, VerificationRow,
    },
};

#[derive(Debug, FromRow)]
struct VerificationRecord {
    id: Uuid,
    display_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    booking_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    status: String,
    term_document: Option<String>,
    full_name: Option<String>,
    totvs_number: Option<String>,
}

impl VerificationRecord {
    fn into_row(self) -> StoreResult<VerificationRow> {
        let term_document = self
            .term_document
            .map(|doc| serde_json::from_str(&doc))
            .transpose()?;
        let users = (self.full_name.is_some() || self.totvs_number.is_some()).then(|| TeacherRef {
            full_name: self.full_name,
            totvs_number: self.totvs_number,
        });
        Ok(VerificationRow {
            id: self.id,
            display_id: self.display_id,
            created_at: self.created_at,
            booking_date: self.booking_date,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            term_document,
            users,
        })
    }
}

/// Direct Postgres backend. The `no_overlapping_room_bookings` exclusion
/// constraint created by the migrations is what serializes concurrent bookings.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    booking: BookingConfig,
}

impl PgStore {
    pub async fn connect(database_url: &str, booking: BookingConfig) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool, booking })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl BookingStore for PgStore {
    async fn teacher(&self, user_id: Uuid) -> StoreResult<Option<Teacher>> {
        let teacher = sqlx::query_as::<_, Teacher>(
            r#"
            SELECT id, full_name, totvs_number, units,
                   recurring_booking_enabled, recurring_booking_units
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(teacher)
    }

    async fn settings(&self, unit: &str) -> StoreResult<Option<Settings>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT unit, room_booking_enabled, room_min_advance_time_enabled,
                   room_min_advance_time_hours, min_advance_time_enabled, min_advance_time_hours
            FROM settings
            WHERE unit = $1
            "#,
        )
        .bind(unit)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Settings::try_from).transpose()?)
    }

    async fn rooms(&self, units: &[String]) -> StoreResult<Vec<Room>> {
        let rows = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT id, name, unit, capacity, description, min_time, max_time,
                   available_days, is_active
            FROM rooms
            WHERE unit = ANY($1) AND is_active
            ORDER BY name ASC
            "#,
        )
        .bind(units)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Ok(Room::from_row(r, &self.booking)?))
            .collect()
    }

    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        let row = sqlx::query_as::<_, RoomRow>(
            r#"
            SELECT id, name, unit, capacity, description, min_time, max_time,
                   available_days, is_active
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Room::from_row(r, &self.booking)).transpose()?)
    }

    async fn room_occupancy(&self, room_id: Uuid, window: Interval) -> StoreResult<Vec<Interval>> {
        let rows = sqlx::query_as::<_, (DateTime<Utc>, DateTime<Utc>)>(
            r#"
            SELECT start_ts, end_ts
            FROM room_bookings
            WHERE room_id = $1
              AND status = 'confirmed'
              AND deleted_at IS NULL
              AND start_ts < $3
              AND end_ts > $2
            ORDER BY start_ts ASC
            "#,
        )
        .bind(room_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(start, end)| Interval::new(start, end))
            .collect())
    }

    async fn insert_room_booking(&self, booking: &NewRoomBooking) -> StoreResult<RoomBooking> {
        let row = sqlx::query_as::<_, RoomBookingRow>(
            r#"
            INSERT INTO room_bookings (room_id, user_id, start_ts, end_ts, status, recurring_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, room_id, user_id, start_ts, end_ts, status, deleted_at, recurring_id,
                      created_at
            "#,
        )
        .bind(booking.room_id)
        .bind(booking.user_id)
        .bind(booking.start_ts)
        .bind(booking.end_ts)
        .bind(booking.status.as_str())
        .bind(booking.recurring_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(RoomBooking::try_from(row)?)
    }

    async fn room_booking(&self, booking_id: Uuid) -> StoreResult<Option<RoomBooking>> {
        let row = sqlx::query_as::<_, RoomBookingRow>(
            r#"
            SELECT id, room_id, user_id, start_ts, end_ts, status, deleted_at, recurring_id,
                   created_at
            FROM room_bookings
            WHERE id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RoomBooking::try_from).transpose()?)
    }

    async fn user_room_bookings(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<RoomBooking>> {
        let rows = sqlx::query_as::<_, RoomBookingRow>(
            r#"
            SELECT id, room_id, user_id, start_ts, end_ts, status, deleted_at, recurring_id,
                   created_at
            FROM room_bookings
            WHERE user_id = $1 AND deleted_at IS NULL AND start_ts >= $2
            ORDER BY start_ts ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Ok(RoomBooking::try_from(r)?))
            .collect()
    }

    async fn set_room_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE room_bookings SET status = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(())
    }

    async fn soft_delete_room_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE room_bookings SET deleted_at = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(())
    }

    async fn insert_recurring(&self, series: &NewRecurringBooking) -> StoreResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO recurring_bookings
                (user_id, unit, room_id, day_of_week, start_time, end_time, is_active, last_generated_month)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(series.user_id)
        .bind(&series.unit)
        .bind(series.room_id)
        .bind(series.day_of_week)
        .bind(series.start_time)
        .bind(series.end_time)
        .bind(series.is_active)
        .bind(series.last_generated_month)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn deactivate_recurring(&self, series_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("UPDATE recurring_bookings SET is_active = FALSE WHERE id = $1")
            .bind(series_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(())
    }

    async fn equipment(&self, unit: &str) -> StoreResult<Vec<Equipment>> {
        let rows = sqlx::query_as::<_, EquipmentRow>(
            r#"
            SELECT id, unit, name, brand, model, total_quantity
            FROM equipment
            WHERE unit = $1
            ORDER BY name ASC
            "#,
        )
        .bind(unit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Ok(Equipment::try_from(r)?))
            .collect()
    }

    async fn equipment_usage(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> StoreResult<Vec<EquipmentUsage>> {
        let rows = sqlx::query_as::<_, EquipmentUsage>(
            r#"
            SELECT equipment_id, quantity
            FROM bookings
            WHERE unit = $1
              AND booking_date = $2
              AND status = 'active'
              AND start_time < $4
              AND end_time > $3
            "#,
        )
        .bind(unit)
        .bind(date)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn booking_by_token(&self, token: &str) -> StoreResult<Option<VerificationRow>> {
        let record = sqlx::query_as::<_, VerificationRecord>(
            r#"
            SELECT b.id, b.display_id, b.created_at, b.booking_date, b.start_time, b.end_time,
                   b.status, b.term_document::text AS term_document,
                   u.full_name, u.totvs_number
            FROM bookings b
            LEFT JOIN users u ON u.id = b.user_id
            WHERE b.verification_token = $1
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        record.map(VerificationRecord::into_row).transpose()
    }

    async fn insert_equipment_bookings(
        &self,
        rows: &[NewEquipmentBooking],
    ) -> StoreResult<Vec<EquipmentBooking>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO bookings (user_id, unit, local, booking_date, start_time, end_time,
                                      equipment_id, quantity, observations, status, term_signed,
                                      term_document, display_id, verification_token)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12::jsonb, $13, $14)
                RETURNING id
                "#,
            )
            .bind(row.user_id)
            .bind(&row.unit)
            .bind(&row.local)
            .bind(row.booking_date)
            .bind(row.start_time)
            .bind(row.end_time)
            .bind(row.equipment_id)
            .bind(row.quantity)
            .bind(&row.observations)
            .bind(row.status.as_str())
            .bind(row.term_signed)
            .bind(row.term_document.to_string())
            .bind(&row.display_id)
            .bind(&row.verification_token)
            .fetch_one(&mut *tx)
            .await?;
            stored.push(row.clone().into_booking(id));
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (booking_id, action, performed_by, details)
            VALUES ($1, $2, $3, $4::jsonb)
            "#,
        )
        .bind(entry.booking_id)
        .bind(&entry.action)
        .bind(&entry.performed_by)
        .bind(entry.details.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
