use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use uuid::Uuid;

use super::{AdminStore, BookingStore, StoreResult};
use crate::{
    config::{BookingConfig, NetworkConfig, StoreConfig},
    error::{EXCLUSION_VIOLATION, StoreError},
    models::{
        AuditEntry, BookingStatus, Classroom, Equipment, EquipmentBooking, EquipmentLoan,
        EquipmentRow, EquipmentUsage, Interval, LoanStatus, NewEquipmentBooking, NewLoan,
        NewRecurringBooking, NewRoomBooking, Room, RoomBooking, RoomBookingRow, RoomDraft, RoomRow,
        Settings, SettingsRow, Teacher, VerificationRow,
    },
    timetable::ClassSchedule,
};

const VERIFICATION_SELECT: &str = "id,display_id,created_at,booking_date,start_time,end_time,term_document,status,users(full_name,totvs_number)";

/// Error body returned by the REST layer.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Result envelope of the privileged procedures.
#[derive(Debug, Deserialize)]
struct RpcOutcome {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntervalRow {
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ClassScheduleUpsert<'a> {
    #[serde(flatten)]
    schedule: &'a ClassSchedule,
    updated_at: DateTime<Utc>,
}

/// Client for the hosted database's REST and RPC endpoints.
#[derive(Clone, Debug)]
pub struct RestStore {
    client: reqwest::Client,
    base: Url,
    anon_key: String,
    admin_token: Option<String>,
    booking: BookingConfig,
}

impl RestStore {
    /// Create a new client with configurable timeouts.
    pub fn new(store: &StoreConfig, network: &NetworkConfig, booking: BookingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let base = Url::parse(&store.url)
            .with_context(|| format!("Invalid store url: {:?}", store.url))?;

        Ok(Self {
            client,
            base,
            anon_key: store.anon_key.clone(),
            admin_token: store.admin_token.clone(),
            booking,
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        {
            let base_path = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base_path}/rest/v1/{path}"));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url
    }

    fn request(&self, method: Method, path: &str, query: &[(&str, String)]) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, self.endpoint(path, query))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key);
        if let Some(token) = &self.admin_token {
            req = req.header("x-admin-token", token);
        }
        req
    }

    fn admin_token(&self) -> StoreResult<&str> {
        self.admin_token.as_deref().ok_or(StoreError::Unauthorized)
    }

    async fn send(&self, req: RequestBuilder) -> StoreResult<Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
        tracing::debug!(%status, code = ?body.code, details = ?body.details, "Store request failed");

        if body.code.as_deref() == Some(EXCLUSION_VIOLATION) {
            return Err(StoreError::Conflict {
                message: body.message.unwrap_or(text),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StoreError::Unauthorized);
        }
        Err(StoreError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message.unwrap_or(text),
        })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let response = self.send(self.request(Method::GET, table, query)).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> StoreResult<Option<T>> {
        let mut query = query.to_vec();
        query.push(("limit", "1".to_string()));
        let rows: Vec<T> = self.select(table, &query).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one object or an array of them and return the stored rows.
    async fn insert_rows<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> StoreResult<Vec<T>> {
        let response = self
            .send(
                self.request(Method::POST, table, &[])
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> StoreResult<T> {
        let rows: Vec<T> = self.insert_rows(table, body).await?;
        rows.into_iter().next().ok_or(StoreError::NotFound)
    }

    async fn delete(&self, table: &str, query: &[(&str, String)]) -> StoreResult<()> {
        self.send(self.request(Method::DELETE, table, query)).await?;
        Ok(())
    }

    async fn update<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> StoreResult<()> {
        self.send(self.request(Method::PATCH, table, query).json(body))
            .await?;
        Ok(())
    }

    async fn upsert<B: Serialize + ?Sized>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> StoreResult<()> {
        self.send(
            self.request(Method::POST, table, &[("on_conflict", on_conflict.to_string())])
                .header("Prefer", "resolution=merge-duplicates")
                .json(body),
        )
        .await?;
        Ok(())
    }

    async fn equipment_item(&self, equipment_id: Uuid) -> StoreResult<Equipment> {
        let row: EquipmentRow = self
            .select_one(
                "equipment",
                &[("select", "*".to_string()), ("id", eq(equipment_id))],
            )
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Equipment::try_from(row)?)
    }

    async fn set_stock(&self, equipment_id: Uuid, total: u32) -> StoreResult<()> {
        self.update(
            "equipment",
            &[("id", eq(equipment_id))],
            &json!({ "total_quantity": total }),
        )
        .await
    }

    /// Call a privileged procedure and unwrap its `{success, message}` envelope.
    ///
    /// A void procedure answers with an empty body or `null`. Anything else
    /// must be an envelope carrying `success: true`; a body that is not an
    /// envelope is a decode error.
    async fn rpc(&self, name: &str, args: serde_json::Value) -> StoreResult<()> {
        tracing::debug!(rpc = name, "Calling store procedure");
        let response = self
            .send(self.request(Method::POST, &format!("rpc/{name}"), &[]).json(&args))
            .await?;
        let text = response.text().await?;
        if text.trim().is_empty() || text.trim() == "null" {
            return Ok(());
        }
        let outcome: RpcOutcome = serde_json::from_str(&text)?;
        match outcome.success {
            Some(true) => Ok(()),
            Some(false) | None => {
                tracing::warn!(rpc = name, message = ?outcome.message, "Store procedure refused");
                Err(StoreError::Rejected(
                    outcome
                        .message
                        .unwrap_or_else(|| "Operação recusada.".to_string()),
                ))
            }
        }
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

impl BookingStore for RestStore {
    async fn teacher(&self, user_id: Uuid) -> StoreResult<Option<Teacher>> {
        self.select_one(
            "users",
            &[
                (
                    "select",
                    "id,full_name,totvs_number,units,recurring_booking_enabled,recurring_booking_units"
                        .to_string(),
                ),
                ("id", eq(user_id)),
            ],
        )
        .await
    }

    async fn settings(&self, unit: &str) -> StoreResult<Option<Settings>> {
        let row: Option<SettingsRow> = self
            .select_one("settings", &[("select", "*".to_string()), ("unit", eq(unit))])
            .await?;
        Ok(row.map(Settings::try_from).transpose()?)
    }

    async fn rooms(&self, units: &[String]) -> StoreResult<Vec<Room>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<RoomRow> = self
            .select(
                "rooms",
                &[
                    ("select", "*".to_string()),
                    ("unit", in_list(units)),
                    ("is_active", "eq.true".to_string()),
                    ("order", "name.asc".to_string()),
                ],
            )
            .await?;
        rows.into_iter()
            .map(|r| Room::from_row(r, &self.booking).map_err(StoreError::from))
            .collect()
    }

    async fn room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        let row: Option<RoomRow> = self
            .select_one("rooms", &[("select", "*".to_string()), ("id", eq(room_id))])
            .await?;
        Ok(row.map(|r| Room::from_row(r, &self.booking)).transpose()?)
    }

    async fn room_occupancy(&self, room_id: Uuid, window: Interval) -> StoreResult<Vec<Interval>> {
        let rows: Vec<IntervalRow> = self
            .select(
                "room_bookings",
                &[
                    ("select", "start_ts,end_ts".to_string()),
                    ("room_id", eq(room_id)),
                    ("status", eq(BookingStatus::Confirmed)),
                    ("deleted_at", "is.null".to_string()),
                    ("start_ts", format!("lt.{}", timestamp(window.end))),
                    ("end_ts", format!("gt.{}", timestamp(window.start))),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Interval::new(r.start_ts, r.end_ts))
            .collect())
    }

    async fn insert_room_booking(&self, booking: &NewRoomBooking) -> StoreResult<RoomBooking> {
        let row: RoomBookingRow = self.insert("room_bookings", booking).await?;
        Ok(RoomBooking::try_from(row)?)
    }

    async fn room_booking(&self, booking_id: Uuid) -> StoreResult<Option<RoomBooking>> {
        let row: Option<RoomBookingRow> = self
            .select_one(
                "room_bookings",
                &[("select", "*".to_string()), ("id", eq(booking_id))],
            )
            .await?;
        Ok(row.map(RoomBooking::try_from).transpose()?)
    }

    async fn user_room_bookings(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<RoomBooking>> {
        let rows: Vec<RoomBookingRow> = self
            .select(
                "room_bookings",
                &[
                    ("select", "*".to_string()),
                    ("user_id", eq(user_id)),
                    ("deleted_at", "is.null".to_string()),
                    ("start_ts", format!("gte.{}", timestamp(from))),
                    ("order", "start_ts.asc".to_string()),
                ],
            )
            .await?;
        rows.into_iter()
            .map(|r| RoomBooking::try_from(r).map_err(StoreError::from))
            .collect()
    }

    async fn set_room_booking_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> StoreResult<()> {
        self.update(
            "room_bookings",
            &[("id", eq(booking_id))],
            &json!({ "status": status }),
        )
        .await
    }

    async fn soft_delete_room_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.update(
            "room_bookings",
            &[("id", eq(booking_id))],
            &json!({ "deleted_at": at }),
        )
        .await
    }

    async fn insert_recurring(&self, series: &NewRecurringBooking) -> StoreResult<Uuid> {
        let row: IdRow = self.insert("recurring_bookings", series).await?;
        Ok(row.id)
    }

    async fn deactivate_recurring(&self, series_id: Uuid) -> StoreResult<()> {
        self.update(
            "recurring_bookings",
            &[("id", eq(series_id))],
            &json!({ "is_active": false }),
        )
        .await
    }

    async fn equipment(&self, unit: &str) -> StoreResult<Vec<Equipment>> {
        let rows: Vec<EquipmentRow> = self
            .select(
                "equipment",
                &[("select", "*".to_string()), ("unit", eq(unit))],
            )
            .await?;
        rows.into_iter()
            .map(|r| Equipment::try_from(r).map_err(StoreError::from))
            .collect()
    }

    async fn equipment_usage(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> StoreResult<Vec<EquipmentUsage>> {
        self.select(
            "bookings",
            &[
                ("select", "equipment_id,quantity".to_string()),
                ("unit", eq(unit)),
                ("booking_date", eq(date.format("%Y-%m-%d"))),
                ("status", "eq.active".to_string()),
                ("start_time", format!("lt.{}", end.format("%H:%M:%S"))),
                ("end_time", format!("gt.{}", start.format("%H:%M:%S"))),
            ],
        )
        .await
    }

    async fn insert_equipment_bookings(
        &self,
        rows: &[NewEquipmentBooking],
    ) -> StoreResult<Vec<EquipmentBooking>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.insert_rows("bookings", rows).await
    }

    async fn booking_by_token(&self, token: &str) -> StoreResult<Option<VerificationRow>> {
        let joined = self
            .select_one::<VerificationRow>(
                "bookings",
                &[
                    ("select", VERIFICATION_SELECT.to_string()),
                    ("verification_token", eq(token)),
                ],
            )
            .await;
        match joined {
            Ok(Some(row)) => Ok(Some(row)),
            other => {
                // The users join can be hidden by row-level policies; retry without it.
                if let Err(e) = &other {
                    tracing::warn!(error = %e, "Joined verification lookup failed, retrying plain select");
                }
                self.select_one(
                    "bookings",
                    &[
                        ("select", "*".to_string()),
                        ("verification_token", eq(token)),
                    ],
                )
                .await
            }
        }
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.send(self.request(Method::POST, "audit_logs", &[]).json(entry))
            .await?;
        Ok(())
    }
}

impl AdminStore for RestStore {
    async fn create_room(&self, draft: &RoomDraft) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "create_room_secure",
            json!({
                "p_name": draft.name,
                "p_unit": draft.unit,
                "p_capacity": draft.capacity,
                "p_description": draft.description,
                "p_min_time": draft.min_time,
                "p_max_time": draft.max_time,
                "p_available_days": draft.available_days,
                "p_session_token": token,
            }),
        )
        .await
    }

    async fn update_room(&self, room_id: Uuid, draft: &RoomDraft) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "update_room_secure",
            json!({
                "p_room_id": room_id,
                "p_name": draft.name,
                "p_unit": draft.unit,
                "p_capacity": draft.capacity,
                "p_description": draft.description,
                "p_min_time": draft.min_time,
                "p_max_time": draft.max_time,
                "p_available_days": draft.available_days,
                "p_session_token": token,
            }),
        )
        .await
    }

    async fn delete_room(&self, room_id: Uuid) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "delete_room_secure",
            json!({ "p_room_id": room_id, "p_session_token": token }),
        )
        .await
    }

    async fn set_room_active(&self, room_id: Uuid, active: bool) -> StoreResult<()> {
        self.admin_token()?;
        self.update("rooms", &[("id", eq(room_id))], &json!({ "is_active": active }))
            .await
    }

    async fn classrooms(&self, unit: &str) -> StoreResult<Vec<Classroom>> {
        self.select(
            "classrooms",
            &[
                ("select", "*".to_string()),
                ("unit", eq(unit)),
                ("is_active", "eq.true".to_string()),
                ("order", "position.asc".to_string()),
            ],
        )
        .await
    }

    async fn create_classroom(&self, unit: &str, name: &str) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "create_classroom_secure",
            json!({ "p_name": name.trim(), "p_unit": unit, "p_admin_token": token }),
        )
        .await
    }

    async fn update_classroom(&self, classroom_id: Uuid, name: &str) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "update_classroom_secure",
            json!({
                "p_classroom_id": classroom_id,
                "p_name": name.trim(),
                "p_admin_token": token,
            }),
        )
        .await
    }

    async fn delete_classroom(&self, classroom_id: Uuid) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "delete_classroom_secure",
            json!({ "p_classroom_id": classroom_id, "p_admin_token": token }),
        )
        .await
    }

    async fn reorder_classrooms(&self, ordered: &[Uuid]) -> StoreResult<()> {
        self.admin_token()?;
        for (position, id) in ordered.iter().enumerate() {
            self.update(
                "classrooms",
                &[("id", eq(id))],
                &json!({ "position": position }),
            )
            .await?;
        }
        Ok(())
    }

    async fn upsert_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.admin_token()?;
        self.upsert("settings", "unit", &settings.to_row()).await
    }

    async fn class_schedule(
        &self,
        unit: &str,
        day_of_week: &str,
        segment: &str,
    ) -> StoreResult<Option<ClassSchedule>> {
        self.select_one(
            "class_schedules",
            &[
                ("select", "unit,day_of_week,segment,schedule_data".to_string()),
                ("unit", eq(unit)),
                ("day_of_week", eq(day_of_week)),
                ("segment", eq(segment)),
            ],
        )
        .await
    }

    async fn upsert_class_schedule(&self, schedule: &ClassSchedule) -> StoreResult<()> {
        self.admin_token()?;
        self.upsert(
            "class_schedules",
            "unit,day_of_week,segment",
            &ClassScheduleUpsert {
                schedule,
                updated_at: Utc::now(),
            },
        )
        .await
    }

    async fn loans(&self, unit: &str) -> StoreResult<Vec<EquipmentLoan>> {
        self.admin_token()?;
        self.select(
            "equipment_loans",
            &[
                ("select", "*".to_string()),
                ("unit", eq(unit)),
                ("order", "start_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn loan(&self, loan_id: Uuid) -> StoreResult<Option<EquipmentLoan>> {
        self.admin_token()?;
        self.select_one(
            "equipment_loans",
            &[("select", "*".to_string()), ("id", eq(loan_id))],
        )
        .await
    }

    async fn create_loan(&self, loan: &NewLoan) -> StoreResult<EquipmentLoan> {
        self.admin_token()?;
        let item = self.equipment_item(loan.equipment_id).await?;
        let remaining = u32::try_from(i64::from(item.total_quantity) - i64::from(loan.quantity))
            .map_err(|_| {
                StoreError::Rejected(format!(
                    "Quantidade indisponível. Máximo disponível: {}",
                    item.total_quantity
                ))
            })?;

        let stored: EquipmentLoan = self.insert("equipment_loans", loan).await?;
        self.set_stock(item.id, remaining).await?;
        tracing::info!(loan = %stored.id, equipment = %item.id, remaining, "Loan created");
        Ok(stored)
    }

    async fn return_loan(&self, loan_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let loan = self.loan(loan_id).await?.ok_or(StoreError::NotFound)?;
        if !loan.is_active() {
            return Ok(());
        }
        self.update(
            "equipment_loans",
            &[("id", eq(loan_id))],
            &json!({ "status": LoanStatus::Returned, "updated_at": at }),
        )
        .await?;
        let item = self.equipment_item(loan.equipment_id).await?;
        let restored = item.total_quantity.saturating_add(loan.quantity.unsigned_abs());
        self.set_stock(item.id, restored).await
    }

    async fn delete_loan(&self, loan_id: Uuid) -> StoreResult<()> {
        let loan = self.loan(loan_id).await?.ok_or(StoreError::NotFound)?;
        if loan.is_active() {
            let item = self.equipment_item(loan.equipment_id).await?;
            let restored = item.total_quantity.saturating_add(loan.quantity.unsigned_abs());
            self.set_stock(item.id, restored).await?;
        }
        self.delete("equipment_loans", &[("id", eq(loan_id))]).await
    }

    async fn change_own_password(&self, current: &str, new: &str) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "change_own_password",
            json!({
                "p_admin_token": token,
                "p_current_password": current,
                "p_new_password": new,
            }),
        )
        .await
    }

    async fn reset_admin_password(&self, admin_id: Uuid, new: &str) -> StoreResult<()> {
        let token = self.admin_token()?;
        self.rpc(
            "reset_admin_password",
            json!({
                "p_admin_token": token,
                "p_target_admin_id": admin_id,
                "p_new_password": new,
            }),
        )
        .await
    }
}
