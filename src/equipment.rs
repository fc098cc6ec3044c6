//! Equipment requests: validation, stock availability and the signed term.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    availability::{self, Rejection},
    error::{EquipmentError, StoreError},
    models::{
        AdvanceNotice, Equipment, EquipmentBooking, EquipmentStatus, EquipmentUsage,
        NewEquipmentBooking, Settings, Teacher,
    },
    store::BookingStore,
    traits::Clock,
    verification::term_fingerprint,
};

/// An equipment item with what is left of its stock for one time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableEquipment {
    pub id: Uuid,
    pub name: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub total_quantity: u32,
    pub available_quantity: u32,
}

/// Validate an equipment request: no past dates, end after start, and the
/// unit's equipment advance-notice policy.
pub fn validate_request(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    settings: Option<&Settings>,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    let today = now.with_timezone(&offset).date_naive();
    if date < today {
        return Err(Rejection::PastDate);
    }
    if end <= start {
        return Err(Rejection::EndBeforeStart);
    }
    let advance = settings.map(|s| s.equipment_advance).unwrap_or_default();
    if advance == AdvanceNotice::Disabled {
        return Ok(());
    }
    let start = availability::local_to_utc(date.and_time(start), offset);
    availability::check_lead_time(start, advance, now)
}

/// Remaining stock per item: total minus the quantities held by overlapping
/// active bookings, never below zero. Usage of unknown items is ignored.
pub fn available_quantities(
    equipment: &[Equipment],
    usage: &[EquipmentUsage],
) -> Vec<AvailableEquipment> {
    let mut held: HashMap<Uuid, i64> = HashMap::new();
    for u in usage {
        *held.entry(u.equipment_id).or_default() += i64::from(u.quantity);
    }

    equipment
        .iter()
        .map(|e| {
            let used = held.get(&e.id).copied().unwrap_or(0);
            let left = (i64::from(e.total_quantity) - used).clamp(0, i64::from(e.total_quantity));
            AvailableEquipment {
                id: e.id,
                name: e.name.clone(),
                brand: e.brand.clone(),
                model: e.model.clone(),
                total_quantity: e.total_quantity,
                available_quantity: left as u32,
            }
        })
        .collect()
}

/// What a teacher asks for in one go: place, time and quantity per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquipmentRequest {
    pub unit: String,
    pub local: Option<String>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub items: Vec<(Uuid, u32)>,
    pub observations: Option<String>,
}

/// A stored request and the term it was signed under.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedRequest {
    pub display_id: String,
    pub fingerprint: String,
    pub term_document: Value,
    pub bookings: Vec<EquipmentBooking>,
}

impl SignedRequest {
    /// Token printed in the term's QR code.
    pub fn verification_token(&self) -> Option<&str> {
        self.bookings
            .first()
            .and_then(|b| b.verification_token.as_deref())
    }
}

/// Six-digit number printed on the term.
fn new_display_id() -> String {
    format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000)
}

pub struct EquipmentService<S, C> {
    store: S,
    clock: C,
    offset: FixedOffset,
}

impl<S: BookingStore, C: Clock> EquipmentService<S, C> {
    pub fn new(store: S, clock: C, offset: FixedOffset) -> Self {
        Self {
            store,
            clock,
            offset,
        }
    }

    /// Validate a request against the unit's policy.
    pub async fn validate(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Result<(), Rejection>, StoreError> {
        let settings = self.store.settings(unit).await?;
        Ok(validate_request(
            date,
            start,
            end,
            settings.as_ref(),
            self.offset,
            self.clock.now_utc(),
        ))
    }

    /// Stock of every item of `unit` for `[start, end)` on `date`.
    pub async fn availability(
        &self,
        unit: &str,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Vec<AvailableEquipment>, StoreError> {
        let equipment = self.store.equipment(unit).await?;
        let usage = self.store.equipment_usage(unit, date, start, end).await?;
        tracing::debug!(
            unit,
            items = equipment.len(),
            bookings = usage.len(),
            "Computing equipment availability"
        );
        Ok(available_quantities(&equipment, &usage))
    }

    /// Check a request against policy and current stock, then store one row
    /// per item under a freshly signed term.
    ///
    /// The term document is fingerprinted before `term_hash` is added to it,
    /// and every row gets its own verification token.
    pub async fn request(
        &self,
        teacher: &Teacher,
        request: &EquipmentRequest,
        client: &str,
    ) -> Result<SignedRequest, EquipmentError> {
        let wanted: Vec<(Uuid, u32)> = request
            .items
            .iter()
            .copied()
            .filter(|(_, quantity)| *quantity > 0)
            .collect();
        if wanted.is_empty() {
            return Err(EquipmentError::NothingSelected);
        }

        self.validate(&request.unit, request.date, request.start, request.end)
            .await??;

        let stock = self
            .availability(&request.unit, request.date, request.start, request.end)
            .await?;
        let mut lines = Vec::with_capacity(wanted.len());
        for (id, quantity) in wanted {
            let item = stock
                .iter()
                .find(|e| e.id == id)
                .ok_or(EquipmentError::EquipmentNotFound(id))?;
            if quantity > item.available_quantity {
                return Err(EquipmentError::InsufficientStock {
                    name: item.name.clone(),
                    requested: quantity,
                    available: item.available_quantity,
                });
            }
            lines.push((item, quantity));
        }

        let display_id = new_display_id();
        let mut term = json!({
            "userName": teacher.full_name,
            "userTotvs": teacher.registration,
            "unit": request.unit,
            "local": request.local,
            "date": request.date.format("%Y-%m-%d").to_string(),
            "startTime": request.start.format("%H:%M").to_string(),
            "endTime": request.end.format("%H:%M").to_string(),
            "equipments": lines
                .iter()
                .map(|(item, quantity)| json!({
                    "id": item.id,
                    "name": item.name,
                    "quantity": quantity,
                }))
                .collect::<Vec<_>>(),
            "timestamp": self.clock.now_utc().to_rfc3339(),
            "userAgent": client,
            "displayId": display_id,
        });
        let fingerprint = term_fingerprint(&term.to_string());
        term["term_hash"] = Value::String(fingerprint.clone());

        let rows: Vec<NewEquipmentBooking> = lines
            .iter()
            .map(|(item, quantity)| NewEquipmentBooking {
                user_id: teacher.id,
                unit: request.unit.clone(),
                local: request.local.clone(),
                booking_date: request.date,
                start_time: request.start,
                end_time: request.end,
                equipment_id: item.id,
                // Bounded by the item's stock, which is read from an i32 column.
                quantity: *quantity as i32,
                observations: request.observations.clone(),
                status: EquipmentStatus::Active,
                term_signed: true,
                term_document: term.clone(),
                display_id: display_id.clone(),
                verification_token: Uuid::new_v4().simple().to_string(),
            })
            .collect();

        let bookings = self.store.insert_equipment_bookings(&rows).await?;
        tracing::info!(
            user = %teacher.id,
            unit = %request.unit,
            display_id = %display_id,
            items = bookings.len(),
            "Equipment request stored"
        );
        Ok(SignedRequest {
            display_id,
            fingerprint,
            term_document: term,
            bookings,
        })
    }
}
