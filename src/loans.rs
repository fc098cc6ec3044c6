//! Equipment lent out by administrators, outside the booking flow.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::{
    availability::{Rejection, local_to_utc},
    error::EquipmentError,
    models::{EquipmentLoan, LoanStatus, NewLoan},
    store::{AdminStore, BookingStore},
    traits::Clock,
};

/// Loan form as filled in by an administrator, in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub borrower: String,
    pub role: Option<String>,
    pub location: Option<String>,
    pub unit: String,
    pub equipment_id: Uuid,
    pub quantity: u32,
    pub asset_numbers: Vec<String>,
    pub cpf: Option<String>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl LoanRequest {
    pub fn to_new_loan(&self, offset: FixedOffset) -> NewLoan {
        let assets: Vec<&str> = self
            .asset_numbers
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        NewLoan {
            user_full_name: self.borrower.trim().to_string(),
            user_role: self.role.clone(),
            location: self.location.clone(),
            start_at: local_to_utc(self.start, offset),
            end_at: local_to_utc(self.end, offset),
            equipment_id: self.equipment_id,
            quantity: i32::try_from(self.quantity).unwrap_or(i32::MAX),
            asset_number: (!assets.is_empty()).then(|| assets.join(", ")),
            cpf: self.cpf.clone(),
            unit: self.unit.clone(),
            status: LoanStatus::Active,
        }
    }
}

/// Check a loan form: not starting before today, ending after it starts,
/// and no more units than `stock`.
pub fn validate_loan(
    request: &LoanRequest,
    stock: u32,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Result<(), EquipmentError> {
    let today = now.with_timezone(&offset).date_naive();
    if request.start.date() < today {
        return Err(Rejection::PastDate.into());
    }
    if request.end <= request.start {
        return Err(Rejection::EndBeforeStart.into());
    }
    if request.quantity == 0 {
        return Err(EquipmentError::NothingSelected);
    }
    if request.quantity > stock {
        return Err(EquipmentError::InsufficientStock {
            name: String::new(),
            requested: request.quantity,
            available: stock,
        });
    }
    Ok(())
}

pub struct LoanService<S, C> {
    store: S,
    clock: C,
    offset: FixedOffset,
}

impl<S: AdminStore + BookingStore, C: Clock> LoanService<S, C> {
    pub fn new(store: S, clock: C, offset: FixedOffset) -> Self {
        Self {
            store,
            clock,
            offset,
        }
    }

    pub async fn loans(&self, unit: &str) -> Result<Vec<EquipmentLoan>, EquipmentError> {
        Ok(self.store.loans(unit).await?)
    }

    /// Validate against the item's current stock and record the loan.
    pub async fn lend(&self, request: &LoanRequest) -> Result<EquipmentLoan, EquipmentError> {
        let item = self
            .store
            .equipment(&request.unit)
            .await?
            .into_iter()
            .find(|e| e.id == request.equipment_id)
            .ok_or(EquipmentError::EquipmentNotFound(request.equipment_id))?;

        validate_loan(request, item.total_quantity, self.offset, self.clock.now_utc()).map_err(
            |e| match e {
                EquipmentError::InsufficientStock {
                    requested,
                    available,
                    ..
                } => EquipmentError::InsufficientStock {
                    name: item.name.clone(),
                    requested,
                    available,
                },
                e => e,
            },
        )?;

        let loan = self.store.create_loan(&request.to_new_loan(self.offset)).await?;
        tracing::info!(loan = %loan.id, equipment = %item.name, quantity = request.quantity, "Equipment lent");
        Ok(loan)
    }

    /// Mark a loan returned now and put its units back in stock.
    pub async fn return_loan(&self, loan_id: Uuid) -> Result<(), EquipmentError> {
        let loan = self
            .store
            .loan(loan_id)
            .await?
            .ok_or(EquipmentError::LoanNotFound)?;
        if !loan.is_active() {
            return Err(EquipmentError::AlreadyReturned);
        }
        self.store.return_loan(loan_id, self.clock.now_utc()).await?;
        tracing::info!(loan = %loan_id, "Loan returned");
        Ok(())
    }

    /// Delete a loan record; an active loan gives its units back first.
    pub async fn delete(&self, loan_id: Uuid) -> Result<(), EquipmentError> {
        if self.store.loan(loan_id).await?.is_none() {
            return Err(EquipmentError::LoanNotFound);
        }
        self.store.delete_loan(loan_id).await?;
        tracing::info!(loan = %loan_id, "Loan record deleted");
        Ok(())
    }
}
