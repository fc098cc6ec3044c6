use thiserror::Error;
use uuid::Uuid;

use crate::{availability::Rejection, models::ModelError};

/// Postgres SQLSTATE for an exclusion-constraint violation.
pub const EXCLUSION_VIOLATION: &str = "23P01";

/// Message shown when the store refuses a booking that passed the local check.
pub const CONFLICT_MESSAGE: &str = "Horário indisponível! Alguém acabou de reservar.";

/// Failure talking to the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("booking conflict: {message}")]
    Conflict { message: String },

    #[error("record not found")]
    NotFound,

    #[error("not authorised")]
    Unauthorized,

    /// A privileged procedure ran and declined the operation.
    #[error("{0}")]
    Rejected(String),

    #[error("store returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("db error: {0}")]
    Database(sqlx::Error),

    #[error("invalid record: {0}")]
    Model(#[from] ModelError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(EXCLUSION_VIOLATION) => {
                Self::Conflict {
                    message: db.message().to_string(),
                }
            }
            e => Self::Database(e),
        }
    }
}

/// Outcome of a failed booking operation, split into the three categories
/// shown to the user: local validation, store conflict, anything else.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("{}", CONFLICT_MESSAGE)]
    Conflict,

    #[error("room not found")]
    RoomNotFound,

    #[error("booking not found")]
    BookingNotFound,

    #[error("booking belongs to another user")]
    NotOwner,

    #[error("recurring bookings are not enabled for this user in {unit}")]
    RecurringNotAllowed { unit: String },

    #[error("room booking is disabled for {unit}")]
    BookingDisabled { unit: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => Self::Conflict,
            e => Self::Store(e),
        }
    }
}

impl BookingError {
    /// Message suitable for user feedback.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Rejected(r) => r.to_string(),
            BookingError::Conflict => CONFLICT_MESSAGE.to_string(),
            BookingError::RoomNotFound => "Sala não encontrada.".to_string(),
            BookingError::BookingNotFound => "Agendamento não encontrado.".to_string(),
            BookingError::NotOwner => {
                "Você só pode cancelar os seus próprios agendamentos.".to_string()
            }
            BookingError::RecurringNotAllowed { .. } => {
                "Você não tem permissão para agendamentos recorrentes nesta unidade.".to_string()
            }
            BookingError::BookingDisabled { .. } => {
                "O agendamento de salas está desativado nesta unidade.".to_string()
            }
            BookingError::Store(e) => format!("Erro ao realizar reserva: {e}"),
        }
    }

    /// Stable code for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Rejected(r) => r.code(),
            BookingError::Conflict => "conflict",
            BookingError::RoomNotFound | BookingError::BookingNotFound => "not_found",
            BookingError::NotOwner | BookingError::RecurringNotAllowed { .. } => "forbidden",
            BookingError::BookingDisabled { .. } => "booking_disabled",
            BookingError::Store(_) => "store_error",
        }
    }
}

/// Failed equipment request or loan.
#[derive(Debug, Error)]
pub enum EquipmentError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("no equipment selected")]
    NothingSelected,

    #[error("equipment {0} not found")]
    EquipmentNotFound(Uuid),

    #[error("{name}: {requested} requested, {available} available")]
    InsufficientStock {
        name: String,
        requested: u32,
        available: u32,
    },

    #[error("loan not found")]
    LoanNotFound,

    #[error("loan already returned")]
    AlreadyReturned,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EquipmentError {
    pub fn user_message(&self) -> String {
        match self {
            EquipmentError::Rejected(r) => r.to_string(),
            EquipmentError::NothingSelected => "Selecione ao menos um equipamento.".to_string(),
            EquipmentError::EquipmentNotFound(_) => "Equipamento não encontrado.".to_string(),
            EquipmentError::InsufficientStock { available, .. } => {
                format!("Quantidade indisponível. Máximo disponível: {available}")
            }
            EquipmentError::LoanNotFound => "Empréstimo não encontrado.".to_string(),
            EquipmentError::AlreadyReturned => "Este empréstimo já foi devolvido.".to_string(),
            EquipmentError::Store(_) => "Erro ao salvar agendamento. Tente novamente.".to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EquipmentError::Rejected(r) => r.code(),
            EquipmentError::NothingSelected => "nothing_selected",
            EquipmentError::EquipmentNotFound(_) | EquipmentError::LoanNotFound => "not_found",
            EquipmentError::InsufficientStock { .. } => "insufficient_stock",
            EquipmentError::AlreadyReturned => "already_returned",
            EquipmentError::Store(_) => "store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_becomes_booking_conflict() {
        let err: BookingError = StoreError::Conflict {
            message: "conflicting key value violates exclusion constraint".to_string(),
        }
        .into();
        assert!(matches!(err, BookingError::Conflict));
        assert_eq!(err.user_message(), CONFLICT_MESSAGE);
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_other_store_errors_are_generic() {
        let err: BookingError = StoreError::Api {
            status: 500,
            code: None,
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, BookingError::Store(_)));
        assert!(err.user_message().starts_with("Erro ao realizar reserva:"));
        assert!(err.user_message().contains("boom"));
    }

    #[test]
    fn test_rejection_message_passes_through() {
        let err = BookingError::from(Rejection::SlotOccupied);
        assert_eq!(err.user_message(), Rejection::SlotOccupied.to_string());
        assert_eq!(err.code(), "slot_occupied");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn test_insufficient_stock_names_the_maximum() {
        let err = EquipmentError::InsufficientStock {
            name: "Projetor".to_string(),
            requested: 3,
            available: 1,
        };
        assert_eq!(err.user_message(), "Quantidade indisponível. Máximo disponível: 1");
        assert_eq!(err.code(), "insufficient_stock");
    }

    #[test]
    fn test_categories_have_distinct_messages() {
        let rejected = BookingError::from(Rejection::InPast).user_message();
        let conflict = BookingError::Conflict.user_message();
        let generic = BookingError::Store(StoreError::NotFound).user_message();
        assert_ne!(rejected, conflict);
        assert_ne!(conflict, generic);
        assert_ne!(rejected, generic);
    }
}
