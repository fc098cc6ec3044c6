//! School Booking Library
//!
//! Room and equipment booking for a multi-unit school: the availability
//! checker, the booking services built on it, and the stores they run against.

pub mod audit;
pub mod availability;
pub mod booking;
pub mod config;
pub mod equipment;
pub mod error;
pub mod loans;
pub mod models;
pub mod password;
pub mod schedule;
pub mod store;
pub mod timetable;
pub mod traits;
pub mod verification;

// Re-export commonly used types
pub use audit::{AdminLogEntry, AuditIcon, AuditSummary, change_tip, summarize};
pub use availability::{
    BookingRequest, Rejection, check_availability, check_availability_with_clock, day_bounds,
    local_to_utc,
};
pub use booking::{CancelOutcome, RecurringOutcome, RoomBookingService, remaining_dates_in_month};
pub use config::AppConfig;
pub use equipment::{
    AvailableEquipment, EquipmentRequest, EquipmentService, SignedRequest, available_quantities,
    validate_request,
};
pub use error::{BookingError, EquipmentError, StoreError};
pub use loans::{LoanRequest, LoanService, validate_loan};
pub use models::{
    AdvanceNotice, BookingStatus, Classroom, Equipment, EquipmentLoan, Interval, LoanStatus, Room,
    RoomBooking, RoomDraft, Settings, Teacher,
};
pub use password::{PasswordError, change_password, reset_password};
pub use schedule::RoomSchedule;
pub use store::{AdminStore, BookingStore, MemoryStore, PgStore, RestStore};
pub use timetable::{ClassSchedule, Timetable, TimetableError};
pub use traits::{
    Clock, FeedbackKind, LogNotifier, MockClock, MockNotifier, Notifier, SystemClock,
};
pub use verification::{Verification, VerifiedBooking, term_fingerprint, verify};
