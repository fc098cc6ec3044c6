//! Abstractions for time and user feedback to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic testing
//! - `Notifier`: Abstracting the success/error feedback shown to the user

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// Booking decisions depend on "now" (past-time and lead-time checks), so
/// every service takes a clock instead of calling `Utc::now()` directly.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time at the given fixed offset.
    fn now_at(&self, offset: FixedOffset) -> DateTime<FixedOffset> {
        self.now_utc().with_timezone(&offset)
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.utc_time.lock().unwrap() = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.utc_time.lock().unwrap();
        *time += duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap()
    }
}

// ==================== Notifier Trait ====================

/// Kind of feedback presented to the user after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Success,
    Error,
}

/// Trait for abstracting user-facing feedback (toasts, banners, CLI output).
pub trait Notifier: Send + Sync {
    /// Present a feedback message of the given kind.
    fn notify(&self, kind: FeedbackKind, message: &str) -> Result<()>;
}

/// Notifier that writes feedback to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: FeedbackKind, message: &str) -> Result<()> {
        match kind {
            FeedbackKind::Success => tracing::info!(feedback = "success", "{}", message),
            FeedbackKind::Error => tracing::warn!(feedback = "error", "{}", message),
        }
        Ok(())
    }
}

/// Mock notifier for testing that records all feedback.
#[derive(Debug, Clone, Default)]
pub struct MockNotifier {
    notifications: Arc<Mutex<Vec<(FeedbackKind, String)>>>,
}

impl MockNotifier {
    /// Create a new mock notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all feedback that has been sent.
    pub fn get_notifications(&self) -> Vec<(FeedbackKind, String)> {
        self.notifications.lock().unwrap().clone()
    }

    /// Get the count of feedback messages sent.
    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    /// The most recent feedback, if any.
    pub fn last(&self) -> Option<(FeedbackKind, String)> {
        self.notifications.lock().unwrap().last().cloned()
    }

    /// Clear all recorded feedback.
    pub fn clear(&self) {
        self.notifications.lock().unwrap().clear();
    }

    /// Check if any feedback was sent.
    pub fn was_called(&self) -> bool {
        !self.notifications.lock().unwrap().is_empty()
    }
}

impl Notifier for MockNotifier {
    fn notify(&self, kind: FeedbackKind, message: &str) -> Result<()> {
        self.notifications
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
        Ok(())
    }
}
