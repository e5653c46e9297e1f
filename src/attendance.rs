//! Weekly attendance roster
//!
//! The Monday batch compares booked contacts against a roster of people who
//! actually joined. Where that roster comes from is behind [`AttendanceSource`].

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Contact;
use crate::validation::InputValidator;

/// People who attended the past weekend's sessions, by contact id or phone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    ids: HashSet<String>,
    phones: HashSet<String>,
}

impl Roster {
    /// Empty roster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attendee by contact id.
    pub fn insert_id(&mut self, id: &str) {
        let id = id.trim();
        if !id.is_empty() {
            self.ids.insert(id.to_string());
        }
    }

    /// Add an attendee by phone number. Returns false if it is not a plausible number.
    pub fn insert_phone(&mut self, phone: &str) -> bool {
        if InputValidator::validate_phone(phone).is_err() {
            return false;
        }
        self.phones.insert(InputValidator::normalize_phone(phone))
    }

    /// Whether `contact` attended, matched by id or by phone digits.
    #[must_use]
    pub fn contains(&self, contact: &Contact) -> bool {
        self.ids.contains(&contact.id)
            || contact
                .phone
                .as_deref()
                .map(InputValidator::normalize_phone)
                .is_some_and(|digits| !digits.is_empty() && self.phones.contains(&digits))
    }

    /// Number of distinct entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len() + self.phones.len()
    }

    /// True if nobody is on the roster
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.phones.is_empty()
    }
}

/// Provides the roster for the weekly attendance batch.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    /// The current roster, or `None` if none has been provided this week.
    async fn roster(&self) -> Result<Option<Roster>>;
}

/// Roster read from a CSV export of the meeting's participant list.
///
/// Recognized headers are `contact_id` and `whatsapp_number` (or `phone`).
/// Without either, the first column is read as a phone number.
#[derive(Debug, Clone)]
pub struct CsvAttendance {
    path: PathBuf,
}

impl CsvAttendance {
    /// Read the roster from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AttendanceSource for CsvAttendance {
    async fn roster(&self) -> Result<Option<Roster>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "No attendance roster found");
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        let column = |names: &[&str]| {
            headers.iter().position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        let id_col = column(&["contact_id"]);
        let phone_col = column(&["whatsapp_number", "phone"]).or(if id_col.is_none() { Some(0) } else { None });

        let mut roster = Roster::new();
        for record in reader.records() {
            let record = record?;
            if let Some(id) = id_col.and_then(|i| record.get(i)) {
                roster.insert_id(id);
            }
            if let Some(phone) = phone_col.and_then(|i| record.get(i)) {
                if !phone.trim().is_empty() && !roster.insert_phone(phone) {
                    debug!(phone, "Skipping roster entry that is not a phone number");
                }
            }
        }

        Ok(Some(roster))
    }
}
