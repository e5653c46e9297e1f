//! Data models for contacts and their journey state
//!
//! This module contains the persisted contact record, the enums that make up
//! its state, the idempotency flags, and the row layout shared with the ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JourneyError, Result};
use crate::templates::TemplateId;

/// Where a lead came from; decides the length of its session window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadSource {
    /// Click-to-WhatsApp ads (72-hour window)
    FacebookAds,
    /// Website or page visitors (24-hour window)
    Website,
}

impl LeadSource {
    /// Persisted spelling
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FacebookAds => "facebook_ads",
            Self::Website => "website",
        }
    }
}

impl FromStr for LeadSource {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "facebook_ads" => Ok(Self::FacebookAds),
            "website" => Ok(Self::Website),
            other => Err(JourneyError::InvalidRecord(format!("unknown lead source '{other}'"))),
        }
    }
}

/// Conversation branch: normal booking progress or re-engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TreeType {
    /// Normal booking path
    #[default]
    Tree1,
    /// Stalled lead that never picked a timeslot
    Tree2,
}

impl TreeType {
    /// Persisted spelling
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tree1 => "Tree1",
            Self::Tree2 => "Tree2",
        }
    }
}

impl FromStr for TreeType {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Tree1" | "" => Ok(Self::Tree1),
            "Tree2" => Ok(Self::Tree2),
            other => Err(JourneyError::InvalidRecord(format!("unknown tree '{other}'"))),
        }
    }
}

/// Booking progress of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Step {
    /// Never sent anything
    #[default]
    New,
    /// Asked for a first name
    AwaitingName,
    /// Asked to pick a day
    AwaitingDay,
    /// Day picked, asked to pick a time on that day
    AwaitingTime {
        /// Day code chosen in the previous step
        day: char,
    },
    /// Holds a booking
    Confirmed,
}

impl Step {
    /// Persisted spelling; the pending day of `AwaitingTime` is stored separately.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::AwaitingName => "AwaitingName",
            Self::AwaitingDay => "AwaitingDay",
            Self::AwaitingTime { .. } => "AwaitingTime",
            Self::Confirmed => "Confirmed",
        }
    }

    /// True while the contact is choosing a day or a time.
    #[must_use]
    pub const fn is_selecting(&self) -> bool {
        matches!(self, Self::AwaitingDay | Self::AwaitingTime { .. })
    }

    fn parse(step: &str, pending_day: &str) -> Result<Self> {
        match step {
            "New" | "" => Ok(Self::New),
            "AwaitingName" => Ok(Self::AwaitingName),
            "AwaitingDay" => Ok(Self::AwaitingDay),
            "AwaitingTime" => pending_day
                .chars()
                .next()
                .map(|day| Self::AwaitingTime { day })
                .ok_or_else(|| JourneyError::InvalidRecord("AwaitingTime without a pending day".to_string())),
            "Confirmed" => Ok(Self::Confirmed),
            other => Err(JourneyError::InvalidRecord(format!("unknown step '{other}'"))),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingTime { day } => write!(f, "AwaitingTime({day})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Attendance of the last booked session, filled in by the weekly batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttendedStatus {
    /// Not reconciled yet
    #[default]
    Unknown,
    /// Showed up
    Attended,
    /// Booked but did not show up
    NoShow,
}

impl AttendedStatus {
    /// Persisted spelling
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Attended => "Attended",
            Self::NoShow => "NoShow",
        }
    }
}

impl FromStr for AttendedStatus {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "Unknown" => Ok(Self::Unknown),
            "Attended" => Ok(Self::Attended),
            "NoShow" => Ok(Self::NoShow),
            other => Err(JourneyError::InvalidRecord(format!("unknown attendance '{other}'"))),
        }
    }
}

/// Externally verified membership status. Recorded as given, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Has not paid
    #[default]
    Prospect,
    /// On the fair trial
    Trial,
    /// Full member
    Member,
}

impl MemberStatus {
    /// Persisted spelling
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prospect => "prospect",
            Self::Trial => "trial",
            Self::Member => "member",
        }
    }
}

impl FromStr for MemberStatus {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "prospect" => Ok(Self::Prospect),
            "trial" => Ok(Self::Trial),
            "member" => Ok(Self::Member),
            other => Err(JourneyError::InvalidRecord(format!("unknown member status '{other}'"))),
        }
    }
}

/// A chosen timeslot together with the session instant resolved from it.
///
/// The two only ever travel together, so a session time cannot exist without
/// the code it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Compound catalog code, e.g. `SB`
    pub timeslot: String,
    /// Concrete session start resolved at booking time
    pub session_at: DateTime<Utc>,
}

/// One-time message flags for the current booking cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SentFlags {
    /// T-12h reminder
    pub reminder_12h: bool,
    /// T-60min reminder
    pub reminder_60min: bool,
    /// T-10min reminder
    pub reminder_10min: bool,
    /// T+5min sales offer
    pub sales_s1: bool,
    /// T+20min social-proof message
    pub sales_shakeup: bool,
    /// T+2h second offer
    pub sales_s2: bool,
    /// First Tree2 follow-up
    pub tree2_first: bool,
    /// Second Tree2 follow-up
    pub tree2_second: bool,
    /// Next-morning 09:00 offer
    pub sales_s3: bool,
    /// Tree2 Sunday 16:00 offer
    pub tree2_sales_s1: bool,
    /// Tree2 Monday 09:00 offer
    pub tree2_sales_s2: bool,
}

impl SentFlags {
    /// Clear every flag; a new booking re-runs the whole cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True if no flag is set
    #[must_use]
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

/// Kind of an outbound message, naming the flag it consumes (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Conversational reply to an inbound message
    Reply,
    /// T-12h reminder
    Reminder12h,
    /// T-60min reminder
    Reminder60Min,
    /// T-10min reminder
    Reminder10Min,
    /// T+5min sales offer
    SalesS1,
    /// T+20min social proof
    SalesShakeup,
    /// T+2h second offer
    SalesS2,
    /// First Tree2 follow-up
    Tree2First,
    /// Second Tree2 follow-up
    Tree2Second,
    /// Next-morning offer after the session
    SalesS3,
    /// Sunday offer for a Tree2 lead
    Tree2SalesS1,
    /// Monday offer for a Tree2 lead
    Tree2SalesS2,
    /// Weekly re-invite for no-shows and non-converting attendees
    Reinvite,
    /// Welcome after becoming a trial user or member
    Welcome,
}

impl MessageKind {
    /// Stable name used in logs and metrics labels
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Reminder12h => "reminder_12h",
            Self::Reminder60Min => "reminder_60min",
            Self::Reminder10Min => "reminder_10min",
            Self::SalesS1 => "sales_s1",
            Self::SalesShakeup => "sales_shakeup",
            Self::SalesS2 => "sales_s2",
            Self::Tree2First => "tree2_first",
            Self::Tree2Second => "tree2_second",
            Self::SalesS3 => "sales_s3",
            Self::Tree2SalesS1 => "tree2_sales_s1",
            Self::Tree2SalesS2 => "tree2_sales_s2",
            Self::Reinvite => "reinvite",
            Self::Welcome => "welcome",
        }
    }

    /// Anchored to a session start: once missed, never sent.
    #[must_use]
    pub const fn is_time_anchored(&self) -> bool {
        matches!(self, Self::Reminder12h | Self::Reminder60Min | Self::Reminder10Min)
    }

    /// Whether the flag for this kind is already set.
    #[must_use]
    pub const fn is_sent(&self, flags: &SentFlags) -> bool {
        match self {
            Self::Reply | Self::Reinvite | Self::Welcome => false,
            Self::Reminder12h => flags.reminder_12h,
            Self::Reminder60Min => flags.reminder_60min,
            Self::Reminder10Min => flags.reminder_10min,
            Self::SalesS1 => flags.sales_s1,
            Self::SalesShakeup => flags.sales_shakeup,
            Self::SalesS2 => flags.sales_s2,
            Self::Tree2First => flags.tree2_first,
            Self::Tree2Second => flags.tree2_second,
            Self::SalesS3 => flags.sales_s3,
            Self::Tree2SalesS1 => flags.tree2_sales_s1,
            Self::Tree2SalesS2 => flags.tree2_sales_s2,
        }
    }

    /// Provider custom field that mirrors this kind's flag.
    #[must_use]
    pub const fn flag_field(&self) -> Option<&'static str> {
        match self {
            Self::Reminder12h => Some("reminder_12h_sent"),
            Self::Reminder60Min => Some("reminder_60min_sent"),
            Self::Reminder10Min => Some("reminder_10min_sent"),
            Self::SalesS1 => Some("sales_s1_sent"),
            Self::SalesShakeup => Some("sales_shakeup_sent"),
            Self::SalesS2 => Some("sales_s2_sent"),
            Self::Tree2First => Some("tree2_first_sent"),
            Self::Tree2Second => Some("tree2_second_sent"),
            Self::SalesS3 => Some("sales_s3_sent"),
            Self::Tree2SalesS1 => Some("tree2_sales_s1_sent"),
            Self::Tree2SalesS2 => Some("tree2_sales_s2_sent"),
            Self::Reply | Self::Reinvite | Self::Welcome => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message some decision wants sent. Ephemeral: consumed by the dispatcher
/// in the same round that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledIntent {
    /// Recipient
    pub contact_id: String,
    /// Which flag (if any) a successful send sets
    pub kind: MessageKind,
    /// What to render
    pub template: TemplateId,
    /// Instant the message became due
    pub earliest_fire: DateTime<Utc>,
}

/// A side effect requested by a decision function, performed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a message
    Send(ScheduledIntent),
    /// Mirror a value into a provider custom field
    SetField {
        /// Custom field name
        field: &'static str,
        /// New value
        value: String,
    },
}

impl Effect {
    /// Shorthand for a send effect.
    #[must_use]
    pub fn send(contact_id: &str, kind: MessageKind, template: TemplateId, at: DateTime<Utc>) -> Self {
        Self::Send(ScheduledIntent { contact_id: contact_id.to_string(), kind, template, earliest_fire: at })
    }

    /// Shorthand for a field update.
    #[must_use]
    pub fn set_field(field: &'static str, value: impl Into<String>) -> Self {
        Self::SetField { field, value: value.into() }
    }
}

/// One end customer and everything the journey knows about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Provider-assigned identifier
    pub id: String,
    /// WhatsApp number
    pub phone: Option<String>,
    /// First name, known once registration completes
    pub first_name: Option<String>,
    /// Locked on the first inbound message
    pub lead_source: Option<LeadSource>,
    /// Conversation branch
    pub tree: TreeType,
    /// Booking progress
    pub step: Step,
    /// First inbound message
    pub registered_at: DateTime<Utc>,
    /// Current booking, if any
    pub booking: Option<Booking>,
    /// Last inbound message
    pub last_inbound_at: Option<DateTime<Utc>>,
    /// Cached `last_inbound_at + window(lead_source)`
    pub window_expires_at: Option<DateTime<Utc>>,
    /// One-way confirmation flag
    pub thumbs_up: bool,
    /// Idempotency flags for the current booking cycle
    pub sent: SentFlags,
    /// Attendance of the last session
    pub attended: AttendedStatus,
    /// Membership status
    pub member: MemberStatus,
    /// Payment verified by an operator
    pub payment_verified: bool,
    /// When the contact switched to Tree2; set at most once
    pub tree2_entered_at: Option<DateTime<Utc>>,
    /// ISO week (e.g. `2026-W42`) of the last weekly re-invite
    pub reinvited_week: Option<String>,
    /// Audit timestamp of the last mutation
    pub last_updated: DateTime<Utc>,
}

impl Contact {
    /// A fresh contact created by its first inbound message.
    #[must_use]
    pub fn new(id: impl Into<String>, phone: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            phone,
            first_name: None,
            lead_source: None,
            tree: TreeType::Tree1,
            step: Step::New,
            registered_at: now,
            booking: None,
            last_inbound_at: None,
            window_expires_at: None,
            thumbs_up: false,
            sent: SentFlags::default(),
            attended: AttendedStatus::Unknown,
            member: MemberStatus::Prospect,
            payment_verified: false,
            tree2_entered_at: None,
            reinvited_week: None,
            last_updated: now,
        }
    }

    /// Chosen timeslot code, if any
    #[must_use]
    pub fn chosen_timeslot(&self) -> Option<&str> {
        self.booking.as_ref().map(|b| b.timeslot.as_str())
    }

    /// Session start of the current booking, if any
    #[must_use]
    pub fn session_at(&self) -> Option<DateTime<Utc>> {
        self.booking.as_ref().map(|b| b.session_at)
    }

    /// Store a new booking. Starts a new cycle: flags and attendance reset and
    /// the contact returns to the normal tree.
    pub fn book(&mut self, booking: Booking, now: DateTime<Utc>) {
        self.booking = Some(booking);
        self.sent.reset();
        self.attended = AttendedStatus::Unknown;
        self.tree = TreeType::Tree1;
        self.step = Step::Confirmed;
        self.last_updated = now;
    }

    /// Commit the state change that follows a successful send of `kind`.
    pub fn record_delivery(&mut self, kind: MessageKind, now: DateTime<Utc>) {
        let flags = &mut self.sent;
        match kind {
            MessageKind::Reply | MessageKind::Welcome => {}
            MessageKind::Reminder12h => flags.reminder_12h = true,
            MessageKind::Reminder60Min => flags.reminder_60min = true,
            MessageKind::Reminder10Min => flags.reminder_10min = true,
            MessageKind::SalesS1 => flags.sales_s1 = true,
            MessageKind::SalesShakeup => flags.sales_shakeup = true,
            MessageKind::SalesS2 => flags.sales_s2 = true,
            MessageKind::Tree2First => flags.tree2_first = true,
            MessageKind::Tree2Second => flags.tree2_second = true,
            MessageKind::SalesS3 => flags.sales_s3 = true,
            MessageKind::Tree2SalesS1 => flags.tree2_sales_s1 = true,
            MessageKind::Tree2SalesS2 => flags.tree2_sales_s2 = true,
            MessageKind::Reinvite => {
                self.reinvited_week = Some(iso_week_key(now));
                self.step = Step::AwaitingDay;
            }
        }
        self.last_updated = now;
    }

    /// Paid, on a trial or a member; sales and re-engagement stop.
    #[must_use]
    pub fn is_converted(&self) -> bool {
        self.member != MemberStatus::Prospect || self.payment_verified
    }

    /// Record an externally verified membership status.
    ///
    /// `payment_verified` is left as is when `None`. Returns true when the
    /// status itself changed.
    pub fn record_member_status(
        &mut self,
        status: MemberStatus,
        payment_verified: Option<bool>,
        now: DateTime<Utc>,
    ) -> bool {
        let changed = self.member != status;
        self.member = status;
        if let Some(paid) = payment_verified {
            self.payment_verified = paid;
        }
        self.last_updated = now;
        changed
    }

    /// Persisted row in [`RECORD_COLUMNS`] order.
    #[must_use]
    pub fn to_record(&self) -> Vec<String> {
        let pending_day = match self.step {
            Step::AwaitingTime { day } => day.to_string(),
            _ => String::new(),
        };
        vec![
            self.id.clone(),
            self.phone.clone().unwrap_or_default(),
            self.first_name.clone().unwrap_or_default(),
            self.lead_source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            self.tree.as_str().to_string(),
            self.step.as_str().to_string(),
            format_instant(Some(self.registered_at)),
            self.chosen_timeslot().unwrap_or_default().to_string(),
            format_instant(self.session_at()),
            format_instant(self.last_inbound_at),
            format_instant(self.window_expires_at),
            yes_no(self.thumbs_up),
            yes_no(self.sent.reminder_12h),
            yes_no(self.sent.reminder_60min),
            yes_no(self.sent.reminder_10min),
            self.attended.as_str().to_string(),
            self.member.as_str().to_string(),
            yes_no(self.payment_verified),
            self.tree.as_str().to_string(),
            format_instant(Some(self.last_updated)),
            pending_day,
            yes_no(self.sent.sales_s1),
            yes_no(self.sent.sales_shakeup),
            yes_no(self.sent.sales_s2),
            yes_no(self.sent.tree2_first),
            yes_no(self.sent.tree2_second),
            format_instant(self.tree2_entered_at),
            self.reinvited_week.clone().unwrap_or_default(),
            yes_no(self.sent.sales_s3),
            yes_no(self.sent.tree2_sales_s1),
            yes_no(self.sent.tree2_sales_s2),
        ]
    }

    /// Rebuild a contact from a persisted row.
    ///
    /// Rows shorter than [`RECORD_COLUMNS`] are accepted; missing trailing cells
    /// read as empty, so rows written before columns were appended still load.
    pub fn from_record<S: AsRef<str>>(row: &[S]) -> Result<Self> {
        let cell = |i: usize| row.get(i).map_or("", |c| c.as_ref().trim());

        let id = cell(0);
        if id.is_empty() {
            return Err(JourneyError::InvalidRecord("empty contact id".to_string()));
        }

        let registered_at = parse_instant(cell(6))?
            .ok_or_else(|| JourneyError::InvalidRecord(format!("contact {id} has no registration time")))?;
        let last_updated = parse_instant(cell(19))?.unwrap_or(registered_at);

        let booking = match (non_empty(cell(7)), parse_instant(cell(8))?) {
            (Some(timeslot), Some(session_at)) => Some(Booking { timeslot, session_at }),
            (None, None) => None,
            _ => {
                return Err(JourneyError::InvalidRecord(format!(
                    "contact {id} has a timeslot without a session time (or the reverse)"
                )))
            }
        };

        // tree_type is authoritative; current_tree is the older duplicate column
        let tree_cell = if cell(18).is_empty() { cell(4) } else { cell(18) };

        Ok(Self {
            id: id.to_string(),
            phone: non_empty(cell(1)),
            first_name: non_empty(cell(2)),
            lead_source: non_empty(cell(3)).map(|s| s.parse::<LeadSource>()).transpose()?,
            tree: tree_cell.parse()?,
            step: Step::parse(cell(5), cell(20))?,
            registered_at,
            booking,
            last_inbound_at: parse_instant(cell(9))?,
            window_expires_at: parse_instant(cell(10))?,
            thumbs_up: is_yes(cell(11)),
            sent: SentFlags {
                reminder_12h: is_yes(cell(12)),
                reminder_60min: is_yes(cell(13)),
                reminder_10min: is_yes(cell(14)),
                sales_s1: is_yes(cell(21)),
                sales_shakeup: is_yes(cell(22)),
                sales_s2: is_yes(cell(23)),
                tree2_first: is_yes(cell(24)),
                tree2_second: is_yes(cell(25)),
                sales_s3: is_yes(cell(28)),
                tree2_sales_s1: is_yes(cell(29)),
                tree2_sales_s2: is_yes(cell(30)),
            },
            attended: cell(15).parse()?,
            member: cell(16).parse()?,
            payment_verified: is_yes(cell(17)),
            tree2_entered_at: parse_instant(cell(26))?,
            reinvited_week: non_empty(cell(27)),
            last_updated,
        })
    }
}

/// Column order of a persisted contact row. The first twenty columns are the
/// original sheet layout; later columns are only ever appended.
pub const RECORD_COLUMNS: [&str; 31] = [
    "contact_id",
    "whatsapp_number",
    "first_name",
    "lead_source",
    "current_tree",
    "current_step",
    "registration_time",
    "chosen_timeslot",
    "session_datetime",
    "last_inbound_time",
    "window_expires_at",
    "thumbs_up",
    "reminder_12h_sent",
    "reminder_60min_sent",
    "reminder_10min_sent",
    "attended",
    "member_status",
    "payment_verified",
    "tree_type",
    "last_updated",
    "pending_day",
    "sales_s1_sent",
    "sales_shakeup_sent",
    "sales_s2_sent",
    "tree2_first_sent",
    "tree2_second_sent",
    "tree2_entered_at",
    "reinvited_week",
    "sales_s3_sent",
    "tree2_sales_s1_sent",
    "tree2_sales_s2_sent",
];

/// Calendar key of the ISO week containing `now`, e.g. `2026-W42`.
#[must_use]
pub fn iso_week_key(now: DateTime<Utc>) -> String {
    let week = now.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

fn format_instant(instant: Option<DateTime<Utc>>) -> String {
    instant.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)).unwrap_or_default()
}

fn parse_instant(cell: &str) -> Result<Option<DateTime<Utc>>> {
    if cell.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(cell)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| JourneyError::InvalidRecord(format!("bad timestamp '{cell}': {e}")))
}

fn yes_no(flag: bool) -> String {
    let cell = if flag { "Yes" } else { "No" };
    cell.to_string()
}

fn is_yes(cell: &str) -> bool {
    cell.eq_ignore_ascii_case("yes") || cell.eq_ignore_ascii_case("true")
}

fn non_empty(cell: &str) -> Option<String> {
    (!cell.is_empty()).then(|| cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, m, 0).unwrap()
    }

    #[test]
    fn test_record_round_trip_keeps_pending_day() {
        let mut contact = Contact::new("42", Some("+6591234567".to_string()), at(9, 0));
        contact.first_name = Some("Sarah".to_string());
        contact.lead_source = Some(LeadSource::Website);
        contact.step = Step::AwaitingTime { day: 'S' };
        contact.last_inbound_at = Some(at(9, 5));

        let row = contact.to_record();
        assert_eq!(row.len(), RECORD_COLUMNS.len());
        assert_eq!(row[5], "AwaitingTime");
        assert_eq!(row[20], "S");
        assert_eq!(Contact::from_record(&row).unwrap(), contact);
    }

    #[test]
    fn test_short_rows_load_with_defaults() {
        let row = ["7", "+100", "Ann", "facebook_ads", "Tree1", "AwaitingDay", "2026-10-14T09:00:00Z"];
        let contact = Contact::from_record(&row).unwrap();
        assert_eq!(contact.step, Step::AwaitingDay);
        assert!(contact.sent.is_clear());
        assert_eq!(contact.last_updated, contact.registered_at);
    }

    #[test]
    fn test_timeslot_without_session_is_rejected() {
        let mut row = Contact::new("9", None, at(9, 0)).to_record();
        row[7] = "SB".to_string();
        assert!(Contact::from_record(&row).is_err());
    }

    #[test]
    fn test_booking_resets_cycle() {
        let mut contact = Contact::new("1", None, at(8, 0));
        contact.sent.reminder_12h = true;
        contact.sent.sales_s2 = true;
        contact.attended = AttendedStatus::NoShow;
        contact.tree = TreeType::Tree2;

        contact.book(Booking { timeslot: "UA".to_string(), session_at: at(20, 0) }, at(9, 0));

        assert!(contact.sent.is_clear());
        assert_eq!(contact.attended, AttendedStatus::Unknown);
        assert_eq!(contact.tree, TreeType::Tree1);
        assert_eq!(contact.step, Step::Confirmed);
    }

    #[test]
    fn test_member_status_change_is_reported_once() {
        let mut contact = Contact::new("1", None, at(8, 0));
        assert!(!contact.is_converted());

        assert!(contact.record_member_status(MemberStatus::Trial, Some(true), at(9, 0)));
        assert!(contact.is_converted());
        assert!(contact.payment_verified);

        assert!(!contact.record_member_status(MemberStatus::Trial, None, at(10, 0)));
        assert!(contact.payment_verified);
        assert_eq!(contact.last_updated, at(10, 0));
    }

    #[test]
    fn test_payment_alone_counts_as_converted() {
        let mut contact = Contact::new("1", None, at(8, 0));
        contact.payment_verified = true;
        assert!(contact.is_converted());
    }

    #[test]
    fn test_late_columns_round_trip() {
        let mut contact = Contact::new("1", None, at(8, 0));
        contact.sent.sales_s3 = true;
        contact.sent.tree2_sales_s2 = true;
        let row = contact.to_record();
        assert_eq!(row[28], "Yes");
        assert_eq!(row[29], "No");
        assert_eq!(Contact::from_record(&row).unwrap().sent, contact.sent);
    }

    #[test]
    fn test_reinvite_delivery_reopens_day_choice() {
        let mut contact = Contact::new("1", None, at(8, 0));
        contact.step = Step::Confirmed;
        contact.record_delivery(MessageKind::Reinvite, at(10, 0));
        assert_eq!(contact.step, Step::AwaitingDay);
        assert_eq!(contact.reinvited_week.as_deref(), Some("2026-W42"));
    }
}
