//! Scheduler tick engine
//!
//! Pure scan-and-decide logic for time-driven messages. Nothing here keeps
//! state between ticks: whether a message is due is computed from the contact's
//! persisted anchors and flags alone, so a freshly restarted process makes the
//! same decisions as a long-running one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, Utc, Weekday};

use crate::attendance::Roster;
use crate::error::{JourneyError, Result};
use crate::models::{iso_week_key, AttendedStatus, Contact, Effect, MessageKind, Step, TreeType};
use crate::templates::TemplateId;
use crate::timeslot::{next_day_at, next_weekly};

/// Reminder stages, relative to the session start.
#[must_use]
pub fn reminder_stages() -> [(MessageKind, Duration); 3] {
    [
        (MessageKind::Reminder12h, Duration::hours(-12)),
        (MessageKind::Reminder60Min, Duration::minutes(-60)),
        (MessageKind::Reminder10Min, Duration::minutes(-10)),
    ]
}

/// Sales stages, relative to the session start. The next-morning offer
/// follows them on the local calendar, see [`SALES_S3_TIME`].
#[must_use]
pub fn sales_stages() -> [(MessageKind, Duration); 3] {
    [
        (MessageKind::SalesS1, Duration::minutes(5)),
        (MessageKind::SalesShakeup, Duration::minutes(20)),
        (MessageKind::SalesS2, Duration::hours(2)),
    ]
}

/// Tree2 follow-up stages, relative to the registration time.
#[must_use]
pub fn tree2_stages() -> [(MessageKind, Duration); 2] {
    [
        (MessageKind::Tree2First, Duration::hours(22)),
        (MessageKind::Tree2Second, Duration::minutes(23 * 60 + 30)),
    ]
}

/// Local time of the next-morning sales offer.
pub const SALES_S3_TIME: (u32, u32) = (9, 0);

/// Local calendar slots of the Tree2 offers, counted from the Tree2 switch.
pub const TREE2_SALES_SLOTS: [(MessageKind, Weekday, (u32, u32)); 2] = [
    (MessageKind::Tree2SalesS1, Weekday::Sun, (16, 0)),
    (MessageKind::Tree2SalesS2, Weekday::Mon, (9, 0)),
];

/// Default booking timezone offset, in hours east of UTC.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;

/// Independent groups of time-driven work, each with its own trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFamily {
    /// Pre-session reminders
    Reminders,
    /// Post-session sales follow-ups
    Sales,
    /// Tree2 switch and follow-ups
    Tree2,
    /// Monday attendance reconciliation
    WeeklyAttendance,
    /// Friday re-invites
    WeeklyReinvite,
}

impl JobFamily {
    /// Every family, in trigger order
    pub const ALL: [Self; 5] =
        [Self::Reminders, Self::Sales, Self::Tree2, Self::WeeklyAttendance, Self::WeeklyReinvite];

    /// Stable name used in logs, metrics labels and the CLI
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reminders => "reminders",
            Self::Sales => "sales",
            Self::Tree2 => "tree2",
            Self::WeeklyAttendance => "weekly_attendance",
            Self::WeeklyReinvite => "weekly_reinvite",
        }
    }

    /// Local calendar instant of a weekly family; `None` for interval families.
    #[must_use]
    pub fn weekly_instant(&self) -> Option<(Weekday, NaiveTime)> {
        match self {
            Self::WeeklyAttendance => Some((Weekday::Mon, NaiveTime::from_hms_opt(10, 0, 0)?)),
            Self::WeeklyReinvite => Some((Weekday::Fri, NaiveTime::from_hms_opt(14, 0, 0)?)),
            _ => None,
        }
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobFamily {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| JourneyError::Other(format!("unknown job family '{s}'")))
    }
}

/// Tunables for the due predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerPolicy {
    /// How long after its offset a reminder may still fire
    pub reminder_tolerance: Duration,
    /// How long a lead may sit in day/time selection before switching to Tree2
    pub tree2_grace: Duration,
    /// Whether Friday re-invites are sent at all
    pub reinvites_enabled: bool,
    /// Booking timezone for calendar-anchored offers
    pub local_offset: FixedOffset,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            reminder_tolerance: Duration::minutes(10),
            tree2_grace: Duration::minutes(120),
            reinvites_enabled: true,
            local_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// What one tick decided for one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickDecision {
    /// State change to persist before any send
    pub update: Option<Contact>,
    /// Sends and field mirrors to perform
    pub effects: Vec<Effect>,
}

impl TickDecision {
    /// Nothing to do
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.update.is_none() && self.effects.is_empty()
    }

    fn send(contact: &Contact, kind: MessageKind, template: TemplateId, at: DateTime<Utc>) -> Self {
        Self { update: None, effects: vec![Effect::send(&contact.id, kind, template, at)] }
    }
}

/// Decides which time-driven messages are due.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    policy: SchedulerPolicy,
}

impl Scheduler {
    /// Create a scheduler
    #[must_use]
    pub const fn new(policy: SchedulerPolicy) -> Self {
        Self { policy }
    }

    /// Active policy
    #[must_use]
    pub const fn policy(&self) -> &SchedulerPolicy {
        &self.policy
    }

    /// Decide what `family` has to do for `contact` at `now`.
    ///
    /// Attendance reconciliation needs a roster and goes through
    /// [`Scheduler::reconcile`] instead; here it decides nothing.
    #[must_use]
    pub fn decide(&self, family: JobFamily, contact: &Contact, now: DateTime<Utc>) -> TickDecision {
        match family {
            JobFamily::Reminders => self.reminders(contact, now),
            JobFamily::Sales => self.sales(contact, now),
            JobFamily::Tree2 => self.tree2(contact, now),
            JobFamily::WeeklyAttendance => TickDecision::default(),
            JobFamily::WeeklyReinvite => self.reinvite(contact, now),
        }
    }

    fn reminders(&self, contact: &Contact, now: DateTime<Utc>) -> TickDecision {
        let Some(session_at) = contact.session_at() else {
            return TickDecision::default();
        };
        if contact.step != Step::Confirmed {
            return TickDecision::default();
        }

        match latest_passed(&anchored(&reminder_stages(), session_at), now) {
            Some((kind, due_at))
                if now < due_at + self.policy.reminder_tolerance && !kind.is_sent(&contact.sent) =>
            {
                let template = match kind {
                    MessageKind::Reminder12h if contact.thumbs_up => TemplateId::Reminder12hThumbs,
                    MessageKind::Reminder12h => TemplateId::Reminder12hNoThumbs,
                    MessageKind::Reminder60Min => TemplateId::Reminder60Min,
                    _ => TemplateId::Reminder10Min,
                };
                TickDecision::send(contact, kind, template, due_at)
            }
            _ => TickDecision::default(),
        }
    }

    fn sales(&self, contact: &Contact, now: DateTime<Utc>) -> TickDecision {
        let Some(session_at) = contact.session_at() else {
            return TickDecision::default();
        };
        if contact.step != Step::Confirmed || contact.is_converted() {
            return TickDecision::default();
        }

        let mut stages = anchored(&sales_stages(), session_at);
        if let Some(nine) = local_time(SALES_S3_TIME) {
            stages.push((MessageKind::SalesS3, next_day_at(self.policy.local_offset, session_at, nine)));
        }

        match latest_passed(&stages, now) {
            Some((kind, due_at)) if !kind.is_sent(&contact.sent) => {
                let template = match kind {
                    MessageKind::SalesS1 => TemplateId::SalesS1,
                    MessageKind::SalesShakeup => TemplateId::SalesShakeup,
                    MessageKind::SalesS2 => TemplateId::SalesS2,
                    _ => TemplateId::SalesS3,
                };
                TickDecision::send(contact, kind, template, due_at)
            }
            _ => TickDecision::default(),
        }
    }

    fn tree2(&self, contact: &Contact, now: DateTime<Utc>) -> TickDecision {
        let mut decision = TickDecision::default();

        if self.should_switch_to_tree2(contact, now) {
            let mut next = contact.clone();
            next.tree = TreeType::Tree2;
            next.tree2_entered_at = Some(now);
            next.last_updated = now;
            decision.effects.push(Effect::set_field("tree_type", TreeType::Tree2.as_str()));
            decision.update = Some(next);
        }

        let current = decision.update.as_ref().unwrap_or(contact);
        if current.tree != TreeType::Tree2 || current.booking.is_some() || current.is_converted() {
            return decision;
        }

        if let Some((kind, due_at)) = latest_passed(&anchored(&tree2_stages(), current.registered_at), now) {
            if !kind.is_sent(&current.sent) {
                let template =
                    if kind == MessageKind::Tree2First { TemplateId::Tree2First } else { TemplateId::Tree2Second };
                decision.effects.push(Effect::send(&current.id, kind, template, due_at));
            }
        }

        if let Some(entered_at) = current.tree2_entered_at {
            let offers = self.tree2_sales_stages(entered_at);
            if let Some((kind, due_at)) = latest_passed(&offers, now) {
                if !kind.is_sent(&current.sent) {
                    let template =
                        if kind == MessageKind::Tree2SalesS1 { TemplateId::Tree2SalesS1 } else { TemplateId::Tree2SalesS2 };
                    decision.effects.push(Effect::send(&current.id, kind, template, due_at));
                }
            }
        }
        decision
    }

    /// First Sunday 16:00 and first Monday 09:00 after the Tree2 switch, in
    /// the order they fall.
    fn tree2_sales_stages(&self, entered_at: DateTime<Utc>) -> Vec<(MessageKind, DateTime<Utc>)> {
        let mut stages: Vec<_> = TREE2_SALES_SLOTS
            .iter()
            .filter_map(|(kind, weekday, hm)| {
                let time = local_time(*hm)?;
                Some((*kind, next_weekly(self.policy.local_offset, *weekday, time, entered_at)))
            })
            .collect();
        stages.sort_by_key(|(_, at)| *at);
        stages
    }

    fn should_switch_to_tree2(&self, contact: &Contact, now: DateTime<Utc>) -> bool {
        contact.tree == TreeType::Tree1
            && contact.step.is_selecting()
            && contact.booking.is_none()
            && contact.tree2_entered_at.is_none()
            && now - contact.registered_at >= self.policy.tree2_grace
    }

    fn reinvite(&self, contact: &Contact, now: DateTime<Utc>) -> TickDecision {
        if !self.policy.reinvites_enabled || contact.is_converted() {
            return TickDecision::default();
        }
        if contact.reinvited_week.as_deref() == Some(iso_week_key(now).as_str()) {
            return TickDecision::default();
        }

        let template = match contact.attended {
            AttendedStatus::NoShow => TemplateId::ReinviteNoShow,
            AttendedStatus::Attended => TemplateId::ReinviteNoSales,
            AttendedStatus::Unknown => return TickDecision::default(),
        };
        TickDecision::send(contact, MessageKind::Reinvite, template, now)
    }

    /// Record attendance of a session that has already taken place.
    ///
    /// Returns the updated contact, or `None` when there is nothing to record:
    /// no booking, a session still ahead, or attendance already known.
    #[must_use]
    pub fn reconcile(&self, contact: &Contact, roster: &Roster, now: DateTime<Utc>) -> Option<Contact> {
        let session_at = contact.session_at()?;
        if session_at > now || contact.attended != AttendedStatus::Unknown {
            return None;
        }

        let mut next = contact.clone();
        next.attended = if roster.contains(contact) { AttendedStatus::Attended } else { AttendedStatus::NoShow };
        next.last_updated = now;
        Some(next)
    }
}

/// Stage offsets turned into instants from `anchor`.
fn anchored(stages: &[(MessageKind, Duration)], anchor: DateTime<Utc>) -> Vec<(MessageKind, DateTime<Utc>)> {
    stages.iter().map(|(kind, offset)| (*kind, anchor + *offset)).collect()
}

/// The last stage whose instant has passed, with that instant.
///
/// Stages are in firing order. Earlier stages are superseded by a later
/// passed one and never returned.
fn latest_passed(
    stages: &[(MessageKind, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> Option<(MessageKind, DateTime<Utc>)> {
    stages.iter().copied().filter(|(_, due_at)| *due_at <= now).last()
}

fn local_time((hour, minute): (u32, u32)) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, MemberStatus};
    use chrono::TimeZone;

    fn session() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 24, 8, 30, 0).unwrap()
    }

    fn confirmed() -> Contact {
        let mut contact = Contact::new("c1", None, session() - Duration::days(3));
        contact.book(Booking { timeslot: "SA".to_string(), session_at: session() }, session() - Duration::days(3));
        contact
    }

    fn sent_kinds(decision: &TickDecision) -> Vec<MessageKind> {
        decision
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(intent) => Some(intent.kind),
                Effect::SetField { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_earlier_reminder_is_superseded() {
        let scheduler = Scheduler::default();
        let now = session() - Duration::minutes(55);
        let decision = scheduler.decide(JobFamily::Reminders, &confirmed(), now);
        assert_eq!(sent_kinds(&decision), vec![MessageKind::Reminder60Min]);
    }

    #[test]
    fn test_reminder_outside_tolerance_is_skipped() {
        let scheduler = Scheduler::default();
        let now = session() - Duration::hours(11);
        assert!(scheduler.decide(JobFamily::Reminders, &confirmed(), now).is_empty());
    }

    #[test]
    fn test_sales_stay_due_until_sent() {
        let scheduler = Scheduler::default();
        let now = session() + Duration::hours(10);
        let decision = scheduler.decide(JobFamily::Sales, &confirmed(), now);
        assert_eq!(sent_kinds(&decision), vec![MessageKind::SalesS2]);
    }

    #[test]
    fn test_next_morning_offer_follows_local_calendar() {
        let scheduler = Scheduler::default();
        // Saturday 15:30 local; Sunday 09:00 local is 02:00 UTC
        let sunday_nine = Utc.with_ymd_and_hms(2026, 10, 25, 2, 0, 0).unwrap();
        assert_eq!(
            sent_kinds(&scheduler.decide(JobFamily::Sales, &confirmed(), sunday_nine - Duration::minutes(1))),
            vec![MessageKind::SalesS2]
        );
        assert_eq!(
            sent_kinds(&scheduler.decide(JobFamily::Sales, &confirmed(), sunday_nine)),
            vec![MessageKind::SalesS3]
        );
    }

    #[test]
    fn test_members_get_no_sales() {
        let scheduler = Scheduler::default();
        let mut contact = confirmed();
        contact.member = MemberStatus::Member;
        assert!(scheduler.decide(JobFamily::Sales, &contact, session() + Duration::minutes(6)).is_empty());

        let mut paid = confirmed();
        paid.payment_verified = true;
        assert!(scheduler.decide(JobFamily::Sales, &paid, session() + Duration::minutes(6)).is_empty());
    }

    #[test]
    fn test_family_names_parse() {
        for family in JobFamily::ALL {
            assert_eq!(family.as_str().parse::<JobFamily>().unwrap(), family);
        }
        assert!("hourly".parse::<JobFamily>().is_err());
    }
}
