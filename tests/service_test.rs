//! End-to-end tests for the journey service with in-memory capabilities

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::NamedTempFile;
use whatsapp_journey::attendance::CsvAttendance;
use whatsapp_journey::config::AppConfig;
use whatsapp_journey::conversation::TransitionOutcome;
use whatsapp_journey::dispatch::{Clock, FixedClock};
use whatsapp_journey::ledger::{Ledger, MemoryLedger};
use whatsapp_journey::messenger::{DryRunMessenger, Messenger};
use whatsapp_journey::models::{AttendedStatus, Booking, Contact, LeadSource, MemberStatus, MessageKind, Step};
use whatsapp_journey::scheduler::JobFamily;
use whatsapp_journey::service::JourneyService;

struct Harness {
    service: Arc<JourneyService>,
    ledger: Arc<MemoryLedger>,
    messenger: Arc<DryRunMessenger>,
    clock: Arc<FixedClock>,
}

/// Wednesday 14 October 2026, 10:00 in UTC+7
fn wednesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap()
}

fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let messenger = Arc::new(DryRunMessenger::new());
    let clock = Arc::new(FixedClock::new(wednesday()));
    let service = JourneyService::new(
        &AppConfig::default(),
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    Harness { service: Arc::new(service), ledger, messenger, clock }
}

impl Harness {
    async fn say(&self, contact_id: &str, text: &str) -> TransitionOutcome {
        let now = self.clock.now();
        self.service.on_inbound_message(contact_id, text, now).await.unwrap().outcome
    }

    async fn contact(&self, contact_id: &str) -> Contact {
        self.ledger.read_contact(contact_id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_booking_conversation_end_to_end() {
    let h = harness();
    h.messenger.seed_field("c1", "phone", "+6591234567").await;

    for text in ["Hi", "Sarah", "s", "B"] {
        assert_eq!(h.say("c1", text).await, TransitionOutcome::Advanced);
        h.clock.advance(Duration::minutes(1));
    }

    let contact = h.contact("c1").await;
    assert_eq!(contact.step, Step::Confirmed);
    assert_eq!(contact.chosen_timeslot(), Some("SB"));
    assert_eq!(contact.phone.as_deref(), Some("+6591234567"));
    assert_eq!(contact.lead_source, Some(LeadSource::FacebookAds));

    let sent = h.messenger.sent().await;
    assert_eq!(sent.len(), 4);
    assert!(sent[3].text.contains("Saturday 19:30–21:30 walk-in (UTC+7), 17 October 2026"));
    assert!(sent[3].text.contains("Sarah"));

    assert_eq!(h.messenger.get_field("c1", "first_name").await.unwrap().as_deref(), Some("Sarah"));
    assert_eq!(h.messenger.get_field("c1", "chosen_timeslot").await.unwrap().as_deref(), Some("SB"));
    assert_eq!(h.messenger.get_field("c1", "lead_source").await.unwrap().as_deref(), Some("facebook_ads"));
}

#[tokio::test]
async fn test_double_tick_sends_reminder_once() {
    let h = harness();
    for text in ["Hi", "Sarah", "S", "A"] {
        h.say("c1", text).await;
    }
    let session = h.contact("c1").await.session_at().unwrap();

    let tick = session - Duration::hours(12) + Duration::minutes(1);
    h.clock.set(tick);
    let first = h.service.on_tick(JobFamily::Reminders, tick).await.unwrap();
    let second = h.service.on_tick(JobFamily::Reminders, tick + Duration::minutes(5)).await.unwrap();

    assert_eq!(first.dispatch.delivered.len(), 1);
    assert_eq!(first.dispatch.delivered[0].kind, MessageKind::Reminder12h);
    assert!(second.dispatch.delivered.is_empty());
    assert!(h.contact("c1").await.sent.reminder_12h);
    assert_eq!(h.messenger.get_field("c1", "reminder_12h_sent").await.unwrap().as_deref(), Some("Yes"));
    assert_eq!(h.messenger.sent().await.len(), 5);
}

#[tokio::test]
async fn test_expired_window_drops_send_and_leaves_flag_unset() {
    let h = harness();
    for text in ["Hi", "Sarah", "S", "B"] {
        h.say("c1", text).await;
    }
    let session = h.contact("c1").await.session_at().unwrap();

    // Ads window is 72h from Wednesday 03:00; the sales message is due Saturday evening
    let tick = session + Duration::minutes(6);
    h.clock.set(tick);
    let report = h.service.on_tick(JobFamily::Sales, tick).await.unwrap();

    assert_eq!(report.dispatch.window_expired.len(), 1);
    assert!(report.dispatch.delivered.is_empty());
    assert!(!h.contact("c1").await.sent.sales_s1);

    // Reopening the window lets the still-due stage go out
    h.say("c1", "thanks!").await;
    let report = h.service.on_tick(JobFamily::Sales, tick + Duration::minutes(1)).await.unwrap();
    assert_eq!(report.dispatch.delivered.len(), 1);
    assert!(h.contact("c1").await.sent.sales_s1);
}

#[tokio::test]
async fn test_tree2_switch_is_persisted() {
    let h = harness();
    for text in ["Hi", "Sarah"] {
        h.say("c1", text).await;
    }

    let tick = wednesday() + Duration::hours(2);
    h.clock.set(tick);
    let report = h.service.on_tick(JobFamily::Tree2, tick).await.unwrap();
    assert_eq!(report.updated, 1);

    let contact = h.contact("c1").await;
    assert_eq!(contact.tree.as_str(), "Tree2");
    assert_eq!(contact.tree2_entered_at, Some(tick));
    assert_eq!(h.messenger.get_field("c1", "tree_type").await.unwrap().as_deref(), Some("Tree2"));
}

#[tokio::test]
async fn test_weekly_attendance_and_reinvite() {
    let mut roster = NamedTempFile::new().unwrap();
    writeln!(roster, "name,whatsapp_number").unwrap();
    writeln!(roster, "Sarah,+65 9123 4567").unwrap();
    roster.flush().unwrap();

    let ledger = Arc::new(MemoryLedger::new());
    let messenger = Arc::new(DryRunMessenger::new());
    let monday = Utc.with_ymd_and_hms(2026, 10, 19, 3, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(monday));
    let service = Arc::new(
        JourneyService::new(
            &AppConfig::default(),
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap()
        .with_attendance(Arc::new(CsvAttendance::new(roster.path()))),
    );

    let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 8, 30, 0).unwrap();
    for (id, phone) in [("came", "+6591234567"), ("missed", "+6598765432")] {
        let mut contact = Contact::new(id, Some(phone.to_string()), saturday - Duration::days(3));
        contact.lead_source = Some(LeadSource::FacebookAds);
        contact.book(Booking { timeslot: "SA".to_string(), session_at: saturday }, saturday - Duration::days(3));
        ledger.write_contact(&contact).await.unwrap();
    }

    let report = service.on_tick(JobFamily::WeeklyAttendance, monday).await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(ledger.read_contact("came").await.unwrap().unwrap().attended, AttendedStatus::Attended);
    assert_eq!(ledger.read_contact("missed").await.unwrap().unwrap().attended, AttendedStatus::NoShow);

    // The no-show replies on Thursday, reopening the window for Friday
    let thursday = monday + Duration::days(3);
    clock.set(thursday);
    service.on_inbound_message("missed", "sorry I missed it", thursday).await.unwrap();

    let friday = Utc.with_ymd_and_hms(2026, 10, 23, 7, 0, 0).unwrap();
    clock.set(friday);
    let first = service.on_tick(JobFamily::WeeklyReinvite, friday).await.unwrap();
    let again = service.on_tick(JobFamily::WeeklyReinvite, friday + Duration::hours(1)).await.unwrap();

    assert_eq!(first.dispatch.delivered.len(), 1);
    assert_eq!(first.dispatch.delivered[0].contact_id, "missed");
    // "came" has no open window
    assert_eq!(first.dispatch.window_expired.len(), 1);
    assert!(again.dispatch.delivered.is_empty());
    assert_eq!(ledger.read_contact("missed").await.unwrap().unwrap().step, Step::AwaitingDay);
}

#[tokio::test]
async fn test_missing_roster_skips_reconciliation() {
    let h = harness();
    let report = h.service.on_tick(JobFamily::WeeklyAttendance, wednesday()).await.unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn test_concurrent_inbound_messages_are_serialized() {
    let h = harness();
    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = Arc::clone(&h.service);
        tasks.push(tokio::spawn(async move {
            service.on_inbound_message(&format!("c{}", i % 4), "Hi", wednesday()).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let contacts = h.ledger.list_contacts().await.unwrap();
    assert_eq!(contacts.len(), 4);
    // Five messages each: the first asks for a name, the second gives one,
    // the rest are rejected day choices
    for contact in contacts {
        assert_eq!(contact.step, Step::AwaitingDay);
        assert_eq!(contact.first_name.as_deref(), Some("Hi"));
    }
    assert_eq!(h.messenger.sent().await.len(), 20);
    assert_eq!(h.service.contacts_in_flight(), 0);
}

#[tokio::test]
async fn test_empty_contact_id_is_rejected() {
    let h = harness();
    assert!(h.service.on_inbound_message("  ", "Hi", wednesday()).await.is_err());
}

#[tokio::test]
async fn test_new_member_is_welcomed_once() {
    let h = harness();
    for text in ["Hi", "Sarah", "S", "A"] {
        h.say("c1", text).await;
    }
    let before = h.messenger.sent().await.len();
    let at = wednesday() + Duration::hours(1);

    let update = h.service.record_member_status("c1", MemberStatus::Member, Some(true), at).await.unwrap();
    assert!(update.changed);
    assert_eq!(update.dispatch.delivered.len(), 1);
    assert_eq!(update.dispatch.delivered[0].kind, MessageKind::Welcome);

    let sent = h.messenger.sent().await;
    assert_eq!(sent.len(), before + 1);
    assert!(sent[before].text.contains("You're now a member"));
    assert_eq!(h.messenger.get_field("c1", "member_status").await.unwrap().as_deref(), Some("member"));

    let stored = h.contact("c1").await;
    assert_eq!(stored.member, MemberStatus::Member);
    assert!(stored.payment_verified);

    let repeat = h.service.record_member_status("c1", MemberStatus::Member, None, at).await.unwrap();
    assert!(!repeat.changed);
    assert!(repeat.dispatch.delivered.is_empty());
    assert_eq!(h.messenger.sent().await.len(), before + 1);
    assert_eq!(h.service.contacts_in_flight(), 0);
}

#[tokio::test]
async fn test_trial_gets_trial_welcome_and_stops_sales() {
    let h = harness();
    for text in ["Hi", "Sarah", "S", "A"] {
        h.say("c1", text).await;
    }
    let at = wednesday() + Duration::hours(2);
    let update = h.service.record_member_status("c1", MemberStatus::Trial, None, at).await.unwrap();
    assert!(update.changed);
    assert!(h.messenger.sent().await.last().unwrap().text.contains("trial"));
    assert!(!h.contact("c1").await.payment_verified);

    let session = h.contact("c1").await.session_at().unwrap();
    let tick = session + Duration::minutes(6);
    let report = h.service.on_tick(JobFamily::Sales, tick).await.unwrap();
    assert!(report.dispatch.delivered.is_empty());
    assert!(report.dispatch.window_expired.is_empty());
}

#[tokio::test]
async fn test_member_update_for_unknown_contact_fails() {
    let h = harness();
    let result = h.service.record_member_status("ghost", MemberStatus::Member, None, wednesday()).await;
    assert!(result.is_err());
    assert!(h.messenger.sent().await.is_empty());
    assert_eq!(h.service.contacts_in_flight(), 0);
}
