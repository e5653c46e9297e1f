//! The journey service: the two entry points the outside world drives.
//!
//! [`JourneyService::on_inbound_message`] handles one message from a contact;
//! [`JourneyService::on_tick`] runs one job family over every contact. Both take
//! the contact's lock first, so at most one transition per contact is in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::attendance::AttendanceSource;
use crate::config::AppConfig;
use crate::conversation::{Conversation, Transition, TransitionOutcome};
use crate::dispatch::{Clock, DispatchReport, Dispatcher};
use crate::error::{JourneyError, Result};
use crate::ledger::Ledger;
use crate::logging::OperationTimer;
use crate::messenger::Messenger;
use crate::metrics::MetricsCollector;
use crate::models::{Contact, Effect, MemberStatus, MessageKind};
use crate::scheduler::{JobFamily, Scheduler};
use crate::templates::{Renderer, TemplateId};

/// Result of handling one inbound message.
#[derive(Debug, Clone)]
pub struct InboundResult {
    /// The contact as committed after dispatch
    pub contact: Contact,
    /// How the message was handled
    pub outcome: TransitionOutcome,
    /// What happened to the replies
    pub dispatch: DispatchReport,
}

/// Result of recording a membership status.
#[derive(Debug, Clone)]
pub struct MemberUpdate {
    /// The contact as committed after dispatch
    pub contact: Contact,
    /// Whether the status differed from the stored one
    pub changed: bool,
    /// What happened to the welcome message, if one was sent
    pub dispatch: DispatchReport,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Family that ran
    pub family: JobFamily,
    /// Contacts examined
    pub scanned: usize,
    /// Contacts whose state changed without a send (Tree2 switch, attendance)
    pub updated: usize,
    /// Sends performed for this tick
    pub dispatch: DispatchReport,
    /// Contacts whose round failed
    pub errors: usize,
}

impl TickReport {
    fn new(family: JobFamily) -> Self {
        Self { family, scanned: 0, updated: 0, dispatch: DispatchReport::default(), errors: 0 }
    }
}

/// Interval cadences for [`JourneyService::serve`].
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    /// Reminders and sales
    pub reminders: Duration,
    /// Tree2 switch and follow-ups
    pub tree2: Duration,
}

impl Cadence {
    /// Cadences from configuration
    #[must_use]
    pub const fn from_config(config: &AppConfig) -> Self {
        Self { reminders: config.reminder_cadence(), tree2: config.tree2_cadence() }
    }
}

/// Exclusive hold on one contact. Dropping it releases the lock and forgets
/// the contact's entry once nobody else holds or awaits it, so the lock map
/// only tracks contacts in flight.
struct ContactGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    contact_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ContactGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(&self.contact_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Ties the conversation, the scheduler and the dispatcher to the capabilities.
pub struct JourneyService {
    ledger: Arc<dyn Ledger>,
    messenger: Arc<dyn Messenger>,
    attendance: Option<Arc<dyn AttendanceSource>>,
    conversation: Conversation,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    locks: DashMap<String, Arc<Mutex<()>>>,
    workers: usize,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for JourneyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyService")
            .field("workers", &self.workers)
            .field("locked_contacts", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl JourneyService {
    /// Build the service from configuration and its capabilities.
    pub fn new(
        config: &AppConfig,
        ledger: Arc<dyn Ledger>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let catalog = config.catalog()?;
        let conversation = Conversation::new(catalog.clone(), config.grammar()?, config.window_policy());
        let renderer = Renderer::new(config.links.clone(), catalog);
        let dispatcher = Dispatcher::new(
            Arc::clone(&messenger),
            Arc::clone(&ledger),
            renderer,
            config.retry_policy(),
            clock,
        );

        Ok(Self {
            ledger,
            messenger,
            attendance: None,
            conversation,
            scheduler: Scheduler::new(config.scheduler_policy()?),
            dispatcher,
            locks: DashMap::new(),
            workers: config.scheduler.workers.max(1),
            metrics: MetricsCollector::default(),
        })
    }

    /// Use `source` for the Monday attendance batch.
    #[must_use]
    pub fn with_attendance(mut self, source: Arc<dyn AttendanceSource>) -> Self {
        self.attendance = Some(source);
        self
    }

    /// The clock sends are checked against
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.dispatcher.clock()
    }

    /// The ledger behind the service
    #[must_use]
    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    /// Contacts whose lock is currently held or awaited
    #[must_use]
    pub fn contacts_in_flight(&self) -> usize {
        self.locks.len()
    }

    async fn lock_contact(&self, contact_id: &str) -> ContactGuard<'_> {
        let lock = Arc::clone(self.locks.entry(contact_id.to_string()).or_default().value());
        let guard = lock.lock_owned().await;
        ContactGuard { locks: &self.locks, contact_id: contact_id.to_string(), guard: Some(guard) }
    }

    /// Handle one inbound message.
    ///
    /// An unknown contact is created in `New` first. The transitioned state is
    /// committed before any reply goes out.
    pub async fn on_inbound_message(&self, contact_id: &str, text: &str, received_at: DateTime<Utc>) -> Result<InboundResult> {
        let contact_id = contact_id.trim();
        if contact_id.is_empty() {
            return Err(JourneyError::InvalidRecord("inbound message without contact id".to_string()));
        }

        let _guard = self.lock_contact(contact_id).await;

        let contact = match self.ledger.read_contact(contact_id).await? {
            Some(contact) => contact,
            None => {
                let phone = self.lookup_phone(contact_id).await;
                info!(contact_id, "New contact");
                Contact::new(contact_id, phone, received_at)
            }
        };

        let Transition { contact, effects, outcome } = self.conversation.transition(&contact, text, received_at);
        debug!(contact_id, step = %contact.step, outcome = outcome.as_str(), "Transition applied");
        self.ledger.write_contact(&contact).await?;

        let (contact, dispatch) = self.dispatcher.dispatch(contact, effects).await.inspect_err(|_| {
            self.metrics.record_error("ledger", "inbound");
        })?;
        self.metrics.record_transition(outcome.as_str());

        Ok(InboundResult { contact, outcome, dispatch })
    }

    /// Record an externally verified membership status.
    ///
    /// A change to trial or member sends the matching welcome, subject to the
    /// session window like any other send. Recording the same status again
    /// only updates `payment_verified`.
    pub async fn record_member_status(
        &self,
        contact_id: &str,
        status: MemberStatus,
        payment_verified: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<MemberUpdate> {
        let contact_id = contact_id.trim();
        let _guard = self.lock_contact(contact_id).await;

        let mut contact = self
            .ledger
            .read_contact(contact_id)
            .await?
            .ok_or_else(|| JourneyError::ContactNotFound(contact_id.to_string()))?;

        let changed = contact.record_member_status(status, payment_verified, now);
        self.ledger.write_contact(&contact).await?;
        info!(contact_id, status = status.as_str(), changed, paid = contact.payment_verified, "Member status recorded");

        let mut effects = vec![Effect::set_field("member_status", status.as_str())];
        let welcome = match status {
            MemberStatus::Member => Some(TemplateId::WelcomeMember),
            MemberStatus::Trial => Some(TemplateId::WelcomeTrial),
            MemberStatus::Prospect => None,
        };
        if let Some(template) = welcome.filter(|_| changed) {
            effects.push(Effect::send(contact_id, MessageKind::Welcome, template, now));
        }

        let (contact, dispatch) = self.dispatcher.dispatch(contact, effects).await?;
        if changed {
            self.metrics.record_member_update(status.as_str());
        }
        Ok(MemberUpdate { contact, changed, dispatch })
    }

    /// Best effort; a provider failure only means the phone is unknown for now.
    async fn lookup_phone(&self, contact_id: &str) -> Option<String> {
        match self.messenger.get_field(contact_id, "phone").await {
            Ok(phone) => phone,
            Err(e) => {
                warn!(contact_id, error = %e, "Could not read phone for new contact");
                None
            }
        }
    }

    /// Run one job family over every contact as of `now`.
    ///
    /// Contacts are processed concurrently, bounded by the worker count. A
    /// failing contact is logged and counted; the others still run.
    pub async fn on_tick(self: &Arc<Self>, family: JobFamily, now: DateTime<Utc>) -> Result<TickReport> {
        let timer = OperationTimer::new(&format!("tick {family}"));

        let report = if family == JobFamily::WeeklyAttendance {
            self.reconcile_attendance(now).await?
        } else {
            self.run_family(family, now).await?
        };

        let elapsed = timer.finish();
        self.metrics.record_tick(family.as_str(), report.scanned, elapsed);
        info!(
            family = %family,
            scanned = report.scanned,
            updated = report.updated,
            delivered = report.dispatch.delivered.len(),
            window_expired = report.dispatch.window_expired.len(),
            failed = report.dispatch.failed.len(),
            errors = report.errors,
            "Tick completed"
        );
        Ok(report)
    }

    async fn run_family(self: &Arc<Self>, family: JobFamily, now: DateTime<Utc>) -> Result<TickReport> {
        let contacts = self.ledger.list_contacts().await?;
        let mut report = TickReport::new(family);
        report.scanned = contacts.len();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for contact in contacts {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| JourneyError::Other(format!("worker pool closed: {e}")))?;
            let service = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let result = service.tick_contact(family, &contact.id, now).await;
                (contact.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some((updated, dispatch))))) => {
                    report.updated += usize::from(updated);
                    report.dispatch.merge(dispatch);
                }
                Ok((_, Ok(None))) => {}
                Ok((contact_id, Err(e))) => {
                    error!(contact_id = %contact_id, family = %family, error = %e, "Contact tick failed");
                    self.metrics.record_error("tick", family.as_str());
                    report.errors += 1;
                }
                Err(e) => {
                    error!(family = %family, error = %e, "Tick worker panicked");
                    self.metrics.record_error("tick", family.as_str());
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Decide and dispatch for one contact. Re-reads the contact under its lock
    /// so a concurrent inbound message is never overwritten with stale state.
    async fn tick_contact(
        &self,
        family: JobFamily,
        contact_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(bool, DispatchReport)>> {
        let _guard = self.lock_contact(contact_id).await;

        let Some(contact) = self.ledger.read_contact(contact_id).await? else {
            return Ok(None);
        };

        let decision = self.scheduler.decide(family, &contact, now);
        if decision.is_empty() {
            return Ok(None);
        }

        let updated = decision.update.is_some();
        let contact = match decision.update {
            Some(next) => {
                info!(contact_id, family = %family, tree = next.tree.as_str(), "Contact state updated by tick");
                self.ledger.write_contact(&next).await?;
                next
            }
            None => contact,
        };

        let (_, dispatch) = self.dispatcher.dispatch(contact, decision.effects).await?;
        Ok(Some((updated, dispatch)))
    }

    /// Monday batch: mark past bookings attended or no-show from the roster.
    async fn reconcile_attendance(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::new(JobFamily::WeeklyAttendance);
        let Some(source) = &self.attendance else {
            warn!("No attendance source configured, skipping reconciliation");
            return Ok(report);
        };
        let Some(roster) = source.roster().await? else {
            warn!("No attendance roster this week, skipping reconciliation");
            return Ok(report);
        };
        info!(entries = roster.len(), "Reconciling attendance");

        let contacts = self.ledger.list_contacts().await?;
        report.scanned = contacts.len();
        for contact in contacts {
            let _guard = self.lock_contact(&contact.id).await;

            let Some(current) = self.ledger.read_contact(&contact.id).await? else {
                continue;
            };
            if let Some(next) = self.scheduler.reconcile(&current, &roster, now) {
                debug!(contact_id = %next.id, attended = next.attended.as_str(), "Attendance recorded");
                match self.ledger.write_contact(&next).await {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        error!(contact_id = %next.id, error = %e, "Failed to record attendance");
                        self.metrics.record_error("ledger", "attendance");
                        report.errors += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Drive every family from timers until `shutdown` resolves.
    ///
    /// Shutdown is only observed between ticks; a tick that has started runs to
    /// completion.
    pub async fn serve(self: Arc<Self>, cadence: Cadence, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let clock = self.clock();
        let mut reminders = tokio::time::interval(cadence.reminders);
        reminders.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tree2 = tokio::time::interval(cadence.tree2);
        tree2.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut weekly: Vec<(JobFamily, DateTime<Utc>)> = JobFamily::ALL
            .iter()
            .filter_map(|family| {
                let (weekday, time) = family.weekly_instant()?;
                Some((*family, self.conversation.catalog().next_occurrence(weekday, time, clock.now())))
            })
            .collect();
        for (family, at) in &weekly {
            info!(family = %family, next_run = %at, "Weekly job scheduled");
        }

        tokio::pin!(shutdown);
        info!(
            reminder_cadence_secs = cadence.reminders.as_secs(),
            tree2_cadence_secs = cadence.tree2.as_secs(),
            "Scheduler started"
        );

        loop {
            let next_weekly = weekly.iter().min_by_key(|(_, at)| *at).copied();
            let until_weekly = next_weekly
                .and_then(|(_, at)| (at - clock.now()).to_std().ok())
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, scheduler stopping");
                    break;
                }
                _ = reminders.tick() => {
                    self.run_logged(JobFamily::Reminders).await;
                    self.run_logged(JobFamily::Sales).await;
                }
                _ = tree2.tick() => {
                    self.run_logged(JobFamily::Tree2).await;
                }
                () = tokio::time::sleep(until_weekly), if next_weekly.is_some() => {
                    if let Some((family, _)) = next_weekly {
                        self.run_logged(family).await;
                        if let Some((weekday, time)) = family.weekly_instant() {
                            let next = self.conversation.catalog().next_occurrence(weekday, time, clock.now());
                            if let Some(entry) = weekly.iter_mut().find(|(f, _)| *f == family) {
                                entry.1 = next;
                            }
                            info!(family = %family, next_run = %next, "Weekly job rescheduled");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn run_logged(self: &Arc<Self>, family: JobFamily) {
        let now = self.clock().now();
        if let Err(e) = self.on_tick(family, now).await {
            error!(family = %family, error = %e, "Tick failed");
            self.metrics.record_error("tick", family.as_str());
        }
    }
}
