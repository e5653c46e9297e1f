//! Dispatch adapter
//!
//! Performs the effects a decision produced. Each send is checked against the
//! session window right before it goes out, retried on transient failure, and
//! committed to the ledger only once the provider accepted it.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::error::{DeliveryError, Result};
use crate::ledger::Ledger;
use crate::messenger::Messenger;
use crate::metrics::MetricsCollector;
use crate::models::{Contact, Effect, MessageKind, ScheduledIntent};
use crate::templates::Renderer;
use crate::window::WindowPolicy;

/// Source of "now".
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock stopped at `now`
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self { now: RwLock::new(now) }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Bounds for talking to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per send, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles after each further failure
    pub base_backoff: Duration,
    /// Upper bound for a single provider call
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_backoff: Duration::from_millis(500), timeout: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(2)));
        let jitter_ms = u64::try_from(self.base_backoff.as_millis() / 2).unwrap_or(0);
        let jitter = if jitter_ms > 0 { rand::thread_rng().gen_range(0..=jitter_ms) } else { 0 };
        base + Duration::from_millis(jitter)
    }
}

/// What happened to one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the provider and committed
    Delivered {
        /// Attempts used
        attempts: u32,
    },
    /// Session window closed; dropped without retry, flag left unset
    WindowExpired,
    /// Every attempt failed transiently
    TransientExhausted {
        /// Attempts used
        attempts: u32,
        /// Last failure
        error: String,
    },
    /// The provider refused the message
    PermanentFailure {
        /// Provider error
        error: String,
    },
}

impl SendOutcome {
    /// Stable name used in logs and metrics labels
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::WindowExpired => "window_expired",
            Self::TransientExhausted { .. } => "transient_exhausted",
            Self::PermanentFailure { .. } => "permanent_failure",
        }
    }
}

/// A send that failed and needs operator attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    /// Recipient
    pub contact_id: String,
    /// Message kind
    pub kind: MessageKind,
    /// How it failed
    pub outcome: SendOutcome,
}

/// Summary of one dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sends the provider accepted
    pub delivered: Vec<ScheduledIntent>,
    /// Sends dropped because the window was closed
    pub window_expired: Vec<ScheduledIntent>,
    /// Sends that failed after retrying, or permanently
    pub failed: Vec<FailedSend>,
    /// Provider field updates that failed
    pub field_errors: usize,
}

impl DispatchReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered.extend(other.delivered);
        self.window_expired.extend(other.window_expired);
        self.failed.extend(other.failed);
        self.field_errors += other.field_errors;
    }
}

/// Executes effects against the messenger and the ledger.
#[derive(Clone)]
pub struct Dispatcher {
    messenger: Arc<dyn Messenger>,
    ledger: Arc<dyn Ledger>,
    renderer: Renderer,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("retry", &self.retry).field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(
        messenger: Arc<dyn Messenger>,
        ledger: Arc<dyn Ledger>,
        renderer: Renderer,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { messenger, ledger, renderer, retry, clock, metrics: MetricsCollector::default() }
    }

    /// The clock used for window checks
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Perform `effects` for `contact`, in order.
    ///
    /// Sends are independent: one failing does not stop the next. Each
    /// delivered send is committed to the ledger before the next effect runs.
    /// Only a ledger failure aborts the round. Returns the contact as last
    /// committed.
    pub async fn dispatch(&self, mut contact: Contact, effects: Vec<Effect>) -> Result<(Contact, DispatchReport)> {
        let mut report = DispatchReport::default();

        for effect in effects {
            match effect {
                Effect::Send(intent) => {
                    let outcome = self.send(&contact, &intent).await;
                    let attempts = match &outcome {
                        SendOutcome::Delivered { attempts } | SendOutcome::TransientExhausted { attempts, .. } => {
                            *attempts
                        }
                        _ => 0,
                    };
                    self.metrics.record_send(intent.kind.as_str(), outcome.as_str(), attempts);

                    match outcome {
                        SendOutcome::Delivered { .. } => {
                            if intent.kind != MessageKind::Reply {
                                contact.record_delivery(intent.kind, self.clock.now());
                                self.ledger.write_contact(&contact).await?;
                                if let Some(field) = intent.kind.flag_field() {
                                    report.field_errors += usize::from(!self.set_field(&contact.id, field, "Yes").await);
                                }
                            }
                            report.delivered.push(intent);
                        }
                        SendOutcome::WindowExpired => report.window_expired.push(intent),
                        failed => report.failed.push(FailedSend {
                            contact_id: intent.contact_id,
                            kind: intent.kind,
                            outcome: failed,
                        }),
                    }
                }
                Effect::SetField { field, value } => {
                    report.field_errors += usize::from(!self.set_field(&contact.id, field, &value).await);
                }
            }
        }

        Ok((contact, report))
    }

    async fn send(&self, contact: &Contact, intent: &ScheduledIntent) -> SendOutcome {
        let now = self.clock.now();
        if !WindowPolicy::is_sendable(contact, now) {
            warn!(
                contact_id = %contact.id,
                kind = %intent.kind,
                window_expires_at = ?contact.window_expires_at,
                "Session window closed, message dropped"
            );
            return SendOutcome::WindowExpired;
        }

        let text = self.renderer.render(intent.template, contact);
        let outcome = self.send_with_retry(&contact.id, &text).await;
        match &outcome {
            SendOutcome::Delivered { attempts } => {
                info!(contact_id = %contact.id, kind = %intent.kind, template = %intent.template, attempts, "Message sent");
            }
            SendOutcome::TransientExhausted { attempts, error } => {
                error!(contact_id = %contact.id, kind = %intent.kind, attempts, error = %error, "Giving up after transient failures");
            }
            SendOutcome::PermanentFailure { error } => {
                error!(contact_id = %contact.id, kind = %intent.kind, error = %error, "Provider rejected message");
            }
            SendOutcome::WindowExpired => {}
        }
        outcome
    }

    /// The window was checked once before the first attempt and is not
    /// re-checked between retries.
    async fn send_with_retry(&self, contact_id: &str, text: &str) -> SendOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.retry.backoff(attempt);
                warn!(contact_id, attempt, backoff = ?backoff, error = %last_error, "Retrying send after transient error");
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(self.retry.timeout, self.messenger.send(contact_id, text)).await {
                Ok(Ok(())) => return SendOutcome::Delivered { attempts: attempt },
                Ok(Err(DeliveryError::Permanent(error))) => return SendOutcome::PermanentFailure { error },
                Ok(Err(DeliveryError::Transient(error))) => last_error = error,
                Err(_) => last_error = format!("timed out after {:?}", self.retry.timeout),
            }
        }

        SendOutcome::TransientExhausted { attempts: max_attempts, error: last_error }
    }

    /// Best effort; returns whether the provider accepted the update.
    async fn set_field(&self, contact_id: &str, field: &str, value: &str) -> bool {
        let result = tokio::time::timeout(self.retry.timeout, self.messenger.set_field(contact_id, field, value)).await;
        let ok = match result {
            Ok(Ok(())) => {
                debug!(contact_id, field, "Field mirrored");
                true
            }
            Ok(Err(e)) => {
                warn!(contact_id, field, error = %e, "Field update failed");
                false
            }
            Err(_) => {
                warn!(contact_id, field, "Field update timed out");
                false
            }
        };
        self.metrics.record_field_update(ok);
        ok
    }
}
