//! Conversation state machine
//!
//! [`Conversation::transition`] is a pure function of the current contact and
//! one inbound message. It never performs I/O: outbound messages and provider
//! field updates come back as [`Effect`]s for the dispatcher.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Booking, Contact, Effect, LeadSource, MessageKind, Step};
use crate::templates::TemplateId;
use crate::timeslot::TimeslotCatalog;
use crate::validation::{InputGrammar, InputValidator};
use crate::window::WindowPolicy;

/// How an inbound message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Moved to the next step
    Advanced,
    /// Input did not match the step's grammar; a retry prompt was emitted
    Rejected,
    /// Nothing to do beyond refreshing the window
    Acknowledged,
    /// A confirmed contact picked a different timeslot
    Rebooked,
    /// A confirmed contact asked to pick a new day
    RebookRequested,
    /// Thumbs-up recorded
    ThumbsUp,
}

impl TransitionOutcome {
    /// Stable name used in logs and metrics labels
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Advanced => "advanced",
            Self::Rejected => "rejected",
            Self::Acknowledged => "acknowledged",
            Self::Rebooked => "rebooked",
            Self::RebookRequested => "rebook_requested",
            Self::ThumbsUp => "thumbs_up",
        }
    }
}

/// Result of one transition.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Contact after the message; always differs from the input by at least the window refresh
    pub contact: Contact,
    /// Effects to perform, in order
    pub effects: Vec<Effect>,
    /// What happened
    pub outcome: TransitionOutcome,
}

/// The per-contact booking conversation.
#[derive(Debug, Clone)]
pub struct Conversation {
    catalog: TimeslotCatalog,
    grammar: InputGrammar,
    window: WindowPolicy,
}

impl Conversation {
    /// Create the state machine
    #[must_use]
    pub const fn new(catalog: TimeslotCatalog, grammar: InputGrammar, window: WindowPolicy) -> Self {
        Self { catalog, grammar, window }
    }

    /// Booking catalog
    #[must_use]
    pub const fn catalog(&self) -> &TimeslotCatalog {
        &self.catalog
    }

    /// Apply one inbound message to `contact`.
    ///
    /// The lead source is locked on the first message and the session window is
    /// refreshed before any reply is decided, so replies always see the window
    /// this message opened.
    #[must_use]
    pub fn transition(&self, contact: &Contact, text: &str, received_at: DateTime<Utc>) -> Transition {
        let text = InputValidator::sanitize_text(text);
        let mut next = contact.clone();
        let mut effects = Vec::new();

        if next.lead_source.is_none() {
            let source = if self.grammar.is_website_trigger(&text) {
                LeadSource::Website
            } else {
                LeadSource::FacebookAds
            };
            next.lead_source = Some(source);
            effects.push(Effect::set_field("lead_source", source.as_str()));
        }
        self.window.refresh(&mut next, received_at);
        next.last_updated = received_at;

        let reply = |effects: &mut Vec<Effect>, template| {
            effects.push(Effect::send(&contact.id, MessageKind::Reply, template, received_at));
        };

        let outcome = match next.step {
            Step::New => {
                next.step = Step::AwaitingName;
                let template = match next.lead_source {
                    Some(LeadSource::Website) => TemplateId::AskNameWebsite,
                    _ => TemplateId::AskNameAds,
                };
                reply(&mut effects, template);
                TransitionOutcome::Advanced
            }
            Step::AwaitingName => match InputValidator::extract_first_name(&text) {
                Some(name) => {
                    effects.push(Effect::set_field("first_name", name.as_str()));
                    next.first_name = Some(name);
                    next.step = Step::AwaitingDay;
                    reply(&mut effects, TemplateId::DayChoice);
                    TransitionOutcome::Advanced
                }
                None => {
                    reply(&mut effects, TemplateId::NameRetry);
                    TransitionOutcome::Rejected
                }
            },
            Step::AwaitingDay => {
                match self.grammar.single_code(&text).and_then(|c| self.catalog.day(c)) {
                    Some(day) => {
                        next.step = Step::AwaitingTime { day: day.code };
                        reply(&mut effects, TemplateId::TimeChoice);
                        TransitionOutcome::Advanced
                    }
                    None => {
                        reply(&mut effects, TemplateId::DayHelp);
                        TransitionOutcome::Rejected
                    }
                }
            }
            Step::AwaitingTime { day } => {
                let code = self
                    .grammar
                    .single_code(&text)
                    .and_then(|c| self.catalog.time(c))
                    .map(|time| format!("{day}{}", time.code));

                match code.and_then(|code| self.book(&mut next, &code, received_at)) {
                    Some(booked) => {
                        effects.push(Effect::set_field("chosen_timeslot", booked));
                        reply(&mut effects, TemplateId::Confirmation);
                        TransitionOutcome::Advanced
                    }
                    None => {
                        reply(&mut effects, TemplateId::TimeHelp);
                        TransitionOutcome::Rejected
                    }
                }
            }
            Step::Confirmed => self.confirmed(&mut next, &text, received_at, &mut effects),
        };

        if outcome == TransitionOutcome::Rejected {
            debug!(contact_id = %contact.id, step = %contact.step, "Inbound text did not match step grammar");
        }

        Transition { contact: next, effects, outcome }
    }

    fn confirmed(
        &self,
        next: &mut Contact,
        text: &str,
        received_at: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) -> TransitionOutcome {
        if self.grammar.is_thumbs_up(text) {
            if !next.thumbs_up {
                next.thumbs_up = true;
                effects.push(Effect::set_field("thumbs_up", "Yes"));
            }
            return TransitionOutcome::ThumbsUp;
        }

        if self.grammar.is_rebook_request(text) {
            // The old booking stays until a new one replaces it
            next.step = Step::AwaitingDay;
            effects.push(Effect::send(&next.id, MessageKind::Reply, TemplateId::DayChoice, received_at));
            return TransitionOutcome::RebookRequested;
        }

        let new_code = self
            .grammar
            .compound_code(text)
            .filter(|code| self.catalog.lookup(code).is_some())
            .filter(|code| next.chosen_timeslot() != Some(code.as_str()));

        match new_code.and_then(|code| self.book(next, &code, received_at)) {
            Some(booked) => {
                effects.push(Effect::set_field("chosen_timeslot", booked));
                effects.push(Effect::send(&next.id, MessageKind::Reply, TemplateId::Confirmation, received_at));
                TransitionOutcome::Rebooked
            }
            None => TransitionOutcome::Acknowledged,
        }
    }

    /// Resolve `code` and store it as the contact's booking. Returns the code on success.
    fn book(&self, contact: &mut Contact, code: &str, now: DateTime<Utc>) -> Option<String> {
        let session_at = self.catalog.resolve(code, now).ok()?;
        contact.book(Booking { timeslot: code.to_string(), session_at }, now);
        Some(code.to_string())
    }
}
