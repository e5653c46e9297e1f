//! Session window policy
//!
//! The provider only accepts outbound messages while the contact's last inbound
//! message is recent enough. The allowed length depends on the lead source.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Contact, LeadSource};

/// Window lengths per lead source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    facebook_ads: Duration,
    website: Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::from_hours(72, 24)
    }
}

impl WindowPolicy {
    /// Policy with explicit window lengths.
    #[must_use]
    pub const fn new(facebook_ads: Duration, website: Duration) -> Self {
        Self { facebook_ads, website }
    }

    /// Policy from whole hours, the way it is configured.
    #[must_use]
    pub fn from_hours(facebook_ads: u32, website: u32) -> Self {
        Self::new(Duration::hours(i64::from(facebook_ads)), Duration::hours(i64::from(website)))
    }

    /// Window length for a lead source. An unknown source gets the shorter window.
    #[must_use]
    pub fn duration(&self, source: Option<LeadSource>) -> Duration {
        match source {
            Some(LeadSource::FacebookAds) => self.facebook_ads,
            Some(LeadSource::Website) => self.website,
            None => self.facebook_ads.min(self.website),
        }
    }

    /// Expiry of a window opened by a message at `last_inbound`.
    #[must_use]
    pub fn expires_at(&self, source: Option<LeadSource>, last_inbound: DateTime<Utc>) -> DateTime<Utc> {
        last_inbound + self.duration(source)
    }

    /// Record an inbound message: refresh the last-inbound time and the cached expiry.
    pub fn refresh(&self, contact: &mut Contact, received_at: DateTime<Utc>) {
        contact.last_inbound_at = Some(received_at);
        contact.window_expires_at = Some(self.expires_at(contact.lead_source, received_at));
    }

    /// Whether an outbound message may be sent right now.
    #[must_use]
    pub fn is_sendable(contact: &Contact, now: DateTime<Utc>) -> bool {
        contact.window_expires_at.is_some_and(|expires| now < expires)
    }
}
