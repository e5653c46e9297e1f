//! Outbound message templates
//!
//! Templates are identified by [`TemplateId`] in decisions and only rendered to
//! text at dispatch time, from the contact as it is at that moment.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LinksConfig;
use crate::models::{Contact, Step};
use crate::timeslot::TimeslotCatalog;

/// Every message the journey can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateId {
    /// Ask for a first name, Facebook-Ads lead
    AskNameAds,
    /// Ask for a first name, website lead (shows this weekend's sessions)
    AskNameWebsite,
    /// The reply did not look like a name
    NameRetry,
    /// Preview link plus day choice
    DayChoice,
    /// Day input not recognized
    DayHelp,
    /// Time choice for the chosen day
    TimeChoice,
    /// Time input not recognized
    TimeHelp,
    /// Booking confirmed
    Confirmation,
    /// T-12h reminder for a contact who already confirmed with a thumbs-up
    Reminder12hThumbs,
    /// T-12h reminder asking for a thumbs-up
    Reminder12hNoThumbs,
    /// T-60min reminder with the join link
    Reminder60Min,
    /// T-10min reminder
    Reminder10Min,
    /// T+5min membership offer
    SalesS1,
    /// T+20min social proof
    SalesShakeup,
    /// T+2h trial or membership offer
    SalesS2,
    /// Next-morning offer
    SalesS3,
    /// First follow-up for a lead that never booked
    Tree2First,
    /// Second follow-up for a lead that never booked
    Tree2Second,
    /// Sunday membership offer for a lead that never booked
    Tree2SalesS1,
    /// Monday trial or membership offer for a lead that never booked
    Tree2SalesS2,
    /// Welcome for a new member
    WelcomeMember,
    /// Welcome for a new trial user
    WelcomeTrial,
    /// Weekly re-invite after a missed session
    ReinviteNoShow,
    /// Weekly re-invite after attending without joining
    ReinviteNoSales,
}

impl TemplateId {
    /// Stable identifier used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AskNameAds => "ask_name_ads",
            Self::AskNameWebsite => "ask_name_website",
            Self::NameRetry => "name_retry",
            Self::DayChoice => "day_choice",
            Self::DayHelp => "day_help",
            Self::TimeChoice => "time_choice",
            Self::TimeHelp => "time_help",
            Self::Confirmation => "confirmation",
            Self::Reminder12hThumbs => "reminder_12h_thumbs",
            Self::Reminder12hNoThumbs => "reminder_12h_no_thumbs",
            Self::Reminder60Min => "reminder_60min",
            Self::Reminder10Min => "reminder_10min",
            Self::SalesS1 => "sales_s1",
            Self::SalesShakeup => "sales_shakeup",
            Self::SalesS2 => "sales_s2",
            Self::SalesS3 => "sales_s3",
            Self::Tree2First => "tree2_first",
            Self::Tree2Second => "tree2_second",
            Self::Tree2SalesS1 => "tree2_sales_s1",
            Self::Tree2SalesS2 => "tree2_sales_s2",
            Self::WelcomeMember => "welcome_member",
            Self::WelcomeTrial => "welcome_trial",
            Self::ReinviteNoShow => "reinvite_no_show",
            Self::ReinviteNoSales => "reinvite_no_sales",
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders templates into message text.
#[derive(Debug, Clone)]
pub struct Renderer {
    links: LinksConfig,
    catalog: TimeslotCatalog,
}

impl Renderer {
    /// Create a renderer
    #[must_use]
    pub const fn new(links: LinksConfig, catalog: TimeslotCatalog) -> Self {
        Self { links, catalog }
    }

    /// Render `template` for `contact`.
    ///
    /// Missing personalization (name, pending day, booking) falls back to a
    /// generic phrase, so rendering never fails.
    #[must_use]
    pub fn render(&self, template: TemplateId, contact: &Contact) -> String {
        let name = contact.first_name.as_deref().unwrap_or("there");
        let host = &self.links.host_name;
        let links = &self.links;
        let days = self.catalog.day_options();
        let times = self.catalog.time_options();
        let tz = self.catalog.offset_label();

        match template {
            TemplateId::AskNameAds => format!(
                "Hi 🌸 I'm {host}! Lovely to connect with you. \
                 Can you share your first name? Then I'll send your Zoom link 🌈"
            ),
            TemplateId::AskNameWebsite => format!(
                "Hi 🌸 I'm {host}! Lovely to connect with you.\n\n\
                 These are our free Zoom preview sessions this weekend ({tz}):\n\
                 {}\n\n\
                 Please share your first name and I'll send your free Zoom preview link 🌈",
                self.all_sessions()
            ),
            TemplateId::NameRetry => {
                "Sorry, I didn't catch that 🌸 Could you reply with just your first name?".to_string()
            }
            TemplateId::DayChoice => format!(
                "Hey {name} 🌸\n\nHere is your Zoom link 🌈\n{}\n\n\
                 If Zoom is new for you, download it here:\n{}\n\n\
                 Which day suits you? Reply with one letter 👇\n{days}",
                links.preview_link, links.zoom_download_link
            ),
            TemplateId::DayHelp => format!("Please reply with one letter to pick a day 👇\n{days}"),
            TemplateId::TimeChoice => format!(
                "Lovely! Now pick a time on {} ({tz}) 👇\n{times}",
                self.pending_day_name(contact)
            ),
            TemplateId::TimeHelp => format!("Please reply with one letter to pick a time 👇\n{times}"),
            TemplateId::Confirmation => format!(
                "Hey {name} 💖\nGreat, you're on the list!\n🕒 Your chosen time:\n{} 🌈\n\n\
                 Reply 👍 to confirm, or CHANGE to pick another time.",
                self.session_label(contact)
            ),
            TemplateId::Reminder12hThumbs => format!(
                "Hello {name} 🌸\nJust a gentle reminder, your Zoom preview is coming soon ✨\n\n\
                 🕒 Your session starts at\n{}\n\nCan't wait to see you!\n{host}",
                self.session_label(contact)
            ),
            TemplateId::Reminder12hNoThumbs => format!(
                "Hello {name} 🌸\nYour Zoom preview is coming soon ✨\n\n\
                 🕒 Your session starts at\n{}\n\nReply 👍 so I know you're coming!\n{host}",
                self.session_label(contact)
            ),
            TemplateId::Reminder60Min => format!(
                "Hello {name} 🌸\n\nWe're gathering soon!\n🕒 Starts at {}\n\n\
                 Here's your join link 👇\n{}\n\n{host}",
                self.session_label(contact),
                links.preview_link
            ),
            TemplateId::Reminder10Min => format!(
                "Hi {name} 🌼\n\nWe start in 10 minutes!\nTap to join now\n{}\n\n{host}",
                links.preview_link
            ),
            TemplateId::SalesS1 => format!(
                "Hey {name} 🌸\n\nHow lovely that you joined our preview! 💫\n\n\
                 Explore our membership offer here 👇\n{}",
                links.membership_link
            ),
            TemplateId::SalesShakeup => format!(
                "Hey {name} 💫\n\nNew members joined us this week 💕\n\
                 Come join us and create more joy in your life 🌈\n{}",
                links.membership_link
            ),
            TemplateId::SalesS2 => format!(
                "Hi {name} 🌿\n\nNot sure yet? Try our fair trial:\n{}\n\n\
                 Or go for the full experience 💖\n{}",
                links.trial_link, links.membership_link
            ),
            TemplateId::SalesS3 => format!(
                "Hi {name} 🌞\nGood morning!\n\nStill thinking about yesterday's session? 💫\n\
                 Would you love to feel that joy more often in your week? 🌸\n\n\
                 Explore the membership here 👇\n{}\n\nOr try our fair trial:\n{}",
                links.membership_link, links.trial_link
            ),
            TemplateId::Tree2First => format!(
                "Hey {name} 🌸\nHere's your free Zoom link 🌈\n{}\n\n\
                 Which day fits you best? Reply with one letter 👇\n{days}\n\n\
                 All times in {tz} ⏰",
                links.preview_link
            ),
            TemplateId::Tree2Second => format!(
                "Hey {name} 🌸\nJust checking in, your free seat is still open 💫\n{}\n\n\
                 Reply with one letter to pick your day 👇\n{days}",
                links.preview_link
            ),
            TemplateId::Tree2SalesS1 => format!(
                "Hey {name}! 🌸\n\nIs inner joy your new goal? 💫\n\n\
                 Explore our membership offer 👇\n{}\n\nIt's also our secure payment page 🌈",
                links.membership_link
            ),
            TemplateId::Tree2SalesS2 => format!(
                "Hi {name} 🌿\n\nNot sure yet? Try our fair trial:\n{}\n\n\
                 Or go for the full experience 💖\n{}",
                links.trial_link, links.membership_link
            ),
            TemplateId::WelcomeMember => format!(
                "Congratulations, {name}! 🌸\n\nYou're now a member ✨\n\n\
                 This week's Zoom link:\n{}\n\nRecordings:\n{}\n\n\
                 💛 So happy to have you with us 💖\n{host}",
                links.member_zoom_link, links.recordings_link
            ),
            TemplateId::WelcomeTrial => format!(
                "Congratulations, {name}! 🌸\n\nYour fair trial is active ✨\n\n\
                 This week's Zoom link:\n{}\n\n💛 So happy you've joined\n{host}",
                links.member_zoom_link
            ),
            TemplateId::ReinviteNoShow | TemplateId::ReinviteNoSales => {
                let opener = if template == TemplateId::ReinviteNoShow {
                    "We missed you last time!"
                } else {
                    "It was lovely to have you with us!"
                };
                format!(
                    "Hello {name} 🌸\n{opener} I'd love to invite you again 💕\n\n\
                     Free Zoom preview link:\n{}\n\n\
                     Which day suits you? Reply with one letter 👇\n{days}\n\n\
                     Or start your membership 💖\n{}",
                    links.preview_link, links.membership_link
                )
            }
        }
    }

    fn all_sessions(&self) -> String {
        self.catalog
            .codes()
            .iter()
            .filter_map(|code| self.catalog.display(code).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn pending_day_name(&self, contact: &Contact) -> &str {
        match contact.step {
            Step::AwaitingTime { day } => self.catalog.day(day).map_or("your day", |d| d.name),
            _ => "your day",
        }
    }

    fn session_label(&self, contact: &Contact) -> String {
        contact.booking.as_ref().map_or_else(
            || "your chosen session".to_string(),
            |booking| match self.catalog.display(&booking.timeslot) {
                Ok(label) => format!("{label}, {}", self.catalog.local_date(booking.session_at)),
                Err(_) => booking.timeslot.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Booking;
    use chrono::{TimeZone, Utc};

    fn renderer() -> Renderer {
        Renderer::new(LinksConfig::default(), TimeslotCatalog::standard(7).unwrap())
    }

    #[test]
    fn test_confirmation_uses_catalog_display_and_local_date() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let mut contact = Contact::new("1", None, now);
        contact.first_name = Some("Sarah".to_string());
        // Saturday 24 Oct 2026 19:30 at UTC+7
        let session_at = Utc.with_ymd_and_hms(2026, 10, 24, 12, 30, 0).unwrap();
        contact.book(Booking { timeslot: "SB".to_string(), session_at }, now);

        let text = renderer().render(TemplateId::Confirmation, &contact);
        assert!(text.contains("Hey Sarah"));
        assert!(text.contains("Saturday 19:30–21:30 walk-in (UTC+7), 24 October 2026"));
    }

    #[test]
    fn test_tree2_follow_ups_differ() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let contact = Contact::new("1", None, now);
        let renderer = renderer();
        let first = renderer.render(TemplateId::Tree2First, &contact);
        let second = renderer.render(TemplateId::Tree2Second, &contact);
        assert_ne!(first, second);
        assert!(second.contains(&LinksConfig::default().preview_link));
    }

    #[test]
    fn test_time_choice_names_pending_day() {
        let now = Utc.with_ymd_and_hms(2026, 10, 14, 3, 0, 0).unwrap();
        let mut contact = Contact::new("1", None, now);
        contact.step = Step::AwaitingTime { day: 'U' };
        assert!(renderer().render(TemplateId::TimeChoice, &contact).contains("Sunday"));
    }
}
