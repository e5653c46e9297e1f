//! WhatsApp Journey - booking conversation and message scheduling
//!
//! A Rust library that walks WhatsApp leads through booking a preview session
//! and sends the time-driven messages that follow, inside the provider's
//! customer-service window.
//!
//! # Features
//!
//! - Per-contact conversation state machine (name, day, time, confirmation)
//! - Idempotent reminder, sales, Tree2 and weekly re-invite scheduling
//! - Session-window checks before every send, bounded retries with timeouts
//! - SQLite contact ledger with CSV/JSON export
//! - Layered configuration and structured logging

/// Weekly attendance roster
pub mod attendance;
/// Configuration management
pub mod config;
/// Inbound message handling
pub mod conversation;
/// Effect execution against the provider and the ledger
pub mod dispatch;
/// Error types
pub mod error;
/// Contact export for dashboards
pub mod export;
/// Contact persistence
pub mod ledger;
/// Logging setup and utilities
pub mod logging;
/// Messaging provider clients
pub mod messenger;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Time-driven message decisions
pub mod scheduler;
/// Service entry points
pub mod service;
/// Outbound message templates
pub mod templates;
/// Bookable session catalog
pub mod timeslot;
/// Input validation and grammar
pub mod validation;
/// Customer-service window policy
pub mod window;

// Re-export key components for easier access
pub use config::AppConfig;
pub use conversation::{Conversation, Transition, TransitionOutcome};
pub use dispatch::{Clock, Dispatcher, FixedClock, SystemClock};
pub use error::{DeliveryError, JourneyError, Result};
pub use ledger::{Ledger, MemoryLedger, SqliteLedger};
pub use messenger::{DryRunMessenger, HttpMessenger, Messenger};
pub use models::{Contact, Effect, LeadSource, MessageKind, Step, TreeType};
pub use scheduler::{JobFamily, Scheduler};
pub use service::JourneyService;
pub use timeslot::TimeslotCatalog;
pub use window::WindowPolicy;
