//! Messaging provider capability
//!
//! [`Messenger`] is everything the journey needs from the WhatsApp provider:
//! send a text, read a contact field, write a custom field. [`HttpMessenger`]
//! talks to a Respond.io-style REST API; [`DryRunMessenger`] only records.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{DeliveryError, JourneyError, Result};

/// Outbound capability of the messaging provider.
///
/// Every call is a single attempt; retrying is up to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message to a contact.
    async fn send(&self, contact_id: &str, text: &str) -> std::result::Result<(), DeliveryError>;

    /// Read a contact field (built-in like `phone`, or a custom field).
    async fn get_field(&self, contact_id: &str, field: &str) -> std::result::Result<Option<String>, DeliveryError>;

    /// Write a custom field.
    async fn set_field(&self, contact_id: &str, field: &str, value: &str) -> std::result::Result<(), DeliveryError>;
}

/// REST client for the provider API.
#[derive(Debug, Clone)]
pub struct HttpMessenger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMessenger {
    /// Create a client for `base_url`, authenticating with a bearer token.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| JourneyError::InvalidConfig(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| JourneyError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> std::result::Result<reqwest::Response, DeliveryError> {
        let status = response.status();
        debug!(status = %status, "provider response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("provider returned {status}: {body}");
        if is_transient_status(status) {
            Err(DeliveryError::Transient(message))
        } else {
            Err(DeliveryError::Permanent(message))
        }
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send(&self, contact_id: &str, text: &str) -> std::result::Result<(), DeliveryError> {
        let payload = json!({ "message": { "type": "text", "text": text } });
        let response = self
            .client
            .post(self.url(&format!("contact/{contact_id}/message")))
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(response).await.map(|_| ())
    }

    async fn get_field(&self, contact_id: &str, field: &str) -> std::result::Result<Option<String>, DeliveryError> {
        let response =
            self.client.get(self.url(&format!("contact/{contact_id}"))).send().await.map_err(request_error)?;
        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| DeliveryError::Permanent(format!("failed to parse contact: {e}")))?;
        Ok(field_value(&body, field))
    }

    async fn set_field(&self, contact_id: &str, field: &str, value: &str) -> std::result::Result<(), DeliveryError> {
        let payload = json!({ "custom_fields": [{ "name": field, "value": value }] });
        let response = self
            .client
            .put(self.url(&format!("contact/{contact_id}")))
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(response).await.map(|_| ())
    }
}

/// Timeouts, throttling and server-side failures are worth another attempt.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn request_error(e: reqwest::Error) -> DeliveryError {
    if e.is_builder() {
        DeliveryError::Permanent(format!("invalid request: {e}"))
    } else {
        DeliveryError::Transient(format!("HTTP request failed: {e}"))
    }
}

/// Top-level string or number field, else a `custom_fields` entry by name.
fn field_value(contact: &Value, field: &str) -> Option<String> {
    let as_text = |v: &Value| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };

    if let Some(value) = contact.get(field).and_then(as_text) {
        return Some(value);
    }
    contact
        .get("custom_fields")
        .and_then(Value::as_array)?
        .iter()
        .find(|f| f.get("name").and_then(Value::as_str) == Some(field))
        .and_then(|f| f.get("value"))
        .and_then(as_text)
}

/// A message recorded by [`DryRunMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    /// Recipient
    pub contact_id: String,
    /// Rendered text
    pub text: String,
}

/// Messages a [`DryRunMessenger`] keeps by default.
pub const DRY_RUN_HISTORY: usize = 1_000;

/// Messenger that logs and records instead of delivering.
///
/// Only the most recent messages are kept; older ones are discarded.
#[derive(Debug)]
pub struct DryRunMessenger {
    sent: Mutex<VecDeque<RecordedMessage>>,
    history: usize,
    fields: Mutex<HashMap<(String, String), String>>,
}

impl Default for DryRunMessenger {
    fn default() -> Self {
        Self::with_history(DRY_RUN_HISTORY)
    }
}

impl DryRunMessenger {
    /// Empty recorder keeping [`DRY_RUN_HISTORY`] messages
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty recorder keeping at most `history` messages
    #[must_use]
    pub fn with_history(history: usize) -> Self {
        Self { sent: Mutex::new(VecDeque::new()), history, fields: Mutex::new(HashMap::new()) }
    }

    /// Pre-populate a field, as if the provider already knew it.
    pub async fn seed_field(&self, contact_id: &str, field: &str, value: &str) {
        self.fields.lock().await.insert((contact_id.to_string(), field.to_string()), value.to_string());
    }

    /// Retained messages, oldest first.
    pub async fn sent(&self) -> Vec<RecordedMessage> {
        self.sent.lock().await.iter().cloned().collect()
    }

    /// Remove and return the retained messages, oldest first.
    pub async fn drain(&self) -> Vec<RecordedMessage> {
        self.sent.lock().await.drain(..).collect()
    }
}

#[async_trait]
impl Messenger for DryRunMessenger {
    async fn send(&self, contact_id: &str, text: &str) -> std::result::Result<(), DeliveryError> {
        info!(contact_id, chars = text.chars().count(), "dry run: message not delivered");
        let mut sent = self.sent.lock().await;
        if self.history == 0 {
            return Ok(());
        }
        if sent.len() == self.history {
            sent.pop_front();
        }
        sent.push_back(RecordedMessage { contact_id: contact_id.to_string(), text: text.to_string() });
        Ok(())
    }

    async fn get_field(&self, contact_id: &str, field: &str) -> std::result::Result<Option<String>, DeliveryError> {
        Ok(self.fields.lock().await.get(&(contact_id.to_string(), field.to_string())).cloned())
    }

    async fn set_field(&self, contact_id: &str, field: &str, value: &str) -> std::result::Result<(), DeliveryError> {
        debug!(contact_id, field, value, "dry run: field recorded");
        self.fields.lock().await.insert((contact_id.to_string(), field.to_string()), value.to_string());
        Ok(())
    }
}
