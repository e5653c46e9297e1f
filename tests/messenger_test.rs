//! Integration tests for the HTTP messenger against a mock provider

use std::time::Duration;

use serde_json::json;
use whatsapp_journey::error::DeliveryError;
use whatsapp_journey::messenger::{HttpMessenger, Messenger};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpMessenger {
    HttpMessenger::new(&server.uri(), "secret-key", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_send_posts_text_message_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contact/42/message"))
        .and(header("authorization", "Bearer secret-key"))
        .and(body_partial_json(json!({ "message": { "type": "text", "text": "Hello Sarah" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).send("42", "Hello Sarah").await.unwrap();
}

#[tokio::test]
async fn test_server_errors_and_throttling_are_transient() {
    for status in [429, 500, 503] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contact/42/message"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = client(&server).send("42", "hi").await.unwrap_err();
        assert!(err.is_transient(), "status {status} gave {err:?}");
    }
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contact/42/message"))
        .respond_with(ResponseTemplate::new(400).set_body_string("outside 24 hour window"))
        .mount(&server)
        .await;

    let err = client(&server).send("42", "hi").await.unwrap_err();
    assert!(matches!(err, DeliveryError::Permanent(ref message) if message.contains("outside 24 hour window")));
}

#[tokio::test]
async fn test_unreachable_provider_is_transient() {
    let messenger = HttpMessenger::new("http://127.0.0.1:9", "k", Duration::from_millis(500)).unwrap();
    let err = messenger.send("42", "hi").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_get_field_reads_builtin_and_custom_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contact/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "phone": "+6591234567",
            "custom_fields": [{ "name": "chosen_timeslot", "value": "SA" }]
        })))
        .mount(&server)
        .await;

    let messenger = client(&server);
    assert_eq!(messenger.get_field("42", "phone").await.unwrap().as_deref(), Some("+6591234567"));
    assert_eq!(messenger.get_field("42", "chosen_timeslot").await.unwrap().as_deref(), Some("SA"));
    assert_eq!(messenger.get_field("42", "first_name").await.unwrap(), None);
}

#[tokio::test]
async fn test_set_field_puts_custom_field() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/contact/42"))
        .and(body_partial_json(json!({ "custom_fields": [{ "name": "thumbs_up", "value": "Yes" }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).set_field("42", "thumbs_up", "Yes").await.unwrap();
}
