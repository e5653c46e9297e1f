//! Comprehensive unit tests for validation.rs module

use proptest::prelude::*;
use std::path::Path;
use whatsapp_journey::validation::{InputGrammar, InputValidator};

fn grammar() -> InputGrammar {
    InputGrammar::new("free Zoom preview link", &["👍", "YES", "OK"], &["CHANGE", "REBOOK"]).unwrap()
}

#[test]
fn test_extract_first_name_takes_first_token() {
    assert_eq!(InputValidator::extract_first_name("sarah jones").as_deref(), Some("Sarah"));
    assert_eq!(InputValidator::extract_first_name("  MIA  ").as_deref(), Some("Mia"));
}

#[test]
fn test_extract_first_name_keeps_non_latin_letters() {
    assert_eq!(InputValidator::extract_first_name("ณัฐ").as_deref(), Some("ณัฐ"));
    assert_eq!(InputValidator::extract_first_name("élodie").as_deref(), Some("Élodie"));
}

#[test]
fn test_extract_first_name_rejects_non_names() {
    assert_eq!(InputValidator::extract_first_name(""), None);
    assert_eq!(InputValidator::extract_first_name("   "), None);
    assert_eq!(InputValidator::extract_first_name("👍"), None);
    assert_eq!(InputValidator::extract_first_name("12345"), None);
}

#[test]
fn test_extract_first_name_too_long() {
    let long_name = "a".repeat(101);
    assert_eq!(InputValidator::extract_first_name(&long_name), None);
    assert!(InputValidator::extract_first_name(&"a".repeat(100)).is_some());
}

#[test]
fn test_validate_phone() {
    assert!(InputValidator::validate_phone("+65 9123 4567").is_ok());
    assert!(InputValidator::validate_phone("(555) 123-4567").is_ok());
    assert!(InputValidator::validate_phone("").is_err());
    assert!(InputValidator::validate_phone("12345").is_err());
    assert!(InputValidator::validate_phone("1234567890123456").is_err());
}

#[test]
fn test_normalize_phone() {
    assert_eq!(InputValidator::normalize_phone("+65 9123-4567"), "6591234567");
}

#[test]
fn test_validate_file_path() {
    assert!(InputValidator::validate_file_path(Path::new("output/contacts.csv")).is_ok());
    assert!(InputValidator::validate_file_path(Path::new("")).is_err());
    assert!(InputValidator::validate_file_path(Path::new("../etc/passwd")).is_err());
}

#[test]
fn test_sanitize_text_removes_control_characters() {
    assert_eq!(InputValidator::sanitize_text("  S\u{0}\u{7} "), "S");
    assert_eq!(InputValidator::sanitize_text("a\nb"), "a\nb");
}

#[test]
fn test_normalize_strips_emoji_modifiers() {
    let g = grammar();
    assert_eq!(g.normalize("👍🏾"), "👍");
    assert_eq!(g.normalize("  ok   then "), "OK THEN");
}

#[test]
fn test_thumbs_up_tokens() {
    let g = grammar();
    for input in ["👍", "👍🏻", " yes ", "Ok"] {
        assert!(g.is_thumbs_up(input), "input {input:?}");
    }
    assert!(!g.is_thumbs_up("yes please"));
}

#[test]
fn test_compound_code_ignores_inner_spaces() {
    let g = grammar();
    assert_eq!(g.compound_code("s b").as_deref(), Some("SB"));
    assert_eq!(g.compound_code(" UA ").as_deref(), Some("UA"));
    assert_eq!(g.compound_code("S"), None);
    assert_eq!(g.compound_code("SAT"), None);
}

#[test]
fn test_website_trigger_is_case_insensitive() {
    let g = grammar();
    assert!(g.is_website_trigger("Hi, can I get the FREE ZOOM PREVIEW LINK?"));
    assert!(!g.is_website_trigger("Hi from Facebook"));
}

#[test]
fn test_rebook_keywords() {
    let g = grammar();
    assert!(g.is_rebook_request("change"));
    assert!(g.is_rebook_request(" Rebook "));
    assert!(!g.is_rebook_request("exchange"));
}

#[test]
fn test_empty_trigger_phrase_is_rejected() {
    assert!(InputGrammar::new(" ", &["👍"], &["CHANGE"]).is_err());
}

proptest! {
    #[test]
    fn prop_single_code_ignores_case_and_padding(c in "[a-zA-Z]", left in "[ \t]{0,3}", right in "[ \t\n]{0,3}") {
        let g = grammar();
        let input = format!("{left}{c}{right}");
        prop_assert_eq!(g.single_code(&input), c.to_uppercase().chars().next());
    }
}
