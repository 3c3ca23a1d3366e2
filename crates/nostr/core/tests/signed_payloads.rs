//! Integration tests for signed directory payloads.

use nostr::{
    CodeRepository, Event, EventTemplate, Filter, KIND_CODE_REPOSITORY, KIND_METADATA, Keypair,
    Profile, finalize_event, format_npub_short, get_event_hash, verify_event,
};

#[test]
fn test_repository_sign_verify_parse() {
    let keypair = Keypair::generate();
    let repository = CodeRepository::new("App Manager")
        .with_description("Directory of Nostr apps")
        .with_link("https://github.com/example/app-manager")
        .with_tags(["nostr", "javascript"]);

    let template = repository.to_event_template(1_700_000_000);
    let event = finalize_event(&template, &keypair.private_key).unwrap();

    assert_eq!(event.pubkey, keypair.public_key_hex());
    assert_eq!(event.id, get_event_hash(&event.unsigned()).unwrap());
    assert!(verify_event(&event).unwrap());
    assert!(
        !event
            .tags
            .iter()
            .any(|tag| tag[0] == "license"),
        "empty license must not be published"
    );

    let filter = Filter::new()
        .kinds([KIND_CODE_REPOSITORY])
        .authors([keypair.public_key_hex()])
        .tag("t", ["nostr"]);
    assert!(filter.matches(&event));
    assert!(!filter.clone().tag("t", ["rust"]).matches(&event));

    assert_eq!(CodeRepository::from_event(&event), Some(repository));
}

#[test]
fn test_tampered_event_fails_verification() {
    let keypair = Keypair::generate();
    let template = EventTemplate {
        created_at: 1_700_000_000,
        kind: 1,
        tags: vec![vec!["t".to_string(), "rust".to_string()]],
        content: "hello".to_string(),
    };
    let event = finalize_event(&template, &keypair.private_key).unwrap();

    let tampered = Event {
        content: "goodbye".to_string(),
        ..event.clone()
    };
    assert!(!verify_event(&tampered).unwrap());

    let foreign = Event {
        pubkey: Keypair::generate().public_key_hex(),
        ..event
    };
    assert!(!verify_event(&foreign).unwrap());
}

#[test]
fn test_profile_label_falls_back_to_short_npub() {
    let keypair = Keypair::generate();
    let anonymous = finalize_event(
        &EventTemplate {
            created_at: 100,
            kind: KIND_METADATA,
            tags: vec![],
            content: r#"{"about":"no name yet"}"#.to_string(),
        },
        &keypair.private_key,
    )
    .unwrap();
    let named = finalize_event(
        &EventTemplate {
            created_at: 200,
            kind: KIND_METADATA,
            tags: vec![],
            content: r#"{"display_name":"Alice"}"#.to_string(),
        },
        &keypair.private_key,
    )
    .unwrap();

    let older = Profile::from_event(&anonymous).unwrap();
    assert_eq!(older.label(), format_npub_short(&keypair.public_key_hex()));

    let latest = Profile::latest([&anonymous, &named]).unwrap();
    assert_eq!(latest.created_at, 200);
    assert_eq!(latest.label(), "Alice");
}
