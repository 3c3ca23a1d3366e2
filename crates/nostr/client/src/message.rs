//! Relay wire messages (NIP-01 JSON arrays).

use crate::error::{ClientError, Result};
use nostr::{Event, Filter};
use serde_json::{Value, json};

/// Message sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// `["EVENT", event]`
    Event(Event),
    /// `["REQ", subscription_id, filter...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", subscription_id]`
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// Message received from a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Closed(String, String),
    Notice(String),
    Auth(String),
}

fn string_field(array: &[Value], index: usize, what: &str) -> Result<String> {
    array[index]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ClientError::Protocol(format!("invalid {what}")))
}

fn require_len(array: &[Value], len: usize, kind: &str) -> Result<()> {
    if array.len() < len {
        return Err(ClientError::Protocol(format!("invalid {kind} message")));
    }
    Ok(())
}

/// Parse relay protocol JSON text message into typed relay message.
///
/// Unknown message kinds and empty arrays yield `Ok(None)`.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array relay message".to_string()))?;
    if array.is_empty() {
        return Ok(None);
    }

    let kind = array[0]
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing relay message kind".to_string()))?;

    let message = match kind {
        "EVENT" => {
            require_len(array, 3, "EVENT")?;
            let subscription_id = string_field(array, 1, "EVENT subscription id")?;
            let event: Event = serde_json::from_value(array[2].clone()).map_err(|error| {
                ClientError::Protocol(format!("invalid EVENT payload: {}", error))
            })?;
            RelayMessage::Event(subscription_id, event)
        }
        "OK" => {
            require_len(array, 4, "OK")?;
            let event_id = string_field(array, 1, "OK event id")?;
            let accepted = array[2]
                .as_bool()
                .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
            let message = string_field(array, 3, "OK message text")?;
            RelayMessage::Ok(event_id, accepted, message)
        }
        "EOSE" => {
            require_len(array, 2, "EOSE")?;
            RelayMessage::Eose(string_field(array, 1, "EOSE subscription id")?)
        }
        "CLOSED" => {
            require_len(array, 2, "CLOSED")?;
            let subscription_id = string_field(array, 1, "CLOSED subscription id")?;
            let reason = array
                .get(2)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            RelayMessage::Closed(subscription_id, reason)
        }
        "NOTICE" => {
            require_len(array, 2, "NOTICE")?;
            RelayMessage::Notice(string_field(array, 1, "NOTICE message text")?)
        }
        "AUTH" => {
            require_len(array, 2, "AUTH")?;
            RelayMessage::Auth(string_field(array, 1, "AUTH challenge")?)
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn parse_known_message_kinds() -> Result<()> {
        let event_text = serde_json::to_string(&json!(["EVENT", "sub", sample_event()]))?;
        match parse_relay_message(&event_text)? {
            Some(RelayMessage::Event(subscription_id, event)) => {
                assert_eq!(subscription_id, "sub");
                assert_eq!(event, sample_event());
            }
            other => panic!("expected EVENT, got {other:?}"),
        }

        assert!(matches!(
            parse_relay_message(r#"["OK","event-id",false,"blocked: spam"]"#)?,
            Some(RelayMessage::Ok(id, false, message)) if id == "event-id" && message == "blocked: spam"
        ));
        assert!(matches!(
            parse_relay_message(r#"["EOSE","sub"]"#)?,
            Some(RelayMessage::Eose(id)) if id == "sub"
        ));
        assert!(matches!(
            parse_relay_message(r#"["CLOSED","sub","error: shutting down"]"#)?,
            Some(RelayMessage::Closed(id, reason)) if id == "sub" && reason == "error: shutting down"
        ));
        assert!(matches!(
            parse_relay_message(r#"["CLOSED","sub"]"#)?,
            Some(RelayMessage::Closed(_, reason)) if reason.is_empty()
        ));
        assert!(matches!(
            parse_relay_message(r#"["NOTICE","maintenance"]"#)?,
            Some(RelayMessage::Notice(text)) if text == "maintenance"
        ));
        assert!(matches!(
            parse_relay_message(r#"["AUTH","challenge-token"]"#)?,
            Some(RelayMessage::Auth(challenge)) if challenge == "challenge-token"
        ));
        Ok(())
    }

    #[test]
    fn parse_unknown_message_kind_returns_none() -> Result<()> {
        assert!(parse_relay_message(r#"["UNKNOWN","data"]"#)?.is_none());
        assert!(parse_relay_message("[]")?.is_none());
        Ok(())
    }

    #[test]
    fn parse_malformed_messages() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "non-array payload",
                input: r#"{"kind":"EVENT"}"#,
                expected_error_fragment: "expected JSON array relay message",
            },
            Case {
                name: "kind is not string",
                input: "[123]",
                expected_error_fragment: "missing relay message kind",
            },
            Case {
                name: "event too short",
                input: r#"["EVENT","sub"]"#,
                expected_error_fragment: "invalid EVENT message",
            },
            Case {
                name: "event subscription id type",
                input: r#"["EVENT",123,{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT subscription id",
            },
            Case {
                name: "event payload shape",
                input: r#"["EVENT","sub",{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT payload",
            },
            Case {
                name: "ok too short",
                input: r#"["OK","event-id",true]"#,
                expected_error_fragment: "invalid OK message",
            },
            Case {
                name: "ok accepted type",
                input: r#"["OK","event-id","yes","accepted"]"#,
                expected_error_fragment: "invalid OK accepted flag",
            },
            Case {
                name: "eose too short",
                input: r#"["EOSE"]"#,
                expected_error_fragment: "invalid EOSE message",
            },
            Case {
                name: "closed subscription id type",
                input: r#"["CLOSED",7,"x"]"#,
                expected_error_fragment: "invalid CLOSED subscription id",
            },
            Case {
                name: "notice text type",
                input: r#"["NOTICE",{"text":"msg"}]"#,
                expected_error_fragment: "invalid NOTICE message text",
            },
        ];

        for case in cases {
            match parse_relay_message(case.input) {
                Ok(parsed) => panic!("{}: expected an error, got {parsed:?}", case.name),
                Err(error) => {
                    let rendered = error.to_string();
                    assert!(
                        rendered.contains(case.expected_error_fragment),
                        "{}: expected error fragment '{}' in '{}'",
                        case.name,
                        case.expected_error_fragment,
                        rendered
                    );
                }
            }
        }
    }

    #[test]
    fn client_messages_encode_wire_frames() -> Result<()> {
        let req = ClientMessage::Req {
            subscription_id: "sub".to_string(),
            filters: vec![Filter::new().kinds([0]), Filter::new().tag("t", ["rust"])],
        };
        assert_eq!(req.to_json()?, r##"["REQ","sub",{"kinds":[0]},{"#t":["rust"]}]"##);

        assert_eq!(
            ClientMessage::Close("sub".to_string()).to_json()?,
            r#"["CLOSE","sub"]"#
        );

        let publish: Value =
            serde_json::from_str(&ClientMessage::Event(sample_event()).to_json()?)?;
        assert_eq!(publish[0], "EVENT");
        assert_eq!(publish[1]["id"], "id");
        Ok(())
    }
}
