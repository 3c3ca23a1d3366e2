//! Kind-0 profile metadata.

use serde_json::{Map, Value};

use crate::nip01::{Event, KIND_METADATA};
use crate::nip19::format_npub_short;

/// Decoded profile of a pubkey.
///
/// Attributes are kept as an opaque JSON object; `created_at` decides which of
/// several kind-0 events for the same pubkey wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub pubkey: String,
    pub event_id: String,
    pub created_at: u64,
    pub metadata: Map<String, Value>,
}

impl Profile {
    /// Decode a kind-0 event. Non-object or unparsable content yields `None`.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != KIND_METADATA {
            return None;
        }
        let metadata = match serde_json::from_str::<Value>(&event.content).ok()? {
            Value::Object(map) => map,
            _ => return None,
        };
        Some(Self {
            pubkey: event.pubkey.clone(),
            event_id: event.id.clone(),
            created_at: event.created_at,
            metadata,
        })
    }

    /// Decode the newest usable profile among `events`.
    pub fn latest<'a>(events: impl IntoIterator<Item = &'a Event>) -> Option<Self> {
        events
            .into_iter()
            .filter_map(Self::from_event)
            .reduce(|best, candidate| {
                if candidate.is_newer_than(&best) {
                    candidate
                } else {
                    best
                }
            })
    }

    /// Later `created_at` wins; equal timestamps fall back to the lower id.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.created_at > other.created_at
            || (self.created_at == other.created_at && self.event_id < other.event_id)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.attribute("name")
    }

    pub fn display_name(&self) -> Option<&str> {
        self.attribute("display_name")
    }

    pub fn picture(&self) -> Option<&str> {
        self.attribute("picture")
    }

    /// `name`, then `display_name`, then the shortened npub.
    pub fn label(&self) -> String {
        self.name()
            .or_else(|| self.display_name())
            .map_or_else(|| format_npub_short(&self.pubkey), str::to_owned)
    }
}
