//! Kind-30117 code repository records.
//!
//! Tags: `d` (identifier), `title`, `description`, `r` (link), `license`,
//! then one `t` per topic and per programming language.

use crate::nip01::{Event, EventTemplate};
use crate::tag_parsing::{collect_tag_values, find_tag_value, retain_valued_tags};

pub const KIND_CODE_REPOSITORY: u16 = 30117;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeRepository {
    /// `d` tag; addressable events are replaced per (pubkey, kind, d).
    pub identifier: String,
    pub name: String,
    pub description: String,
    pub link: String,
    pub license: String,
    /// Topic tags followed by programming languages, all published as `t`.
    pub tags: Vec<String>,
}

impl CodeRepository {
    /// New record with a millisecond-timestamp identifier.
    pub fn new(name: impl Into<String>) -> Self {
        let identifier = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis().to_string())
            .unwrap_or_default();
        Self {
            identifier,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = license.into();
        self
    }

    /// Add topic or language tags, skipping duplicates.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    /// Ordered tag pairs, including pairs with empty values.
    pub fn tag_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("d".to_string(), self.identifier.clone()),
            ("title".to_string(), self.name.clone()),
            ("description".to_string(), self.description.clone()),
            ("r".to_string(), self.link.clone()),
            ("license".to_string(), self.license.clone()),
        ];
        pairs.extend(self.tags.iter().map(|tag| ("t".to_string(), tag.clone())));
        pairs
    }

    /// Template with valueless tags removed.
    pub fn to_event_template(&self, created_at: u64) -> EventTemplate {
        let mut tags: Vec<Vec<String>> = self
            .tag_pairs()
            .into_iter()
            .map(|(name, value)| vec![name, value])
            .collect();
        retain_valued_tags(&mut tags);
        EventTemplate {
            created_at,
            kind: KIND_CODE_REPOSITORY,
            tags,
            content: String::new(),
        }
    }

    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != KIND_CODE_REPOSITORY {
            return None;
        }
        let value = |name: &str| find_tag_value(&event.tags, name).unwrap_or_default().to_string();
        Some(Self {
            identifier: value("d"),
            name: value("title"),
            description: value("description"),
            link: value("r"),
            license: value("license"),
            tags: collect_tag_values(&event.tags, "t"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CodeRepository {
        CodeRepository {
            identifier: "1700000000000".to_string(),
            ..CodeRepository::default()
        }
        .with_tags(["nostr"])
        .with_link("https://github.com/example/app")
        .with_tags(["rust", "nostr"])
    }

    #[test]
    fn template_drops_empty_fields() {
        let template = CodeRepository {
            name: "App".to_string(),
            ..sample()
        }
        .to_event_template(42);

        assert_eq!(template.kind, KIND_CODE_REPOSITORY);
        assert_eq!(
            template.tags,
            vec![
                vec!["d".to_string(), "1700000000000".to_string()],
                vec!["title".to_string(), "App".to_string()],
                vec!["r".to_string(), "https://github.com/example/app".to_string()],
                vec!["t".to_string(), "nostr".to_string()],
                vec!["t".to_string(), "rust".to_string()],
            ]
        );
    }

    #[test]
    fn parses_back_from_event() {
        let repository = sample().with_license("MIT").with_description("desc");
        let template = repository.to_event_template(1);
        let event = Event {
            id: String::new(),
            pubkey: String::new(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: String::new(),
        };
        assert_eq!(CodeRepository::from_event(&event), Some(repository));
    }

    #[test]
    fn new_uses_millisecond_identifier() {
        let repository = CodeRepository::new("App");
        assert!(repository.identifier.len() >= 13);
        assert!(repository.identifier.chars().all(|c| c.is_ascii_digit()));
    }
}
