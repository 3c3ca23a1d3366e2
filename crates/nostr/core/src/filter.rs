//! Subscription filters.
//!
//! A filter is a conjunction of optional constraints. Tag constraints are
//! keyed by a single-letter tag name and serialize as `"#<letter>"` fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::nip01::Event;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid tag filter key: {0:?} (expected a single ASCII letter)")]
    InvalidTagKey(String),

    #[error("since ({since}) is after until ({until})")]
    InvalidRange { since: u64, until: u64 },

    #[error("empty {0} set matches nothing")]
    EmptySet(String),
}

/// Query descriptor matched against event fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireFilter", into = "WireFilter")]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    /// Tag name → accepted values.
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Add a tag constraint, e.g. `tag("t", ["rust"])` for `"#t": ["rust"]`.
    pub fn tag<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject filters a relay would refuse or that can never match.
    pub fn validate(&self) -> Result<(), FilterError> {
        for name in self.tags.keys() {
            let mut chars = name.chars();
            let single_letter = matches!(
                (chars.next(), chars.next()),
                (Some(c), None) if c.is_ascii_alphabetic()
            );
            if !single_letter {
                return Err(FilterError::InvalidTagKey(name.clone()));
            }
        }

        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(FilterError::InvalidRange { since, until });
        }

        let empty = [
            ("ids", self.ids.as_ref().is_some_and(Vec::is_empty)),
            ("authors", self.authors.as_ref().is_some_and(Vec::is_empty)),
            ("kinds", self.kinds.as_ref().is_some_and(Vec::is_empty)),
        ];
        if let Some((field, _)) = empty.iter().find(|(_, is_empty)| *is_empty) {
            return Err(FilterError::EmptySet((*field).to_string()));
        }
        if let Some((name, _)) = self.tags.iter().find(|(_, values)| values.is_empty()) {
            return Err(FilterError::EmptySet(format!("#{name}")));
        }

        Ok(())
    }

    /// Whether an event satisfies every present constraint. `limit` is ignored.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(name, values)| {
            event
                .tags
                .iter()
                .any(|tag| tag.len() > 1 && tag[0] == *name && values.contains(&tag[1]))
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kinds: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<WireFilter> for Filter {
    fn from(wire: WireFilter) -> Self {
        let tags = wire
            .extra
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix('#')?.to_string();
                let values = value
                    .as_array()?
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_owned))
                    .collect();
                Some((name, values))
            })
            .collect();

        Self {
            ids: wire.ids,
            authors: wire.authors,
            kinds: wire.kinds,
            tags,
            since: wire.since,
            until: wire.until,
            limit: wire.limit,
        }
    }
}

impl From<Filter> for WireFilter {
    fn from(filter: Filter) -> Self {
        let extra = filter
            .tags
            .into_iter()
            .map(|(name, values)| {
                (
                    format!("#{name}"),
                    Value::Array(values.into_iter().map(Value::String).collect()),
                )
            })
            .collect();

        Self {
            ids: filter.ids,
            authors: filter.authors,
            kinds: filter.kinds,
            since: filter.since,
            until: filter.until,
            limit: filter.limit,
            extra,
        }
    }
}
