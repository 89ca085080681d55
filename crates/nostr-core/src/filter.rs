//! Relay subscription filters: the constraint language relays use to decide
//! which events to send a client.
//!
//! `Filter`'s JSON shape puts tag constraints under keys like `#e`/`#p`; we
//! strip that `#` prefix on the way in and re-add it on the way out, so
//! `tags` internally is keyed by bare tag letter.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{NostrError, Result};
use crate::event::Event;

/// A single relay filter. Every populated field is a conjunctive constraint;
/// within a field (e.g. multiple `authors`), matching is a disjunction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<u64>,
    /// Tag letter (without the `#`) to the set of acceptable values.
    pub tags: HashMap<String, Vec<String>>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    /// True if `event` satisfies every populated constraint on this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id()) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u64()) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        for (letter, wanted) in &self.tags {
            let has_match = event
                .tags
                .iter()
                .any(|t| t.first().map(String::as_str) == Some(letter.as_str()) && t.get(1).is_some_and(|v| wanted.contains(v)));
            if !has_match {
                return false;
            }
        }
        true
    }

    pub fn to_json_object(&self) -> Value {
        let mut map = Map::new();
        if !self.ids.is_empty() {
            map.insert("ids".into(), Value::from(self.ids.clone()));
        }
        if !self.authors.is_empty() {
            map.insert("authors".into(), Value::from(self.authors.clone()));
        }
        if !self.kinds.is_empty() {
            map.insert("kinds".into(), Value::from(self.kinds.clone()));
        }
        for (letter, values) in &self.tags {
            map.insert(format!("#{letter}"), Value::from(values.clone()));
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::from(since));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::from(until));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::from(limit));
        }
        Value::Object(map)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| NostrError::Decode("filter must be a JSON object".into()))?;

        let string_list = |key: &str| -> Vec<String> {
            obj.get(key)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default()
        };

        let kinds = obj
            .get("kinds")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        let mut tags = HashMap::new();
        for (key, value) in obj {
            if let Some(letter) = key.strip_prefix('#') {
                let values = value
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                tags.insert(letter.to_string(), values);
            }
        }

        Ok(Filter {
            ids: string_list("ids"),
            authors: string_list("authors"),
            kinds,
            tags,
            since: obj.get("since").and_then(Value::as_i64),
            until: obj.get("until").and_then(Value::as_i64),
            limit: obj.get("limit").and_then(Value::as_u64),
        })
    }
}

/// A set of filters a subscription uses; a single event matching *any*
/// member filter is delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(pub Vec<Filter>);

impl FilterSet {
    pub fn new(filters: Vec<Filter>) -> Self {
        FilterSet(filters)
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.0.iter().any(|f| f.matches(event))
    }

    pub fn to_json_array(&self) -> Value {
        Value::Array(self.0.iter().map(Filter::to_json_object).collect())
    }
}
