//! Event envelopes parsed from record payloads.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::graph::is_absolute_iri;
use crate::errors::DeserializationError;

/// Parsed form of a record's payload.
///
/// The subject identifier and event type are always non-empty; construction
/// fails otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_type: String,
    subject: String,
    published: Option<DateTime<Utc>>,
    received: DateTime<Utc>,
    metadata: BTreeMap<String, Value>,
}

impl EventEnvelope {
    /// Creates an envelope, validating the required fields.
    pub fn new(
        event_type: impl Into<String>,
        subject: impl Into<String>,
        received: DateTime<Utc>,
    ) -> Result<Self, DeserializationError> {
        let event_type = event_type.into();
        let subject = subject.into();

        if event_type.trim().is_empty() {
            return Err(DeserializationError::MissingField("type"));
        }
        if subject.trim().is_empty() {
            return Err(DeserializationError::MissingField("id"));
        }
        if !is_absolute_iri(&subject) {
            return Err(DeserializationError::invalid("id", format!("'{subject}' is not an absolute IRI")));
        }

        Ok(Self {
            event_type,
            subject,
            published: None,
            received,
            metadata: BTreeMap::new(),
        })
    }

    /// Builds an envelope from an Activity Streams shaped JSON object.
    ///
    /// `id`/`@id` is the subject, the first `type`/`@type` entry the event type
    /// and `published` the event time. Remaining types stay under the `type`
    /// metadata key; every other key except `@context` becomes metadata.
    pub fn from_json(value: Value, received: DateTime<Utc>) -> Result<Self, DeserializationError> {
        let Value::Object(mut map) = value else {
            return Err(DeserializationError::Malformed(
                "payload is not a JSON object".to_string(),
            ));
        };
        map.remove("@context");

        let subject = take_first(&mut map, &["id", "@id"])
            .ok_or(DeserializationError::MissingField("id"))?;
        let Value::String(subject) = subject else {
            return Err(DeserializationError::invalid("id", "expected a string"));
        };

        let types = take_first(&mut map, &["type", "@type"])
            .ok_or(DeserializationError::MissingField("type"))?;
        let mut types = type_names(types)?.into_iter();
        let event_type = types.next().ok_or(DeserializationError::MissingField("type"))?;

        let published = match map.remove("published") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| DeserializationError::invalid("published", e.to_string()))?
                    .with_timezone(&Utc),
            ),
            Some(_) => {
                return Err(DeserializationError::invalid("published", "expected an RFC 3339 string"))
            }
        };

        let mut envelope = Self::new(event_type, subject, received)?;
        envelope.published = published;

        let extra_types: Vec<Value> = types.map(Value::String).collect();
        if !extra_types.is_empty() {
            envelope.metadata.insert("type".to_string(), Value::Array(extra_types));
        }
        envelope.metadata.extend(map);

        Ok(envelope)
    }

    /// Returns the event type tag.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the subject identifier.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the publication time from the payload, if it had one.
    #[must_use]
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published
    }

    /// Returns the event time: the payload's publication time, or the record's
    /// receive time when the payload had none.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.published.unwrap_or(self.received)
    }

    /// Returns the metadata ordered by key.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }
}

fn take_first(map: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    let mut found = None;
    for key in keys {
        if let Some(value) = map.remove(*key) {
            if found.is_none() {
                found = Some(value);
            }
        }
    }
    found
}

fn type_names(value: Value) -> Result<Vec<String>, DeserializationError> {
    match value {
        Value::String(name) => Ok(vec![name]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                _ => Err(DeserializationError::invalid("type", "expected an array of strings")),
            })
            .collect(),
        _ => Err(DeserializationError::invalid("type", "expected a string or array of strings")),
    }
}
