//! Deterministic envelope-to-graph mapping.

use chrono::SecondsFormat;
use serde_json::Value;

use super::vocab::{AS_PUBLISHED, RDF_TYPE, XSD_BOOLEAN, XSD_DATE_TIME, XSD_DOUBLE, XSD_INTEGER};
use crate::model::{is_absolute_iri, EventEnvelope, GraphDocument, Term, Triple};

/// Maps an envelope to its graph document.
///
/// Every triple's subject is either the envelope subject or a node reachable
/// from it: nested objects without an `id` get an IRI derived from their
/// parent and the key path that led to them.
#[must_use]
pub fn to_document(envelope: &EventEnvelope, vocabulary: &str) -> GraphDocument {
    let mut mapper = Mapper {
        vocabulary,
        triples: Vec::new(),
    };
    let subject = envelope.subject();

    mapper.push(subject, RDF_TYPE, Term::iri(mapper.resolve(envelope.event_type())));
    if let Some(published) = envelope.published() {
        mapper.push(
            subject,
            AS_PUBLISHED,
            Term::typed(published.to_rfc3339_opts(SecondsFormat::AutoSi, true), XSD_DATE_TIME),
        );
    }
    for (key, value) in envelope.metadata() {
        mapper.describe(subject, key, value);
    }

    GraphDocument::new(subject, mapper.triples)
}

struct Mapper<'a> {
    vocabulary: &'a str,
    triples: Vec<Triple>,
}

impl Mapper<'_> {
    fn push(&mut self, subject: &str, predicate: &str, object: Term) {
        self.triples.push(Triple::new(subject, predicate, object));
    }

    /// Absolute IRIs pass through; anything else is a term of the vocabulary.
    fn resolve(&self, name: &str) -> String {
        if is_absolute_iri(name) {
            name.to_string()
        } else {
            format!("{}{}", self.vocabulary, encode_segment(name))
        }
    }

    fn describe(&mut self, node: &str, key: &str, value: &Value) {
        if key == "type" || key == "@type" {
            if let Some(names) = type_names(value) {
                for name in names {
                    let iri = self.resolve(name);
                    self.push(node, RDF_TYPE, Term::iri(iri));
                }
                return;
            }
        }
        if key.starts_with('@') {
            return;
        }
        let predicate = self.resolve(key);
        self.emit(node, &predicate, &encode_segment(key), value);
    }

    fn emit(&mut self, node: &str, predicate: &str, fragment: &str, value: &Value) {
        match value {
            Value::Null => {}
            Value::Bool(b) => self.push(node, predicate, Term::typed(b.to_string(), XSD_BOOLEAN)),
            Value::Number(n) => {
                let datatype = if n.is_i64() || n.is_u64() { XSD_INTEGER } else { XSD_DOUBLE };
                self.push(node, predicate, Term::typed(n.to_string(), datatype));
            }
            Value::String(s) if is_absolute_iri(s) => self.push(node, predicate, Term::iri(s.as_str())),
            Value::String(s) => self.push(node, predicate, Term::plain(s.as_str())),
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.emit(node, predicate, &format!("{fragment}/{index}"), item);
                }
            }
            Value::Object(map) => {
                let own_id = ["id", "@id"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .filter(|id| is_absolute_iri(id));
                let child = own_id.map_or_else(|| derived_iri(node, fragment), str::to_string);
                self.push(node, predicate, Term::iri(child.as_str()));

                for (key, nested) in map {
                    if own_id.is_some() && (key == "id" || key == "@id") {
                        continue;
                    }
                    self.describe(&child, key, nested);
                }
            }
        }
    }
}

fn type_names(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(name) => Some(vec![name.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

/// `<parent>#<key>` at the top level, `<parent>/<key>` below it. Keys are
/// percent-encoded, so `/` only ever separates path segments.
fn derived_iri(parent: &str, fragment: &str) -> String {
    if parent.contains('#') {
        format!("{parent}/{fragment}")
    } else {
        format!("{parent}#{fragment}")
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte));
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::vocab::ACTIVITY_STREAMS;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn envelope(payload: Value) -> EventEnvelope {
        let received = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        EventEnvelope::from_json(payload, received).unwrap()
    }

    #[test]
    fn test_event_type_and_published() {
        let doc = to_document(
            &envelope(json!({
                "id": "urn:uuid:1",
                "type": "Update",
                "published": "2024-03-05T10:15:00+01:00"
            })),
            ACTIVITY_STREAMS,
        );

        assert_eq!(
            doc.to_ntriples(),
            "<urn:uuid:1> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <https://www.w3.org/ns/activitystreams#Update> .\n\
             <urn:uuid:1> <https://www.w3.org/ns/activitystreams#published> \"2024-03-05T09:15:00Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime> .\n"
        );
    }

    #[test]
    fn test_missing_published_emits_no_timestamp() {
        let doc = to_document(&envelope(json!({"id": "urn:uuid:1", "type": "Delete"})), ACTIVITY_STREAMS);
        assert_eq!(doc.len(), 1);
        assert!(doc.triples().iter().all(|t| t.predicate != AS_PUBLISHED));
    }

    #[test]
    fn test_nested_object_with_id() {
        let doc = to_document(
            &envelope(json!({
                "id": "urn:uuid:1",
                "type": "Create",
                "object": {"id": "https://data.example.org/r/1", "type": ["ldp:Container", "Document"]}
            })),
            ACTIVITY_STREAMS,
        );

        let triples = doc.triples();
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "https://www.w3.org/ns/activitystreams#object",
            Term::iri("https://data.example.org/r/1"),
        )));
        assert!(triples.contains(&Triple::new(
            "https://data.example.org/r/1",
            RDF_TYPE,
            Term::iri("ldp:Container"),
        )));
        assert!(triples.contains(&Triple::new(
            "https://data.example.org/r/1",
            RDF_TYPE,
            Term::iri("https://www.w3.org/ns/activitystreams#Document"),
        )));
        assert!(triples.iter().all(|t| !t.predicate.ends_with("#id")));
    }

    #[test]
    fn test_blank_nested_object_gets_derived_iri() {
        let doc = to_document(
            &envelope(json!({
                "id": "http://example.org/e/1",
                "type": "Create",
                "generator": {"name": "importer", "version": 3}
            })),
            ACTIVITY_STREAMS,
        );

        let node = "http://example.org/e/1#generator";
        let triples = doc.triples();
        assert!(triples.contains(&Triple::new(
            "http://example.org/e/1",
            "https://www.w3.org/ns/activitystreams#generator",
            Term::iri(node),
        )));
        assert!(triples.contains(&Triple::new(
            node,
            "https://www.w3.org/ns/activitystreams#name",
            Term::plain("importer"),
        )));
        assert!(triples.contains(&Triple::new(
            node,
            "https://www.w3.org/ns/activitystreams#version",
            Term::typed("3", XSD_INTEGER),
        )));
    }

    #[test]
    fn test_every_subject_descends_from_envelope_subject() {
        let doc = to_document(
            &envelope(json!({
                "id": "http://example.org/e/1",
                "type": "Create",
                "tag": [{"name": "a"}, {"name": "b", "extra": {"deep": true}}]
            })),
            ACTIVITY_STREAMS,
        );

        assert!(doc
            .triples()
            .iter()
            .all(|t| t.subject.starts_with("http://example.org/e/1")));
        assert!(doc
            .triples()
            .iter()
            .any(|t| t.subject == "http://example.org/e/1#tag/1/extra"));
    }

    #[test]
    fn test_scalar_values() {
        let doc = to_document(
            &envelope(json!({
                "id": "urn:uuid:1",
                "type": "Create",
                "actor": ["https://people.example.org/alice", "Bob"],
                "score": 0.5,
                "sensitive": false,
                "summary": null,
                "http://purl.org/dc/terms/title": "Hello"
            })),
            ACTIVITY_STREAMS,
        );

        let triples = doc.triples();
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "https://www.w3.org/ns/activitystreams#actor",
            Term::iri("https://people.example.org/alice"),
        )));
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "https://www.w3.org/ns/activitystreams#actor",
            Term::plain("Bob"),
        )));
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "https://www.w3.org/ns/activitystreams#score",
            Term::typed("0.5", XSD_DOUBLE),
        )));
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "https://www.w3.org/ns/activitystreams#sensitive",
            Term::typed("false", XSD_BOOLEAN),
        )));
        assert!(triples.contains(&Triple::new(
            "urn:uuid:1",
            "http://purl.org/dc/terms/title",
            Term::plain("Hello"),
        )));
        assert!(triples.iter().all(|t| !t.predicate.ends_with("summary")));
    }

    #[test]
    fn test_keys_are_percent_encoded() {
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_segment("plain_key-1.x~"), "plain_key-1.x~");
    }

    #[test]
    fn test_derived_iris_do_not_collide_with_dashed_keys() {
        let doc = to_document(
            &envelope(json!({
                "id": "urn:e:1",
                "type": "Create",
                "actor": {"location": {"name": "nested"}},
                "actor-location": {"name": "sibling"}
            })),
            ACTIVITY_STREAMS,
        );

        let name = "https://www.w3.org/ns/activitystreams#name";
        let named: BTreeSet<&str> = doc
            .triples()
            .iter()
            .filter(|t| t.predicate == name)
            .map(|t| t.subject.as_str())
            .collect();
        assert_eq!(
            named,
            BTreeSet::from(["urn:e:1#actor/location", "urn:e:1#actor-location"])
        );
    }

    #[test]
    fn test_array_elements_get_indexed_nodes() {
        let doc = to_document(
            &envelope(json!({
                "id": "urn:e:1",
                "type": "Create",
                "tag": [{"name": "a"}],
                "tag-0": {"name": "b"}
            })),
            ACTIVITY_STREAMS,
        );

        let subjects: BTreeSet<&str> = doc.triples().iter().map(|t| t.subject.as_str()).collect();
        assert!(subjects.contains("urn:e:1#tag/0"));
        assert!(subjects.contains("urn:e:1#tag-0"));
    }
}
