//! Activity payloads for tests and benchmarks.

use serde_json::json;

/// Stream name used by tests.
pub const TEST_STREAM: &str = "http://trellisldp.org/activitystream";

/// Returns the subject IRI of the `n`th fixture activity.
#[must_use]
pub fn activity_id(n: usize) -> String {
    format!("urn:uuid:00000000-0000-4000-8000-{n:012}")
}

/// Builds a valid Activity Streams `Update` payload.
#[must_use]
pub fn activity_payload(n: usize) -> String {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": activity_id(n),
        "type": "Update",
        "published": "2024-05-01T12:00:00Z",
        "actor": ["https://people.example.org/alice"],
        "object": {
            "id": format!("https://data.example.org/resource/{n}"),
            "type": ["http://www.w3.org/ns/ldp#RDFSource", "Document"]
        },
        "instrument": {"name": "importer", "version": n}
    })
    .to_string()
}

/// A payload that is not JSON at all.
#[must_use]
pub fn malformed_payload() -> String {
    "{\"id\": \"urn:uuid:broken\", \"type\": ".to_string()
}
