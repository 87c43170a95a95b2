//! Graph documents: ordered, deduplicated triple sets.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static ABSOLUTE_IRI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[A-Za-z][A-Za-z0-9+.\-]*:[^\s<>"{}|\\^`]+$"#).expect("valid IRI pattern")
});

/// Returns true if `value` looks like an absolute IRI (`scheme:rest`) that can
/// be written between angle brackets without escaping.
#[must_use]
pub fn is_absolute_iri(value: &str) -> bool {
    ABSOLUTE_IRI.is_match(value)
}

/// The object position of a triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// A resource identifier.
    Iri(String),
    /// A literal value with an optional datatype IRI.
    Literal {
        /// The lexical form.
        value: String,
        /// Datatype IRI; `None` means a plain string.
        datatype: Option<String>,
    },
}

impl Term {
    /// Creates an IRI term.
    #[must_use]
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    /// Creates a plain string literal.
    #[must_use]
    pub fn plain(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    /// Creates a typed literal.
    #[must_use]
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
        }
    }

    /// Returns the IRI if this term is one.
    #[must_use]
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            Self::Literal { .. } => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{iri}>"),
            Self::Literal { value, datatype } => {
                write!(f, "\"{}\"", escape_literal(value))?;
                if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")?;
                }
                Ok(())
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// A (subject, predicate, object) statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Subject IRI.
    pub subject: String,
    /// Predicate IRI.
    pub predicate: String,
    /// Object term.
    pub object: Term,
}

impl Triple {
    /// Creates a new triple.
    #[must_use]
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// The graph-shaped form of one event, ready to be committed.
///
/// Triples are kept sorted and deduplicated, so two documents built from the
/// same triples compare equal and render to identical N-Triples text no matter
/// the order they were produced in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    subject: String,
    triples: Vec<Triple>,
}

impl GraphDocument {
    /// Creates a document rooted at `subject`.
    #[must_use]
    pub fn new(subject: impl Into<String>, triples: impl IntoIterator<Item = Triple>) -> Self {
        let unique: BTreeSet<Triple> = triples.into_iter().collect();
        Self {
            subject: subject.into(),
            triples: unique.into_iter().collect(),
        }
    }

    /// Returns the root subject every triple descends from.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the triples in canonical order.
    #[must_use]
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Returns the number of triples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// Returns true if the document has no triples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Renders the document as canonical N-Triples, one statement per line.
    #[must_use]
    pub fn to_ntriples(&self) -> String {
        let mut out = String::new();
        for triple in &self.triples {
            out.push_str(&triple.to_string());
            out.push('\n');
        }
        out
    }

    /// Hex-encoded SHA-256 of the N-Triples rendering.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.to_ntriples().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_absolute_iri_detection() {
        assert!(is_absolute_iri("http://example.org/a"));
        assert!(is_absolute_iri("urn:uuid:1234"));
        assert!(is_absolute_iri("ldp:Container"));
        assert!(!is_absolute_iri("Update"));
        assert!(!is_absolute_iri("has space:x"));
        assert!(!is_absolute_iri("http://example.org/a b"));
        assert!(!is_absolute_iri("mailto:"));
        assert!(!is_absolute_iri(""));
    }

    #[test]
    fn test_document_sorts_and_dedups() {
        let a = Triple::new("http://s", "http://p/2", Term::plain("x"));
        let b = Triple::new("http://s", "http://p/1", Term::plain("y"));

        let doc = GraphDocument::new("http://s", vec![a.clone(), b.clone(), a.clone()]);

        assert_eq!(doc.len(), 2);
        assert_eq!(doc.triples(), &[b, a]);
    }

    #[test]
    fn test_ntriples_rendering() {
        let doc = GraphDocument::new(
            "http://s",
            vec![
                Triple::new("http://s", "http://p", Term::iri("http://o")),
                Triple::new(
                    "http://s",
                    "http://q",
                    Term::typed("5", "http://www.w3.org/2001/XMLSchema#integer"),
                ),
                Triple::new("http://s", "http://r", Term::plain("say \"hi\"\n")),
            ],
        );

        assert_eq!(
            doc.to_ntriples(),
            "<http://s> <http://p> <http://o> .\n\
             <http://s> <http://q> \"5\"^^<http://www.w3.org/2001/XMLSchema#integer> .\n\
             <http://s> <http://r> \"say \\\"hi\\\"\\n\" .\n"
        );
    }

    #[test]
    fn test_digest_is_order_independent() {
        let a = Triple::new("http://s", "http://p", Term::plain("1"));
        let b = Triple::new("http://s", "http://p", Term::plain("2"));

        let first = GraphDocument::new("http://s", vec![a.clone(), b.clone()]);
        let second = GraphDocument::new("http://s", vec![b, a]);

        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.digest().len(), 64);
    }
}
