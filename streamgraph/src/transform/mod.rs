//! Payload transformation: record → envelope → graph document.
//!
//! Transformation is pure and deterministic. The same payload always yields
//! the same document, which is what makes redelivery after a crash safe.

mod mapping;
pub mod vocab;

pub use mapping::to_document;

use std::sync::Arc;

use crate::codec::{Codec, JsonCodec};
use crate::errors::TransformError;
use crate::model::{EventEnvelope, GraphDocument, Record, DEFAULT_CONTENT_TYPE};

/// Turns raw records into graph documents.
pub struct Transformer {
    codec: Arc<dyn Codec>,
    vocabulary: String,
    default_content_type: String,
}

impl Transformer {
    /// Creates a transformer around a codec, using the Activity Streams vocabulary.
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            vocabulary: vocab::ACTIVITY_STREAMS.to_string(),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Sets the namespace used for non-absolute keys and type names.
    #[must_use]
    pub fn with_vocabulary(mut self, vocabulary: impl Into<String>) -> Self {
        self.vocabulary = vocabulary.into();
        self
    }

    /// Sets the content type assumed for records that carry none.
    #[must_use]
    pub fn with_default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// Returns the vocabulary namespace.
    #[must_use]
    pub fn vocabulary(&self) -> &str {
        &self.vocabulary
    }

    /// Decodes and validates a record's payload.
    pub fn envelope(&self, record: &Record) -> Result<EventEnvelope, TransformError> {
        let content_type = record.content_type().unwrap_or(&self.default_content_type);
        let value = self.codec.decode(record.payload(), content_type)?;
        Ok(EventEnvelope::from_json(value, record.timestamp())?)
    }

    /// Transforms a record into the document to commit.
    pub fn transform(&self, record: &Record) -> Result<GraphDocument, TransformError> {
        let envelope = self.envelope(record)?;
        Ok(to_document(&envelope, &self.vocabulary))
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec::new()))
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer")
            .field("vocabulary", &self.vocabulary)
            .field("default_content_type", &self.default_content_type)
            .finish_non_exhaustive()
    }
}
