//! Data model shared by every pipeline component.
//!
//! - [`Record`]: one message read from a partition of the source log
//! - [`EventEnvelope`]: the validated, parsed form of a record's payload
//! - [`GraphDocument`]: the ordered triple set committed to a stream

mod envelope;
mod graph;
mod record;

pub use envelope::EventEnvelope;
pub use graph::{is_absolute_iri, GraphDocument, Term, Triple};
pub use record::{Offset, PartitionId, Record, DEFAULT_CONTENT_TYPE};
