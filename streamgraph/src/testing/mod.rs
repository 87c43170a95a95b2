//! Test support: fault injection and payload fixtures.

mod fixtures;
mod mocks;

pub use fixtures::{activity_id, activity_payload, malformed_payload, TEST_STREAM};
pub use mocks::{FailingCheckpointStore, FlakyStore};
