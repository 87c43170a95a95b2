//! Cooperative shutdown for partition workers.

mod task_group;
mod token;

pub use task_group::WorkerGroup;
pub use token::ShutdownToken;
