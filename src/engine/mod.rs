//! Provisioning engine: generation pipeline, cleanup cascade, execution queue.

pub mod cleanup;
pub mod generation;
pub mod queue;

pub use cleanup::{CleanupConfig, CleanupOutcome, CleanupPipeline};
pub use generation::{GenerationPipeline, ProjectGenerator};
pub use queue::{ExecutionQueue, QueueConfig};
