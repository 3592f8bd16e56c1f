pub mod batch;
pub mod batcher;
pub mod record;
pub mod runner;

pub use batch::{BatchState, OpenBatch, SealReason, SealedBatch};
pub use batcher::{Batcher, BufferPolicy};
pub use record::Record;
pub use runner::run_batcher;
