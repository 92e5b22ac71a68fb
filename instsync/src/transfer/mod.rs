//! Transfers, batches, and the queue that sequences them.

mod batch;
mod queue;
mod unit;

pub use batch::{BatchEvent, BatchHandle, BatchOutcome, BatchProgress, BatchSummary, TransferBatch};
pub use queue::{QueueStats, TransferQueue};
pub use unit::{Sink, TransferUnit, UnitEvent, UnitOutcome};
