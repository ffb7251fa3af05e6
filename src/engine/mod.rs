//! Execution engine: jobs, workers, the dispatcher, collectors and the
//! cancellation scope they all observe.

pub mod cancel;
pub mod collector;
pub mod dispatcher;
pub mod job;
pub mod wait;
mod worker;

pub use cancel::CancellationController;
pub use collector::{Collected, Collector, CollectorHandle};
pub use dispatcher::Dispatcher;
pub use job::{Job, ResultPoll, Task};
pub use wait::WaitGroup;
