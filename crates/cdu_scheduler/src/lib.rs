//! Priority task queue, worker pool, and the polling/low-frequency
//! schedulers that keep the raw register image fresh.

pub mod low_frequency;
pub mod mode;
pub mod pool;
pub mod polling;
pub mod queue;

pub use low_frequency::{default_heartbeat_descriptor, LowFrequencyScheduler};
pub use mode::Mode;
pub use pool::WorkerPool;
pub use polling::{PollingScheduler, ScheduledTask};
pub use queue::PriorityTaskQueue;
