//! Process-level runtime: context identity, configuration, the cooperative
//! scheduler and small synchronization helpers.

pub mod config;
pub mod context;
pub mod scheduler;
pub mod semaphore;

pub use config::RuntimeConfig;
pub use context::RuntimeContext;
pub use scheduler::{DataObject, Iterate, IterateOutcome, LockMode, PendingMessage, Scheduler};
pub use semaphore::CountingSemaphore;
