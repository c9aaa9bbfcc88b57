use std::io;

use thiserror::Error;

use crate::tasks::table::TaskHandle;

/// Conditions the scheduler refuses to continue from.
///
/// The `try_*` methods return these; the plain API panics with the same
/// message, since none of them is recoverable mid-run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task table is full ({capacity} tasks)")]
    CapacityExhausted { capacity: usize },

    #[error("task handle {0} does not name a created task")]
    InvalidHandle(TaskHandle),

    #[error("task {0} cannot wait on itself")]
    SelfWait(TaskHandle),

    #[error("failed to map a {size} byte task stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("scheduler already initialized on this thread")]
    AlreadyInitialized,

    #[error("scheduler not initialized on this thread")]
    NotInitialized,
}
