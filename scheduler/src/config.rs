//! Scheduler sizing.

/// Upper limit on the number of tasks, including the main task.
pub const MAX_TASKS: usize = 128;

/// Default size of each task stack in bytes.
pub const STACK_SIZE: usize = 64 * 1024;

/// Smallest stack a task may be given.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Fixed sizing of a scheduler instance.
///
/// `capacity` counts the main task, so a capacity of 1 leaves no room for
/// created tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub capacity: usize,
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            capacity: MAX_TASKS,
            stack_size: STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn with_capacity(self, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..self
        }
    }

    pub fn with_stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: stack_size.max(MIN_STACK_SIZE),
            ..self
        }
    }

    /// Clamps fields that were set directly rather than through the builders.
    pub(crate) fn normalized(self) -> Self {
        Self {
            capacity: self.capacity.max(1),
            stack_size: self.stack_size.max(MIN_STACK_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_clamp_to_minimums() {
        let config = SchedulerConfig::default().with_capacity(0).with_stack_size(1);
        assert_eq!(config.capacity, 1);
        assert_eq!(config.stack_size, MIN_STACK_SIZE);
    }

    #[test]
    fn normalized_fixes_direct_field_writes() {
        let config = SchedulerConfig {
            capacity: 0,
            stack_size: 0,
        }
        .normalized();
        assert_eq!(config, SchedulerConfig::default().with_capacity(1).with_stack_size(0));
    }
}
