//! Task records, the fixed-capacity task table, and the readiness scan.

use core::{fmt, ptr::NonNull};

use super::context::{ExecutionContext, OwnedContext};
use crate::io::{Clock, InputSource};

/// Identifies a task for as long as its scheduler lives.
///
/// Handles are table indices. They are handed out in creation order and
/// never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(usize);

impl TaskHandle {
    /// The flow of control that initialized the scheduler.
    pub const MAIN: TaskHandle = TaskHandle(0);

    pub const fn index(self) -> usize {
        self.0
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        TaskHandle(index)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a task
/// - Running: the task whose code is executing
/// - Ready: runnable, waiting for its turn
/// - Waiting: blocked until its wait reason resolves
/// - Exited: its body returned; terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Waiting(WaitReason),
    Exited,
}

/// Why are we waiting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitReason {
    /// Asleep until the clock reads at least `wake_at`
    Sleep { wake_at: u64 },
    /// Blocked until a key is delivered
    Input,
    /// Blocked until the task exits
    Task(TaskHandle),
}

/// Everything the scheduler knows about one task
pub(crate) struct TaskRecord {
    pub state: TaskState,
    /// where the task's own code resumes
    pub body: OwnedContext,
    /// finalizer the body falls through to, held until the table drops; the main task has none
    pub _exit: Option<OwnedContext>,
    /// key delivered while blocked on input, until `read_input` takes it
    pub last_input: Option<char>,
}

impl TaskRecord {
    pub fn main() -> Self {
        TaskRecord {
            state: TaskState::Running,
            body: OwnedContext::from(ExecutionContext::current()),
            _exit: None,
            last_input: None,
        }
    }
}

/// Outcome of one pass of the readiness scan
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    /// Switch from the first context to the second
    Switch {
        from: NonNull<ExecutionContext>,
        to: NonNull<ExecutionContext>,
    },
    /// The current task may continue without a switch
    Resume,
    /// Every other task has exited; control goes back to the caller
    AllExited,
    /// Nothing can run yet; poll again
    Idle,
}

/// Fixed-capacity task table plus the collaborators the scan polls
pub(crate) struct TaskTable {
    tasks: Vec<TaskRecord>,
    capacity: usize,
    current: TaskHandle,
    input: Box<dyn InputSource>,
    clock: Box<dyn Clock>,
}

impl TaskTable {
    /// A table holding only the main task, which is running.
    pub fn new(capacity: usize, input: Box<dyn InputSource>, clock: Box<dyn Clock>) -> Self {
        let mut tasks = Vec::with_capacity(capacity);
        tasks.push(TaskRecord::main());
        TaskTable {
            tasks,
            capacity,
            current: TaskHandle::MAIN,
            input,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    pub fn current(&self) -> TaskHandle {
        self.current
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn contains(&self, handle: TaskHandle) -> bool {
        handle.0 < self.tasks.len()
    }

    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.tasks.get(handle.0).map(|task| task.state)
    }

    /// Appends a record and returns its handle. The caller checks capacity.
    pub fn push(&mut self, record: TaskRecord) -> TaskHandle {
        debug_assert!(!self.is_full());
        let handle = TaskHandle(self.tasks.len());
        self.tasks.push(record);
        handle
    }

    /// Set the current task's state.
    pub fn set_current_state(&mut self, state: TaskState) {
        let current = self.current.0;
        self.tasks[current].state = state;
    }

    /// Take the key delivered to the current task.
    pub fn take_current_input(&mut self) -> Option<char> {
        let current = self.current.0;
        self.tasks[current].last_input.take()
    }

    /// One pass of the readiness scan.
    ///
    /// `yielding` is set when the current task entered the loop without a
    /// wait condition of its own; only then does an otherwise empty table
    /// end in [`Decision::AllExited`].
    pub fn next_decision(&mut self, yielding: bool) -> Decision {
        let now = self.clock.now_ms();

        // Input for the main task is checked on every pass, whoever's turn it is.
        if self.tasks[TaskHandle::MAIN.0].state == TaskState::Waiting(WaitReason::Input) {
            if let Some(key) = self.input.poll_key() {
                let main = &mut self.tasks[TaskHandle::MAIN.0];
                main.last_input = Some(key);
                main.state = TaskState::Ready;
                trace!("delivered {:?} to the main task", key);
            }
        }

        let count = self.tasks.len();
        let current = self.current.0;
        let mut exited = 0;
        for offset in 1..count {
            let index = (current + offset) % count;
            if self.tasks[index].state == TaskState::Exited {
                exited += 1;
            } else if self.poll_eligible(index, now) {
                return self.switch_to(index);
            }
        }

        let current_state = self.tasks[current].state;
        if exited == count - 1 && (yielding || current_state == TaskState::Exited) {
            return Decision::AllExited;
        }

        if self.poll_eligible(current, now) {
            self.tasks[current].state = TaskState::Running;
            return Decision::Resume;
        }

        Decision::Idle
    }

    /// Whether the task at `index` can run now, delivering input if it was
    /// waiting for some.
    fn poll_eligible(&mut self, index: usize, now: u64) -> bool {
        match self.tasks[index].state {
            TaskState::Ready => true,
            TaskState::Waiting(WaitReason::Sleep { wake_at }) => now >= wake_at,
            TaskState::Waiting(WaitReason::Input) => match self.input.poll_key() {
                Some(key) => {
                    self.tasks[index].last_input = Some(key);
                    trace!("delivered {:?} to task #{}", key, index);
                    true
                }
                None => false,
            },
            TaskState::Waiting(WaitReason::Task(target)) => self.tasks[target.0].state == TaskState::Exited,
            TaskState::Running | TaskState::Exited => false,
        }
    }

    fn switch_to(&mut self, index: usize) -> Decision {
        let previous = self.current.0;
        if self.tasks[previous].state == TaskState::Running {
            self.tasks[previous].state = TaskState::Ready;
        }
        self.tasks[index].state = TaskState::Running;
        self.current = TaskHandle(index);

        trace!("switching from task #{} to task #{}", previous, index);
        Decision::Switch {
            from: self.tasks[previous].body.as_ptr(),
            to: self.tasks[index].body.as_ptr(),
        }
    }
}
