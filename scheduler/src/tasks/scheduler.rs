//! Task scheduler for cooperative multitasking.
//!
//! Provides round-robin scheduling of closures on their own stacks. The
//! scheduler is entered only from the blocking primitives and from the
//! exit finalizer of a task whose body returned.

use std::{fmt, rc::Rc};

use spin::Mutex;

use super::{
    context::{self, Entry, ExecutionContext},
    stack::Stack,
    table::{Decision, TaskHandle, TaskRecord, TaskState, TaskTable, WaitReason},
};
use crate::{
    config::SchedulerConfig,
    error::SchedulerError,
    io::{Clock, InputSource},
};

/// Handle to a scheduler running on the current thread.
///
/// Clones share the same task table, so task bodies capture a clone to call
/// the blocking primitives. The handle is neither `Send` nor `Sync`: every
/// task runs on the thread that initialized the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    table: Mutex<TaskTable>,
    config: SchedulerConfig,
}

/// How a pass through the scheduler loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dispatch {
    /// Another task ran and has since switched back
    Switched,
    /// The calling task kept running without a switch
    Resumed,
    /// No other task is left
    AllExited,
}

impl Scheduler {
    /// Initialize a scheduler with the calling flow of control as the
    /// running main task (handle 0).
    pub fn init<I, C>(config: SchedulerConfig, input: I, clock: C) -> Self
    where
        I: InputSource + 'static,
        C: Clock + 'static,
    {
        let config = config.normalized();
        let table = TaskTable::new(config.capacity, Box::new(input), Box::new(clock));
        info!(
            "scheduler initialized: {} task slots, {} byte stacks",
            config.capacity, config.stack_size
        );
        Scheduler {
            inner: Rc::new(Inner {
                table: Mutex::new(table),
                config,
            }),
        }
    }

    /// Create a new task running `body` and add it to the scheduler.
    ///
    /// The task starts `Ready`; it first runs when the scheduler picks it.
    ///
    /// # Panics
    /// When the task table is full or a stack cannot be mapped.
    pub fn create<F>(&self, body: F) -> TaskHandle
    where
        F: FnOnce() + 'static,
    {
        match self.try_create(body) {
            Ok(handle) => handle,
            Err(err) => {
                error!("task creation failed: {}", err);
                panic!("{err}");
            }
        }
    }

    /// Like [`Scheduler::create`], but reports failures.
    pub fn try_create<F>(&self, body: F) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() + 'static,
    {
        let stack_size = self.inner.config.stack_size;
        let mut table = self.inner.table.lock();
        if table.is_full() {
            return Err(SchedulerError::CapacityExhausted {
                capacity: table.capacity(),
            });
        }

        let map_stack = || {
            Stack::new(stack_size).map_err(|source| SchedulerError::StackAllocation {
                size: stack_size,
                source,
            })
        };

        // The finalizer borrows the scheduler state through a raw pointer:
        // it only runs while some task is suspended inside a method on a
        // live handle, so the state outlives it.
        let inner: *const Inner = Rc::as_ptr(&self.inner);
        let finalizer: Entry = Box::new(move || unsafe { (*inner).finish_current() });
        let exit = ExecutionContext::new(map_stack()?, finalizer, None);
        let body = ExecutionContext::new(map_stack()?, Box::new(body), Some(exit.as_ptr()));

        let handle = table.push(TaskRecord {
            state: TaskState::Ready,
            body,
            _exit: Some(exit),
            last_input: None,
        });
        debug!("created task {}", handle);
        Ok(handle)
    }

    /// Suspend the calling task for at least `ms` milliseconds.
    ///
    /// `sleep(0)` still gives every other runnable task a turn first.
    pub fn sleep(&self, ms: u64) {
        {
            let mut table = self.inner.table.lock();
            let wake_at = table.now_ms().saturating_add(ms);
            table.set_current_state(TaskState::Waiting(WaitReason::Sleep { wake_at }));
        }
        self.inner.schedule(false);
    }

    /// Block the calling task until `handle` has exited.
    ///
    /// Waiting on a task that already exited still goes through one
    /// scheduling round.
    ///
    /// # Panics
    /// When `handle` was never created or names the calling task.
    pub fn wait_for(&self, handle: TaskHandle) {
        if let Err(err) = self.try_wait_for(handle) {
            error!("invalid wait: {}", err);
            panic!("{err}");
        }
    }

    /// Like [`Scheduler::wait_for`], but rejects bad handles without blocking.
    pub fn try_wait_for(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        {
            let mut table = self.inner.table.lock();
            if !table.contains(handle) {
                return Err(SchedulerError::InvalidHandle(handle));
            }
            if handle == table.current() {
                return Err(SchedulerError::SelfWait(handle));
            }
            table.set_current_state(TaskState::Waiting(WaitReason::Task(handle)));
        }
        self.inner.schedule(false);
        Ok(())
    }

    /// Block the calling task until a key arrives, and return it.
    pub fn read_input(&self) -> char {
        {
            let mut table = self.inner.table.lock();
            table.set_current_state(TaskState::Waiting(WaitReason::Input));
        }
        self.inner.schedule(false);

        let mut table = self.inner.table.lock();
        match table.take_current_input() {
            Some(key) => key,
            None => {
                let current = table.current();
                drop(table);
                error!("task {} resumed from input wait without a key", current);
                unreachable!("task {current} resumed from input wait without a key");
            }
        }
    }

    /// Yield until every other task has exited.
    ///
    /// This is how the main task drives the scheduler to completion. It
    /// returns without switching if nothing else is left.
    pub fn run(&self) {
        loop {
            self.inner.table.lock().set_current_state(TaskState::Ready);
            if self.inner.schedule(true) == Dispatch::AllExited {
                self.inner.table.lock().set_current_state(TaskState::Running);
                info!("all tasks exited");
                return;
            }
        }
    }

    /// Handle of the task that is running.
    pub fn current(&self) -> TaskHandle {
        self.inner.table.lock().current()
    }

    /// State of `handle`, or `None` if it was never created.
    pub fn state(&self, handle: TaskHandle) -> Option<TaskState> {
        self.inner.table.lock().state(handle)
    }

    /// Number of tasks created so far, counting the main task.
    pub fn task_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.table.lock();
        f.debug_struct("Scheduler")
            .field("current", &table.current())
            .field("tasks", &table.len())
            .field("capacity", &table.capacity())
            .finish()
    }
}

impl Inner {
    /// The scheduler loop: poll until some task can run, then switch to it.
    ///
    /// The table lock is released before switching, so the next task can
    /// take it.
    fn schedule(&self, yielding: bool) -> Dispatch {
        let (from, to) = loop {
            let decision = self.table.lock().next_decision(yielding);
            match decision {
                Decision::Switch { from, to } => break (from, to),
                Decision::Resume => return Dispatch::Resumed,
                Decision::AllExited => return Dispatch::AllExited,
                Decision::Idle => core::hint::spin_loop(),
            }
        };

        unsafe { context::switch(from, to) };
        Dispatch::Switched
    }

    /// Runs on a task's exit context once its body has returned.
    fn finish_current(&self) {
        let current = {
            let mut table = self.table.lock();
            table.set_current_state(TaskState::Exited);
            table.current()
        };
        debug!("task {} exited", current);

        // The main task never exits, so some task is always left to run.
        let dispatch = self.schedule(false);
        error!("exit of task {} ended the scheduler loop with {:?}", current, dispatch);
    }
}
