//! Per-thread default scheduler with a free-function interface.
//!
//! `scheduler_init` installs a scheduler for the calling thread; the
//! `task_*` functions then act on it without a handle being passed around.

use std::cell::OnceCell;

use crate::{
    config::SchedulerConfig,
    error::SchedulerError,
    io::{Clock, InputSource},
    tasks::{scheduler::Scheduler, table::TaskHandle},
};

thread_local! {
    /// Scheduler installed on this thread by `scheduler_init`
    static SCHEDULER: OnceCell<Scheduler> = const { OnceCell::new() };
}

/// Initialize this thread's scheduler, making the caller the main task.
///
/// Must run once per thread before any other function in this module.
pub fn scheduler_init<I, C>(config: SchedulerConfig, input: I, clock: C) -> Result<(), SchedulerError>
where
    I: InputSource + 'static,
    C: Clock + 'static,
{
    SCHEDULER.with(|cell| {
        if cell.get().is_some() {
            return Err(SchedulerError::AlreadyInitialized);
        }
        cell.get_or_init(|| Scheduler::init(config, input, clock));
        Ok(())
    })
}

/// This thread's scheduler, if `scheduler_init` has run.
pub fn try_scheduler() -> Result<Scheduler, SchedulerError> {
    SCHEDULER.with(|cell| cell.get().cloned().ok_or(SchedulerError::NotInitialized))
}

/// This thread's scheduler.
///
/// # Panics
/// If `scheduler_init` has not run on this thread.
pub fn scheduler() -> Scheduler {
    match try_scheduler() {
        Ok(scheduler) => scheduler,
        Err(err) => panic!("{err}"),
    }
}

/// Create a task on this thread's scheduler.
pub fn task_create<F>(body: F) -> TaskHandle
where
    F: FnOnce() + 'static,
{
    scheduler().create(body)
}

/// Sleep the calling task for at least `ms` milliseconds.
pub fn task_sleep(ms: u64) {
    scheduler().sleep(ms)
}

/// Block the calling task until `handle` exits.
pub fn task_wait(handle: TaskHandle) {
    scheduler().wait_for(handle)
}

/// Block the calling task until a key arrives.
pub fn task_readchar() -> char {
    scheduler().read_input()
}

/// Yield until every other task has exited.
pub fn task_run() {
    scheduler().run()
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, thread};

    use super::*;
    use crate::io::{ManualClock, ScriptedInput};

    /// Run `f` on a fresh thread so it gets its own thread-local scheduler.
    fn on_fresh_thread(f: impl FnOnce() + Send + 'static) {
        thread::spawn(f).join().expect("test thread panicked");
    }

    #[test]
    fn init_runs_once_per_thread() {
        on_fresh_thread(|| {
            assert!(matches!(try_scheduler(), Err(SchedulerError::NotInitialized)));
            scheduler_init(SchedulerConfig::default(), ScriptedInput::new(), ManualClock::new()).unwrap();
            assert!(matches!(
                scheduler_init(SchedulerConfig::default(), ScriptedInput::new(), ManualClock::new()),
                Err(SchedulerError::AlreadyInitialized)
            ));
            assert_eq!(scheduler().current(), TaskHandle::MAIN);
        });
    }

    #[test]
    fn free_functions_drive_the_thread_scheduler() {
        on_fresh_thread(|| {
            let input = ScriptedInput::new();
            scheduler_init(SchedulerConfig::default(), input.clone(), ManualClock::stepping(1)).unwrap();

            let log = Rc::new(RefCell::new(Vec::new()));
            let sleeper_log = log.clone();
            let sleeper = task_create(move || {
                sleeper_log.borrow_mut().push("sleeper start".to_string());
                task_sleep(5);
                sleeper_log.borrow_mut().push("sleeper done".to_string());
            });

            let reader_log = log.clone();
            task_create(move || {
                task_wait(sleeper);
                let key = task_readchar();
                reader_log.borrow_mut().push(format!("read {key}"));
            });

            input.push('z');
            task_run();

            assert_eq!(*log.borrow(), ["sleeper start", "sleeper done", "read z"]);
        });
    }

    #[test]
    fn using_the_api_before_init_panics() {
        let result = thread::spawn(|| task_sleep(1)).join();
        assert!(result.is_err());
    }
}
