//! Execution contexts and the low-level context switch.
//!
//! A context is the saved callee-saved register file of a suspended flow of
//! control, plus the stack it runs on. Switching saves the caller's
//! registers into one context and resumes another; the caller only regains
//! control when something switches back to it.

use core::{arch::naked_asm, ptr::NonNull};
use std::{
    panic::{self, AssertUnwindSafe},
    process,
};

use super::stack::Stack;

/// Body of a fresh context.
pub type Entry = Box<dyn FnOnce() + 'static>;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("context switching is only implemented for x86_64 and aarch64");

/// Callee-saved state of the x86_64 System V ABI
#[cfg(target_arch = "x86_64")]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
struct Registers {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    mxcsr: u32,
    fpu_control: u16,
}

/// Callee-saved state of the AArch64 procedure call standard
#[cfg(target_arch = "aarch64")]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
struct Registers {
    sp: u64,
    // x19..=x28, then frame pointer and link register
    x: [u64; 12],
    // low halves of v8..=v15
    d: [u64; 8],
}

/// A resumable point of execution.
pub struct ExecutionContext {
    regs: Registers,
    entry: Option<Entry>,
    on_return: Option<NonNull<ExecutionContext>>,
    stack: Option<Stack>,
}

impl ExecutionContext {
    /// An empty context for the flow of control that is already running.
    ///
    /// Its registers are filled in the first time it is switched away from.
    pub fn current() -> Self {
        ExecutionContext {
            regs: Registers::default(),
            entry: None,
            on_return: None,
            stack: None,
        }
    }

    /// A never-run context that starts in `entry` on `stack`.
    ///
    /// If `entry` returns, control switches to `on_return`. A context with
    /// no `on_return` must never let its entry return.
    pub fn new(stack: Stack, entry: Entry, on_return: Option<NonNull<ExecutionContext>>) -> OwnedContext {
        let context = OwnedContext::from(ExecutionContext {
            regs: Registers::default(),
            entry: Some(entry),
            on_return,
            stack: Some(stack),
        });
        unsafe { prepare(context.as_ptr()) };
        context
    }

    pub fn has_started(&self) -> bool {
        self.entry.is_none()
    }

    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }
}

/// Heap-pinned context, freed on drop.
///
/// Contexts are handed to the switch as raw pointers while other code may
/// also hold the owner, so the box is kept as a raw allocation instead of a
/// `Box` that would claim unique access.
pub struct OwnedContext(NonNull<ExecutionContext>);

impl From<ExecutionContext> for OwnedContext {
    fn from(context: ExecutionContext) -> Self {
        OwnedContext(NonNull::from(Box::leak(Box::new(context))))
    }
}

impl OwnedContext {
    pub fn as_ptr(&self) -> NonNull<ExecutionContext> {
        self.0
    }

    pub fn get(&self) -> &ExecutionContext {
        unsafe { self.0.as_ref() }
    }
}

impl Drop for OwnedContext {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Lay out the initial stack frame so the first switch lands in `context_start`.
///
/// # Safety
/// `context` must be valid, own a stack, and never have been switched to.
#[cfg(target_arch = "x86_64")]
unsafe fn prepare(context: NonNull<ExecutionContext>) {
    let context = context.as_ptr();
    let Some(top) = (unsafe { (*context).stack.as_ref() }).map(Stack::top) else {
        return;
    };

    // `ret` pops the start address, leaving rsp 16-byte aligned for the call
    // `context_start` makes.
    let frame = top - 24u64;
    unsafe {
        frame.as_mut_ptr::<u64>().write(context_start as usize as u64);
        (*context).regs = Registers {
            rsp: frame.as_u64(),
            r12: context as u64,
            mxcsr: 0x1F80,
            fpu_control: 0x037F,
            ..Registers::default()
        };
    }
}

/// Lay out the initial registers so the first switch lands in `context_start`.
///
/// # Safety
/// `context` must be valid, own a stack, and never have been switched to.
#[cfg(target_arch = "aarch64")]
unsafe fn prepare(context: NonNull<ExecutionContext>) {
    let context = context.as_ptr();
    let Some(top) = (unsafe { (*context).stack.as_ref() }).map(Stack::top) else {
        return;
    };

    let mut regs = Registers {
        sp: top.as_u64(),
        ..Registers::default()
    };
    // x19 carries the context, x30 is where `ret` goes
    regs.x[0] = context as u64;
    regs.x[11] = context_start as usize as u64;
    unsafe { (*context).regs = regs };
}

/// Save the running flow into `from` and resume `to`.
///
/// Returns when some later switch names `from` as its target.
///
/// # Safety
/// Both contexts must be valid for the whole time either is suspended, and
/// `to` must be either prepared or previously saved by a switch.
pub unsafe fn switch(from: NonNull<ExecutionContext>, to: NonNull<ExecutionContext>) {
    unsafe {
        swap_registers(
            &raw mut (*from.as_ptr()).regs,
            &raw const (*to.as_ptr()).regs,
        )
    }
}

#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn swap_registers(_old: *mut Registers, _new: *const Registers) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr dword ptr [rdi + 0x38]",
        "fnstcw word ptr [rdi + 0x3C]",
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr dword ptr [rsi + 0x38]",
        "fldcw word ptr [rsi + 0x3C]",
        // a resumed context returns into its `switch`, a fresh one pops
        // `context_start`
        "ret",
    );
}

#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn swap_registers(_old: *mut Registers, _new: *const Registers) {
    naked_asm!(
        "mov x9, sp",
        "str x9, [x0, #0]",
        "stp x19, x20, [x0, #8]",
        "stp x21, x22, [x0, #24]",
        "stp x23, x24, [x0, #40]",
        "stp x25, x26, [x0, #56]",
        "stp x27, x28, [x0, #72]",
        "stp x29, x30, [x0, #88]",
        "stp d8, d9, [x0, #104]",
        "stp d10, d11, [x0, #120]",
        "stp d12, d13, [x0, #136]",
        "stp d14, d15, [x0, #152]",
        "ldr x9, [x1, #0]",
        "mov sp, x9",
        "ldp x19, x20, [x1, #8]",
        "ldp x21, x22, [x1, #24]",
        "ldp x23, x24, [x1, #40]",
        "ldp x25, x26, [x1, #56]",
        "ldp x27, x28, [x1, #72]",
        "ldp x29, x30, [x1, #88]",
        "ldp d8, d9, [x1, #104]",
        "ldp d10, d11, [x1, #120]",
        "ldp d12, d13, [x1, #136]",
        "ldp d14, d15, [x1, #152]",
        "ret",
    );
}

/// First instruction of every fresh context.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn context_start() {
    naked_asm!(
        "xor ebp, ebp",
        "mov rdi, r12",
        "call {run_entry}",
        "ud2",
        run_entry = sym run_entry,
    );
}

/// First instruction of every fresh context.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn context_start() {
    naked_asm!(
        "mov x29, xzr",
        "mov x0, x19",
        "bl {run_entry}",
        "brk #0",
        run_entry = sym run_entry,
    );
}

/// Run a context's entry, then hand control to its successor.
unsafe extern "C" fn run_entry(context: *mut ExecutionContext) -> ! {
    let entry = unsafe { (*context).entry.take() };
    if let Some(entry) = entry {
        if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
            error!("task panicked, aborting");
            process::abort();
        }
    }

    match unsafe { (*context).on_return } {
        Some(next) => unsafe {
            let from = NonNull::new_unchecked(context);
            switch(from, next);
        },
        None => {
            error!("context at {:p} returned with nowhere to go", context);
        }
    }

    error!("finished context at {:p} was resumed", context);
    process::abort();
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::config::STACK_SIZE;

    #[test]
    fn fresh_context_falls_through_to_on_return() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let main = OwnedContext::from(ExecutionContext::current());

        let task_log = log.clone();
        let task = ExecutionContext::new(
            Stack::new(STACK_SIZE).unwrap(),
            Box::new(move || task_log.borrow_mut().push("task")),
            Some(main.as_ptr()),
        );
        assert!(!task.get().has_started());

        log.borrow_mut().push("before");
        unsafe { switch(main.as_ptr(), task.as_ptr()) };
        log.borrow_mut().push("after");

        assert!(task.get().has_started());
        assert_eq!(*log.borrow(), ["before", "task", "after"]);
    }

    #[test]
    fn contexts_ping_pong() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let main = OwnedContext::from(ExecutionContext::current());
        let main_ptr = main.as_ptr();

        // the task needs its own pointer to switch away and be resumed
        let slot: Rc<RefCell<Option<NonNull<ExecutionContext>>>> = Rc::default();
        let task_slot = slot.clone();
        let task_log = log.clone();
        let task = ExecutionContext::new(
            Stack::new(STACK_SIZE).unwrap(),
            Box::new(move || {
                for round in 0..3 {
                    task_log.borrow_mut().push(format!("task {round}"));
                    let me = task_slot.borrow().expect("task pointer set");
                    unsafe { switch(me, main_ptr) };
                }
            }),
            Some(main_ptr),
        );
        *slot.borrow_mut() = Some(task.as_ptr());

        for round in 0..4 {
            log.borrow_mut().push(format!("main {round}"));
            unsafe { switch(main_ptr, task.as_ptr()) };
        }

        assert_eq!(
            *log.borrow(),
            ["main 0", "task 0", "main 1", "task 1", "main 2", "task 2", "main 3"]
        );
    }

    #[test]
    fn floating_point_state_survives_switches() {
        let main = OwnedContext::from(ExecutionContext::current());
        let result = Rc::new(RefCell::new(0.0f64));

        let task_result = result.clone();
        let task = ExecutionContext::new(
            Stack::new(STACK_SIZE).unwrap(),
            Box::new(move || {
                let value: f64 = (1..=10).map(|n| 1.0 / n as f64).sum();
                *task_result.borrow_mut() = value;
            }),
            Some(main.as_ptr()),
        );

        let before = std::hint::black_box(2.5f64) * 4.0;
        unsafe { switch(main.as_ptr(), task.as_ptr()) };
        assert_eq!(before, 10.0);
        assert!((*result.borrow() - 2.928_968_253_968_254).abs() < 1e-12);
    }

    #[test]
    fn owned_context_keeps_its_stack() {
        let main = OwnedContext::from(ExecutionContext::current());
        assert!(main.get().stack().is_none());

        let task = ExecutionContext::new(Stack::new(STACK_SIZE).unwrap(), Box::new(|| {}), None);
        let stack = task.get().stack().expect("fresh context owns a stack");
        assert!(stack.len() >= STACK_SIZE);
    }
}
