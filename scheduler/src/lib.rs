/*
Copyright © 2024–2025 Mako and JayAndJef

This file is part of coop.

coop is free software: you can redistribute it and/or modify it under the terms of the GNU General
Public License as published by the Free Software Foundation, either version 3 of the License, or (at
your option) any later version.

coop is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public
License for more details.

You should have received a copy of the GNU General Public License along with coop. If not, see
<https://www.gnu.org/licenses/>.
*/

//! Cooperative user-level task scheduler.
//!
//! Tasks are closures running on their own stacks, multiplexed onto the
//! calling thread. A task runs until it calls one of the blocking
//! primitives on [`Scheduler`] (`sleep`, `wait_for`, `read_input`, `run`)
//! or returns from its body.

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod global;
pub mod io;
pub mod tasks;

pub use config::{MAX_TASKS, MIN_STACK_SIZE, STACK_SIZE, SchedulerConfig};
pub use error::SchedulerError;
pub use io::{Clock, InputSource, ManualClock, MonotonicClock, NoInput, ScriptedInput, TerminalInput};
pub use tasks::scheduler::Scheduler;
pub use tasks::table::{TaskHandle, TaskState, WaitReason};
