//! Collaborators the scheduler polls: a millisecond clock and a
//! non-blocking key source.
//!
//! This module provides:
//! - The [`Clock`] and [`InputSource`] seams
//! - A monotonic wall clock and a manual clock for simulations
//! - Raw-mode terminal input, scripted input, and no input at all

pub mod clock;
pub mod input;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use input::{InputSource, NoInput, ScriptedInput, TerminalInput};
