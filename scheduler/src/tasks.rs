//! Task management and cooperative multitasking.
//!
//! This module provides:
//! - Execution contexts and the context switch
//! - Guarded stack allocation for task contexts
//! - The task table and its readiness scan
//! - The scheduler handle and its blocking primitives

pub mod context;
pub mod scheduler;
pub mod stack;
pub mod table;
