//! kcapgate - Kernel-Call Core of a Capability Microkernel
//!
//! The part of a microkernel that decides what a system process may do:
//! the capability derivation graph, per-process privileges, the
//! kernel-call dispatcher and the signal and cleanup paths around it.
//!
//! # Security Features
//! - Rights only narrow and security levels only rise along a derivation
//! - Kernel calls gated by a per-process call mask before dispatch
//! - Send permissions, IPC filters and hardware resources per privilege slot
//! - Stale endpoints never resolve after a slot is reused
//!
//! # Architecture
//! - `no_std`, no heap: every table is a fixed-capacity arena
//! - Handles are plain indices (`NodeRef`, `ProcNr`, `PrivId`, `FilterId`)
//! - [`Kernel`] owns all state; user memory is reached through
//!   [`syscall::UserMemory`]
//! - Console and diagnostics go through the `log` facade

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

#[doc(hidden)]
pub use log as __log;

pub mod cap;
pub mod config;
pub mod console;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod privilege;
pub mod proc;
pub mod signal;
pub mod syscall;

#[cfg(test)]
mod test_utils;

pub use error::{Fault, KernelError};
pub use kernel::Kernel;
