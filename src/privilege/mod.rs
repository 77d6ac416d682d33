//! Privileges
//!
//! Per-process privilege structures: which kernel calls a process may make,
//! whom it may send to, which hardware it may touch, and which messages it
//! is willing to accept.
//!
//! # Design
//! - `PrivTable`: static ids for boot processes, a pool for the rest
//! - `SysMap` / `CallMask`: fixed bitmaps indexed by privilege id / call number
//! - `resources`: bounded IRQ, I/O port and memory range tables
//! - `filter`: whitelist/blacklist chains backed by a bounded pool
//!
//! # Security Properties
//! - A process without a call bit cannot reach the handler
//! - Send permission is granted per privilege id, never to self
//! - Resource tables never grow past their bounds

pub mod filter;
pub mod resources;
pub mod sysmap;
pub mod table;

pub use filter::{
    FilterId, FilterKind, FilterPool, IpcFilter, IpcFilterElement, IPCF_MATCH_M_SOURCE,
    IPCF_MATCH_M_TYPE,
};
pub use resources::{IoRange, MemRange};
pub use sysmap::{CallMask, SysMap};
pub use table::{
    PrivEntry, PrivFlags, PrivId, PrivRequest, PrivTable, TrapMask, SYSTEM_PRIV_ID,
};
