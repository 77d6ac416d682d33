//! Kernel-Call Interface
//!
//! Privileged processes request kernel services by trapping with a pointer
//! to a fixed-size message. The dispatcher copies it in, checks the caller's
//! call mask, runs the handler mapped in the call vector and copies the reply
//! back out.
//!
//! # Security Model
//! - Whitelist approach: a call runs only if the caller's mask allows it
//!   and a handler is mapped
//! - All parameters are copied in and validated before use
//! - Invalid inputs return errors; bad pointers raise `SIGSEGV`
//!
//! # Built-in Calls
//! - `SYS_SCHEDULE` - set priority, quantum and CPU
//! - `SYS_PRIVCTL` - privilege and resource control
//! - `SYS_KILL` - raise a signal
//! - `SYS_GETKSIG` / `SYS_ENDKSIG` - signal manager protocol
//! - `SYS_VMCTL` - VM finished a suspended request
//! - `SYS_DIAGCTL` - diagnostics
//! - `SYS_CAPCTL` - capability derivation graph

pub mod calls;
pub mod dispatch;
pub mod message;
pub mod table;
pub mod user;

pub use dispatch::{CallOutcome, Completion};
pub use message::Message;
pub use table::{CallHandler, CallTable};
pub use user::{FlatMemory, UserMemory};
