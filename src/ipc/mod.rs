//! IPC State Cleanup
//!
//! When a process exits, or loses its privileges, every trace of it in the
//! IPC state of other processes must go: queued sends, pending
//! notifications, asynchronous messages and blocked peers.
//!
//! # Ordering
//! ```text
//!   clear_endpoint
//!     -> mark NO_ENDPOINT
//!     -> clear_ipc       (own send/receive state)
//!     -> clear_ipc_refs  (other processes' references to it)
//!     -> clear_memreq    (pending VM request)
//! ```

pub mod cleanup;
