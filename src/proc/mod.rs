//! Process Table Interface
//!
//! The part of process management the kernel-call core depends on: slots,
//! endpoints, runtime flags, IPC blocking state and VM-request linkage.

pub mod endpoint;
pub mod flags;
pub mod table;

pub use endpoint::{
    Endpoint, ProcNr, ENDPOINT_SLOT_TOP, FIRST_DYNAMIC_PROC_NR, MAX_GENERATION, SYSTEM_PROC_NR,
    VM_PROC_NR,
};
pub use flags::{MiscFlags, RtsFlags};
pub use table::{Proc, ProcTable, VmRequest, VmRequestType};
