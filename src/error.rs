//! Kernel Error Codes
//!
//! Every recoverable failure in the kernel core is a [`KernelError`]. The
//! dispatcher turns it into the negative status code written back to the
//! caller's reply message, so each variant maps to exactly one ABI value.
//!
//! Invariant breaches are not represented here: they panic.

use core::fmt;

use crate::cap::DagError;

/// ABI status codes carried in `m_type` of a kernel-call reply.
pub mod errno {
    /// Success.
    pub const OK: i32 = 0;
    /// Operation not permitted.
    pub const EPERM: i32 = -1;
    /// Bad address.
    pub const EFAULT: i32 = -14;
    /// Out of memory (pool or fixed table exhausted).
    pub const ENOMEM: i32 = -12;
    /// Resource busy.
    pub const EBUSY: i32 = -16;
    /// Invalid argument.
    pub const EINVAL: i32 = -22;
    /// No space left in a fixed table.
    pub const ENOSPC: i32 = -28;
    /// Source or destination is not alive.
    pub const EDEADSRCDST: i32 = -105;
    /// Caller lacks the kernel-call permission bit.
    pub const ECALLDENIED: i32 = -106;
    /// Kernel-call slot has no handler.
    pub const EBADREQUEST: i32 = -107;
    /// Target CPU does not exist or is not ready.
    pub const EBADCPU: i32 = -108;
    /// Handler already arranged the reply (or none is due).
    pub const EDONTREPLY: i32 = -201;
    /// Call suspended pending a VM round trip.
    pub const VMSUSPEND: i32 = -996;
}

/// Recoverable kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Argument out of range or malformed user input.
    InvalidArgument,
    /// Requested static slot is already bound.
    Busy,
    /// Dynamic pool has no free slot.
    NoSpace,
    /// Bounded pool (IPC filters) is exhausted.
    OutOfMemory,
    /// Fixed per-process resource table (IRQ, I/O, memory) is full.
    ResourceExhausted,
    /// Caller is not allowed to perform this request.
    NotPermitted,
    /// Caller's kernel-call mask does not include the call.
    CallDenied,
    /// The call vector has no handler for the call.
    BadRequest,
    /// Peer process is dead or has no valid endpoint.
    DeadSrcDst,
    /// Scheduling target CPU is not usable.
    BadCpu,
    /// User memory could not be accessed.
    Fault,
    /// Capability DAG refused the operation.
    Capability(DagError),
}

impl KernelError {
    /// ABI status code for this error.
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => errno::EINVAL,
            Self::Busy => errno::EBUSY,
            Self::NoSpace => errno::ENOSPC,
            Self::OutOfMemory | Self::ResourceExhausted => errno::ENOMEM,
            Self::NotPermitted => errno::EPERM,
            Self::CallDenied => errno::ECALLDENIED,
            Self::BadRequest => errno::EBADREQUEST,
            Self::DeadSrcDst => errno::EDEADSRCDST,
            Self::BadCpu => errno::EBADCPU,
            Self::Fault => errno::EFAULT,
            Self::Capability(e) => e.status_code(),
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Busy => write!(f, "slot already bound"),
            Self::NoSpace => write!(f, "no free slot"),
            Self::OutOfMemory => write!(f, "pool exhausted"),
            Self::ResourceExhausted => write!(f, "resource table full"),
            Self::NotPermitted => write!(f, "operation not permitted"),
            Self::CallDenied => write!(f, "kernel call denied"),
            Self::BadRequest => write!(f, "unmapped kernel call"),
            Self::DeadSrcDst => write!(f, "dead source or destination"),
            Self::BadCpu => write!(f, "bad cpu"),
            Self::Fault => write!(f, "bad user address"),
            Self::Capability(e) => write!(f, "capability: {}", e),
        }
    }
}

impl From<DagError> for KernelError {
    fn from(e: DagError) -> Self {
        Self::Capability(e)
    }
}

/// A user address the kernel could not read or write.
///
/// This is not returned to the faulting process. The kernel-call path hands
/// it to signal delivery, which raises `SIGSEGV` on the offender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    /// Offending user virtual address.
    pub addr: u64,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad user pointer {:#x}", self.addr)
    }
}

impl From<Fault> for KernelError {
    fn from(_: Fault) -> Self {
        Self::Fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(KernelError::CallDenied.errno(), errno::ECALLDENIED);
        assert_eq!(KernelError::ResourceExhausted.errno(), errno::ENOMEM);
        assert_eq!(
            KernelError::Capability(DagError::CycleDetected).errno(),
            crate::cap::KCAP_CYCLE_DETECTED
        );
    }

    #[test]
    fn test_fault_converts() {
        let e: KernelError = Fault { addr: 0 }.into();
        assert_eq!(e, KernelError::Fault);
    }
}
