//! Process State Flags

use bitflags::bitflags;

bitflags! {
    /// Runtime flags. A process is runnable only when none is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RtsFlags: u32 {
        /// Slot is not in use.
        const SLOT_FREE   = 1 << 0;
        /// Stopped by a tracer or the process manager.
        const PROC_STOP   = 1 << 1;
        /// Blocked trying to send.
        const SENDING     = 1 << 2;
        /// Blocked waiting for a message.
        const RECEIVING   = 1 << 3;
        /// A signal is queued for the signal manager.
        const SIGNALED    = 1 << 4;
        /// Signal manager has not finished with this process.
        const SIG_PENDING = 1 << 5;
        /// Privileges are being set up; may not run.
        const NO_PRIV     = 1 << 6;
        /// Process is exiting; its endpoint is no longer valid.
        const NO_ENDPOINT = 1 << 7;
        /// Waiting on the VM service.
        const VMREQUEST   = 1 << 8;
        /// Scheduling parameters are being changed.
        const NO_QUANTUM  = 1 << 9;
    }
}

bitflags! {
    /// Miscellaneous per-process flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MiscFlags: u32 {
        /// A suspended kernel call is waiting for `resume`.
        const KCALL_RESUME = 1 << 0;
        /// Delivery of a signal was postponed.
        const SIG_DELAY    = 1 << 1;
        /// Scheduled with lowered priority.
        const NICED        = 1 << 2;
    }
}
