//! Kernel-Call Message ABI
//!
//! A kernel call is a fixed-size message. `m_type` selects the call as
//! `KERNEL_CALL + call_nr`; the reply reuses the same message with `m_type`
//! replaced by the status code.
//!
//! ```text
//!   0..4    m_source   endpoint (filled in by the kernel)
//!   4..8    m_type     call number / status
//!   8..64   args[7]    call-specific, little endian u64 each
//! ```

use crate::config::NR_SYS_CALLS;
use crate::error::Fault;
use crate::proc::Endpoint;

use super::user::UserMemory;

/// Base of the kernel-call message types.
pub const KERNEL_CALL: i32 = 0x600;

/// Message type of a notification.
pub const NOTIFY_MESSAGE: i32 = 0x1000;

pub const SYS_SCHEDULE: i32 = KERNEL_CALL + 3;
pub const SYS_PRIVCTL: i32 = KERNEL_CALL + 4;
pub const SYS_KILL: i32 = KERNEL_CALL + 6;
pub const SYS_GETKSIG: i32 = KERNEL_CALL + 7;
pub const SYS_ENDKSIG: i32 = KERNEL_CALL + 8;
pub const SYS_VMCTL: i32 = KERNEL_CALL + 43;
pub const SYS_DIAGCTL: i32 = KERNEL_CALL + 44;
pub const SYS_CAPCTL: i32 = KERNEL_CALL + 56;

/// Number of argument words in a message.
pub const MSG_ARGS: usize = 7;

/// Kernel-call vector index for a message type, if in range.
pub fn call_nr(m_type: i32) -> Option<usize> {
    let nr = m_type.checked_sub(KERNEL_CALL)?;
    usize::try_from(nr).ok().filter(|&nr| nr < NR_SYS_CALLS)
}

/// A kernel-call request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub source: Endpoint,
    pub m_type: i32,
    pub args: [u64; MSG_ARGS],
}

impl Default for Message {
    fn default() -> Self {
        Self {
            source: Endpoint::NONE,
            m_type: 0,
            args: [0; MSG_ARGS],
        }
    }
}

impl Message {
    /// Size of a message in user memory.
    pub const SIZE: usize = 64;

    /// Offset of `m_type` in user memory.
    pub const M_TYPE_OFFSET: usize = 4;

    /// Request for kernel call `m_type` with the given arguments.
    pub fn call(m_type: i32, args: &[u64]) -> Self {
        let mut msg = Self {
            m_type,
            ..Self::default()
        };
        for (slot, &a) in msg.args.iter_mut().zip(args) {
            *slot = a;
        }
        msg
    }

    /// Argument `i` read as an endpoint.
    #[inline]
    pub fn endpoint_arg(&self, i: usize) -> Endpoint {
        Endpoint(self.args[i] as i32)
    }

    /// Argument `i` read as a signed 32-bit value.
    #[inline]
    pub fn int_arg(&self, i: usize) -> i32 {
        self.args[i] as i32
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.source.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.m_type.to_le_bytes());
        for (i, a) in self.args.iter().enumerate() {
            let off = 8 + i * 8;
            out[off..off + 8].copy_from_slice(&a.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> Self {
        let word = |off: usize| [b[off], b[off + 1], b[off + 2], b[off + 3]];
        let mut args = [0u64; MSG_ARGS];
        for (i, a) in args.iter_mut().enumerate() {
            let off = 8 + i * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&b[off..off + 8]);
            *a = u64::from_le_bytes(raw);
        }
        Self {
            source: Endpoint(i32::from_le_bytes(word(0))),
            m_type: i32::from_le_bytes(word(4)),
            args,
        }
    }

    /// Copy a message in from the memory of `owner`.
    pub fn copy_from_user(
        mem: &dyn UserMemory,
        owner: Endpoint,
        addr: u64,
    ) -> Result<Self, Fault> {
        let mut raw = [0u8; Self::SIZE];
        mem.copy_from(owner, addr, &mut raw)?;
        Ok(Self::from_bytes(&raw))
    }

    /// Copy this message out to the memory of `owner`.
    pub fn copy_to_user(
        &self,
        mem: &mut dyn UserMemory,
        owner: Endpoint,
        addr: u64,
    ) -> Result<(), Fault> {
        mem.copy_to(owner, addr, &self.to_bytes())
    }
}
