//! User Memory Access
//!
//! Every byte the kernel reads from or writes to a process goes through
//! [`UserMemory`]. A failed access is a [`Fault`], never a panic.
//!
//! # Security Principles
//! - Validate the whole range before touching any byte
//! - Copy into kernel buffers before use (no TOCTOU on user data)
//! - Reject null, out-of-window and wrapping ranges

use crate::error::Fault;
use crate::proc::Endpoint;

/// Default window of user-accessible addresses.
pub mod regions {
    /// Start of user-accessible memory.
    pub const USER_START: u64 = 0x4000_0000;
    /// End of user-accessible memory (exclusive).
    pub const USER_END: u64 = 0x4008_0000;
}

/// Copy-in/copy-out service provided by the memory manager.
pub trait UserMemory {
    /// Copy `buf.len()` bytes at `addr` in the address space of `owner`.
    fn copy_from(&self, owner: Endpoint, addr: u64, buf: &mut [u8]) -> Result<(), Fault>;

    /// Copy `data` to `addr` in the address space of `owner`.
    fn copy_to(&mut self, owner: Endpoint, addr: u64, data: &[u8]) -> Result<(), Fault>;
}

/// Validate a user range against the window `[start, end)`.
///
/// Returns the offset of `addr` inside the window.
///
/// # Security Checks
/// 1. Pointer is not null
/// 2. Pointer is inside the window
/// 3. Pointer + length doesn't overflow
/// 4. End address is inside the window
pub fn validate_user_range(start: u64, end: u64, addr: u64, len: usize) -> Result<usize, Fault> {
    let fault = Fault { addr };
    if len == 0 {
        return Ok(addr.saturating_sub(start) as usize);
    }
    if addr == 0 {
        return Err(fault);
    }
    if addr < start || addr >= end {
        return Err(fault);
    }
    let last = addr.checked_add(len as u64).ok_or(fault)?;
    if last > end {
        return Err(fault);
    }
    Ok((addr - start) as usize)
}

/// One flat user region shared by every process, `N` bytes long and mapped
/// at [`regions::USER_START`].
///
/// Suitable for hosted kernels and tests; a paging kernel supplies its own
/// [`UserMemory`].
#[derive(Clone)]
pub struct FlatMemory<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FlatMemory<N> {
    /// Zero-filled region.
    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    /// First address past the region.
    pub const fn end() -> u64 {
        regions::USER_START + N as u64
    }

    /// Store bytes directly, as the owning process would.
    ///
    /// Panics if the range is outside the region.
    pub fn poke(&mut self, addr: u64, data: &[u8]) {
        match validate_user_range(regions::USER_START, Self::end(), addr, data.len()) {
            Ok(off) => self.bytes[off..off + data.len()].copy_from_slice(data),
            Err(f) => panic!("poke: {}", f),
        }
    }

    /// Read bytes directly.
    pub fn peek(&self, addr: u64, len: usize) -> &[u8] {
        match validate_user_range(regions::USER_START, Self::end(), addr, len) {
            Ok(off) => &self.bytes[off..off + len],
            Err(f) => panic!("peek: {}", f),
        }
    }
}

impl<const N: usize> Default for FlatMemory<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> UserMemory for FlatMemory<N> {
    fn copy_from(&self, _owner: Endpoint, addr: u64, buf: &mut [u8]) -> Result<(), Fault> {
        let off = validate_user_range(regions::USER_START, Self::end(), addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
        Ok(())
    }

    fn copy_to(&mut self, _owner: Endpoint, addr: u64, data: &[u8]) -> Result<(), Fault> {
        let off = validate_user_range(regions::USER_START, Self::end(), addr, data.len())?;
        self.bytes[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::regions::{USER_END, USER_START};
    use super::*;

    #[test]
    fn test_zero_length() {
        assert!(validate_user_range(USER_START, USER_END, 0x4000_1000, 0).is_ok());
    }

    #[test]
    fn test_null_pointer() {
        assert!(validate_user_range(USER_START, USER_END, 0, 100).is_err());
    }

    #[test]
    fn test_overflow() {
        assert!(validate_user_range(USER_START, u64::MAX, u64::MAX - 10, 100).is_err());
    }

    #[test]
    fn test_end_past_window() {
        assert!(validate_user_range(USER_START, USER_END, USER_END - 4, 4).is_ok());
        assert_eq!(
            validate_user_range(USER_START, USER_END, USER_END - 4, 5),
            Err(Fault { addr: USER_END - 4 })
        );
    }

    #[test]
    fn test_flat_memory_copy() {
        let mut mem = FlatMemory::<256>::new();
        let ep = Endpoint::SYSTEM;
        mem.copy_to(ep, USER_START + 16, b"gateway").unwrap();
        let mut buf = [0u8; 7];
        mem.copy_from(ep, USER_START + 16, &mut buf).unwrap();
        assert_eq!(&buf, b"gateway");
        assert!(mem.copy_from(ep, USER_START + 250, &mut buf).is_err());
    }
}
