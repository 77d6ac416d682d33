//! Privilege Bitmaps
//!
//! `SysMap` holds one bit per privilege id (send permission, pending
//! notifications, pending asynchronous messages). `CallMask` holds one bit
//! per kernel call.

use core::fmt;

use super::PrivId;
use crate::config::{NR_SYS_CALLS, NR_SYS_PROCS};

const _: () = assert!(NR_SYS_PROCS <= 64);
const _: () = assert!(NR_SYS_CALLS <= 64);

/// Bitmap indexed by privilege id.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct SysMap(u64);

impl SysMap {
    /// No bits set.
    pub const EMPTY: Self = Self(0);

    /// Every privilege id set.
    pub const ALL: Self = Self(if NR_SYS_PROCS == 64 {
        u64::MAX
    } else {
        (1u64 << NR_SYS_PROCS) - 1
    });

    /// Build a map from raw bits; bits past the table are dropped.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Set the bit for `id`.
    #[inline]
    pub fn set(&mut self, id: PrivId) {
        self.0 |= 1 << id.index();
    }

    /// Clear the bit for `id`.
    #[inline]
    pub fn unset(&mut self, id: PrivId) {
        self.0 &= !(1 << id.index());
    }

    /// Test the bit for `id`.
    #[inline]
    pub fn get(self, id: PrivId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    /// Lowest set id.
    pub fn first(self) -> Option<PrivId> {
        if self.0 == 0 {
            None
        } else {
            PrivId::new(self.0.trailing_zeros() as usize)
        }
    }

    /// Check if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over set ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = PrivId> {
        (0..NR_SYS_PROCS)
            .filter_map(PrivId::new)
            .filter(move |&id| self.get(id))
    }
}

impl fmt::Debug for SysMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SysMap({:#018x})", self.0)
    }
}

/// Kernel calls a privilege slot may issue.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct CallMask(u64);

impl CallMask {
    /// No call allowed.
    pub const NONE: Self = Self(0);

    /// Every call allowed.
    pub const ALL: Self = Self(u64::MAX);

    /// Allow call `call_nr`. Out-of-range numbers are ignored.
    pub fn allow(&mut self, call_nr: usize) {
        if call_nr < NR_SYS_CALLS {
            self.0 |= 1 << call_nr;
        }
    }

    /// Revoke call `call_nr`.
    pub fn deny(&mut self, call_nr: usize) {
        if call_nr < NR_SYS_CALLS {
            self.0 &= !(1 << call_nr);
        }
    }

    /// Test call `call_nr`.
    #[inline]
    pub fn is_allowed(self, call_nr: usize) -> bool {
        call_nr < NR_SYS_CALLS && self.0 & (1 << call_nr) != 0
    }

    /// Mask allowing exactly the listed calls.
    pub fn only(calls: &[usize]) -> Self {
        let mut mask = Self::NONE;
        for &nr in calls {
            mask.allow(nr);
        }
        mask
    }
}

impl fmt::Debug for CallMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallMask({:#018x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> PrivId {
        PrivId::new(n).unwrap()
    }

    #[test]
    fn test_sysmap_bits() {
        let mut map = SysMap::EMPTY;
        map.set(id(3));
        map.set(id(63));
        assert!(map.get(id(3)));
        assert!(!map.get(id(4)));
        assert_eq!(map.first(), Some(id(3)));
        map.unset(id(3));
        assert_eq!(map.first(), Some(id(63)));
        assert_eq!(map.iter().count(), 1);
    }

    #[test]
    fn test_call_mask() {
        let mask = CallMask::only(&[0, 4, 63]);
        assert!(mask.is_allowed(4));
        assert!(!mask.is_allowed(5));
        assert!(!mask.is_allowed(NR_SYS_CALLS));
        assert!(!CallMask::NONE.is_allowed(0));
    }
}
