//! Rights Masks and Security Levels
//!
//! The two values every capability node carries and every derivation edge
//! must respect:
//!
//! ```text
//!   parent ──derive──▶ child
//!   child.rights  ⊆ parent.rights        (rights only narrow)
//!   child.level   ≥ parent.level         (levels only rise)
//! ```

use core::fmt;
use core::ops::{BitAnd, BitOr};

/// Rights granted by a capability node.
///
/// A 64-bit set; the low bits have conventional meanings, the rest are
/// free for the kernel object the capability names.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RightsMask(u64);

impl RightsMask {
    /// No rights.
    pub const NONE: Self = Self(0);

    /// Read permission.
    pub const READ: Self = Self(1 << 0);

    /// Write permission.
    pub const WRITE: Self = Self(1 << 1);

    /// Execute permission.
    pub const EXECUTE: Self = Self(1 << 2);

    /// Grant permission (may derive further capabilities).
    pub const GRANT: Self = Self(1 << 3);

    /// Revoke permission.
    pub const REVOKE: Self = Self(1 << 4);

    /// Every bit set.
    pub const ALL: Self = Self(u64::MAX);

    /// Create a mask from raw bits. All 64 bits are kept.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bits.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Check if these rights include all of `other`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if every right in `self` is also in `parent`.
    #[inline]
    pub const fn is_subset_of(self, parent: Self) -> bool {
        parent.contains(self)
    }

    /// Intersect two right sets.
    #[inline]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Combine two right sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check if empty.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitAnd for RightsMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl BitOr for RightsMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for RightsMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rights({:#x})", self.0)
    }
}

/// Totally ordered security level. Derivation may only move upward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct SecurityLevel(pub u16);

impl SecurityLevel {
    /// Lowest level.
    pub const MIN: Self = Self(0);

    /// Highest level.
    pub const MAX: Self = Self(u16::MAX);

    /// Check whether a node at this level may derive a node at `child`.
    #[inline]
    pub const fn may_derive(self, child: Self) -> bool {
        child.0 >= self.0
    }
}

/// Opaque capability identifier, assigned by the caller.
///
/// Uniqueness is not enforced by the DAG.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct CapId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset() {
        let parent = RightsMask::from_bits(0x0F);
        assert!(RightsMask::from_bits(0x03).is_subset_of(parent));
        assert!(parent.is_subset_of(parent));
        assert!(!RightsMask::from_bits(0xFF).is_subset_of(parent));
        assert!(RightsMask::NONE.is_subset_of(RightsMask::NONE));
    }

    #[test]
    fn test_ops() {
        let rw = RightsMask::READ | RightsMask::WRITE;
        assert!(rw.contains(RightsMask::READ));
        assert_eq!(rw & RightsMask::WRITE, RightsMask::WRITE);
        assert!((rw & RightsMask::GRANT).is_empty());
    }

    #[test]
    fn test_level_order() {
        assert!(SecurityLevel(1).may_derive(SecurityLevel(1)));
        assert!(SecurityLevel(1).may_derive(SecurityLevel(5)));
        assert!(!SecurityLevel(5).may_derive(SecurityLevel(4)));
    }
}
