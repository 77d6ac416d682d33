//! Signal Numbers and Sets

use core::fmt;

/// Signal number. Valid signals are `1..NSIG`.
pub type Signal = u32;

/// One past the highest signal number.
pub const NSIG: Signal = 65;

/// Segmentation violation (bad user pointer in a kernel call).
pub const SIGSEGV: Signal = 11;
/// Kill, cannot be caught.
pub const SIGKILL: Signal = 9;
/// A delayed signal may now be delivered.
pub const SIGSNDELAY: Signal = 27;
/// Kernel memory request pending for VM.
pub const SIGKMEM: Signal = 28;
/// New kernel diagnostics are available.
pub const SIGKMESS: Signal = 29;
/// Kernel signal pending for an external signal manager.
pub const SIGKSIG: Signal = 30;
/// Kernel signal pending for a self-managed process.
pub const SIGKSIGSM: Signal = 31;

/// Check if `sig` names a deliverable signal.
#[inline]
pub const fn is_valid(sig: Signal) -> bool {
    sig > 0 && sig < NSIG
}

/// Fixed-size set of signals.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct SigSet(u64);

impl SigSet {
    /// Empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a set from its raw bitmap.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bitmap; signal `n` is bit `n - 1`.
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    fn bit(sig: Signal) -> u64 {
        debug_assert!(is_valid(sig));
        1u64 << (sig - 1)
    }

    /// Add a signal.
    pub fn add(&mut self, sig: Signal) {
        self.0 |= Self::bit(sig);
    }

    /// Remove a signal.
    pub fn remove(&mut self, sig: Signal) {
        self.0 &= !Self::bit(sig);
    }

    /// Check membership.
    pub fn contains(self, sig: Signal) -> bool {
        self.0 & Self::bit(sig) != 0
    }

    /// Check if no signal is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Remove and return every signal in the set.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    /// Iterate over members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = Signal> {
        (1..NSIG).filter(move |&s| self.contains(s))
    }
}

impl fmt::Debug for SigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
