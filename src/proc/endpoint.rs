//! Process Slots and Endpoints
//!
//! A process has a table slot (`ProcNr`) and an endpoint. The endpoint folds
//! a per-slot generation into the slot number, so an endpoint held by a peer
//! stops resolving once the slot is reused.
//!
//! ```text
//!   endpoint = generation * ENDPOINT_SLOT_TOP + slot
//! ```

use crate::config::NR_PROCS;

/// Span of slot numbers inside one generation.
pub const ENDPOINT_SLOT_TOP: i32 = 1 << 15;

/// Highest generation whose endpoints still fit in an `i32`. Releasing a
/// slot at this generation starts it over at zero.
pub const MAX_GENERATION: u32 = (i32::MAX / ENDPOINT_SLOT_TOP) as u32;

/// Index into the process table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ProcNr(pub(crate) usize);

impl ProcNr {
    /// Create a slot number.
    ///
    /// Returns None if the index is out of range.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < NR_PROCS {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Slot of the SYSTEM task (kernel-call handler and notification source).
pub const SYSTEM_PROC_NR: ProcNr = ProcNr(0);

/// Slot of the VM service.
pub const VM_PROC_NR: ProcNr = ProcNr(1);

/// First slot handed out to processes created after boot.
pub const FIRST_DYNAMIC_PROC_NR: usize = 2;

/// IPC address of a process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Endpoint(pub i32);

impl Endpoint {
    /// Wildcard source.
    pub const ANY: Self = Self(0x7ace);

    /// No process.
    pub const NONE: Self = Self(0x6ace);

    /// The calling process itself.
    pub const SELF: Self = Self(0x8ace);

    /// Endpoint of the SYSTEM task.
    pub const SYSTEM: Self = Self::new(0, SYSTEM_PROC_NR);

    /// Endpoint of the VM service (first generation).
    pub const VM: Self = Self::new(0, VM_PROC_NR);

    /// Compose an endpoint from a generation and a slot.
    #[inline]
    pub const fn new(generation: u32, slot: ProcNr) -> Self {
        Self(generation as i32 * ENDPOINT_SLOT_TOP + slot.0 as i32)
    }

    /// Slot number folded into this endpoint. May be out of table range.
    #[inline]
    pub const fn slot(self) -> usize {
        self.0.rem_euclid(ENDPOINT_SLOT_TOP) as usize
    }

    /// Generation folded into this endpoint.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.0.div_euclid(ENDPOINT_SLOT_TOP) as u32
    }
}
