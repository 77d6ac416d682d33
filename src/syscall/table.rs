//! Kernel-Call Vector
//!
//! One slot per kernel call. Slots are filled once while the kernel is
//! initialized and never change afterwards.

use core::fmt;

use super::calls;
use super::dispatch::Completion;
use super::message::{
    call_nr, Message, SYS_CAPCTL, SYS_DIAGCTL, SYS_ENDKSIG, SYS_GETKSIG, SYS_KILL, SYS_PRIVCTL,
    SYS_SCHEDULE, SYS_VMCTL,
};
use super::user::UserMemory;
use crate::config::NR_SYS_CALLS;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::proc::ProcNr;

/// Kernel-call handler.
///
/// Gets the kernel, the memory of the calling process, the caller's slot
/// and the request, which it may modify to carry reply arguments.
pub type CallHandler =
    fn(&mut Kernel, &mut dyn UserMemory, ProcNr, &mut Message) -> Result<Completion, KernelError>;

/// The kernel-call vector.
#[derive(Clone)]
pub struct CallTable {
    vec: [Option<CallHandler>; NR_SYS_CALLS],
}

impl CallTable {
    /// Vector with every slot unmapped.
    pub const fn new() -> Self {
        Self {
            vec: [None; NR_SYS_CALLS],
        }
    }

    /// Vector with the built-in handlers mapped.
    pub fn system() -> Self {
        let mut table = Self::new();
        table.map(SYS_SCHEDULE, calls::do_schedule);
        table.map(SYS_PRIVCTL, calls::do_privctl);
        table.map(SYS_KILL, calls::do_kill);
        table.map(SYS_GETKSIG, calls::do_getksig);
        table.map(SYS_ENDKSIG, calls::do_endksig);
        table.map(SYS_VMCTL, calls::do_vmctl);
        table.map(SYS_DIAGCTL, calls::do_diagctl);
        table.map(SYS_CAPCTL, calls::do_capctl);
        table
    }

    /// Register `handler` for message type `call`.
    ///
    /// # Panics
    /// Panics if `call` is outside the vector or its slot is already mapped.
    pub fn map(&mut self, call: i32, handler: CallHandler) {
        let Some(nr) = call_nr(call) else {
            panic!("map: call {:#x} out of range", call);
        };
        assert!(self.vec[nr].is_none(), "map: call {} mapped twice", nr);
        self.vec[nr] = Some(handler);
    }

    /// Handler for vector index `nr`.
    #[inline]
    pub fn get(&self, nr: usize) -> Option<CallHandler> {
        self.vec.get(nr).copied().flatten()
    }

    /// Number of mapped slots.
    pub fn mapped(&self) -> usize {
        self.vec.iter().filter(|h| h.is_some()).count()
    }
}

impl Default for CallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTable")
            .field("mapped", &self.mapped())
            .finish()
    }
}
