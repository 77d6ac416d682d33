//! Privilege Table
//!
//! Fixed table of privilege structures. Ids below `NR_STATIC_PRIV_IDS` are
//! reserved for boot-image processes and requested by number; the rest form
//! a pool handed out on demand.

use bitflags::bitflags;
use heapless::Vec;

use super::filter::FilterId;
use super::resources::{IoRange, MemRange};
use super::sysmap::{CallMask, SysMap};
use crate::config::{NR_IO_RANGE, NR_IRQ, NR_MEM_RANGE, NR_STATIC_PRIV_IDS, NR_SYS_PROCS};
use crate::error::KernelError;
use crate::proc::{Endpoint, ProcNr};
use crate::signal::SigSet;

/// Index into the privilege table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PrivId(u16);

impl PrivId {
    /// Create a privilege id.
    ///
    /// Returns None if the index is out of range.
    #[inline]
    pub const fn new(index: usize) -> Option<Self> {
        if index < NR_SYS_PROCS {
            Some(Self(index as u16))
        } else {
            None
        }
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Check if this id belongs to the static range.
    #[inline]
    pub const fn is_static(self) -> bool {
        (self.0 as usize) < NR_STATIC_PRIV_IDS
    }
}

/// Privilege id of the SYSTEM task.
pub const SYSTEM_PRIV_ID: PrivId = PrivId(0);

bitflags! {
    /// Privilege flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrivFlags: u32 {
        /// System process with its own privilege structure.
        const SYS_PROC      = 1 << 0;
        /// IRQ use is restricted to `irq_tab`.
        const CHECK_IRQ     = 1 << 1;
        /// Port I/O is restricted to `io_tab`.
        const CHECK_IO_PORT = 1 << 2;
        /// Memory mapping is restricted to `mem_tab`.
        const CHECK_MEM     = 1 << 3;
        /// Slot came from the dynamic pool.
        const DYN_PRIV_ID   = 1 << 4;
    }
}

bitflags! {
    /// IPC traps a process may issue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrapMask: u32 {
        const SEND    = 1 << 1;
        const RECEIVE = 1 << 2;
        const SENDREC = 1 << 3;
        const NOTIFY  = 1 << 4;
        const SENDNB  = 1 << 5;
        const SENDA   = 1 << 16;
    }
}

/// Which slot `get_priv` should bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivRequest {
    /// Any free slot of the dynamic pool.
    Dynamic,
    /// A specific static id.
    Static(usize),
}

/// Privilege structure of one system process.
#[derive(Debug, Clone)]
pub struct PrivEntry {
    id: PrivId,
    pub(crate) proc_nr: Option<ProcNr>,
    /// Privilege flags.
    pub flags: PrivFlags,
    /// Allowed IPC traps.
    pub trap_mask: TrapMask,
    /// Privilege ids this process may send to.
    pub ipc_to: SysMap,
    /// Sources with a pending notification.
    pub notify_pending: SysMap,
    /// Sources with a pending asynchronous message.
    pub asyn_pending: SysMap,
    /// Allowed kernel calls.
    pub k_call_mask: CallMask,
    pub(crate) irq_tab: Vec<u32, NR_IRQ>,
    pub(crate) io_tab: Vec<IoRange, NR_IO_RANGE>,
    pub(crate) mem_tab: Vec<MemRange, NR_MEM_RANGE>,
    pub(crate) ipcf: Option<FilterId>,
    /// Signal manager; `SELF` for self-managed processes.
    pub sig_mgr: Endpoint,
    /// Manager to fall back on if `sig_mgr` dies.
    pub bak_sig_mgr: Endpoint,
    /// Kernel signals for the process itself.
    pub sig_pending: SigSet,
    /// Wants `SIGKMESS` when diagnostics arrive.
    pub diag_sig: bool,
    /// Size of the registered asynchronous send table.
    pub asynsize: usize,
}

impl PrivEntry {
    /// Unbound entry with default settings.
    pub fn new(id: PrivId) -> Self {
        Self {
            id,
            proc_nr: None,
            flags: PrivFlags::empty(),
            trap_mask: TrapMask::all(),
            ipc_to: SysMap::EMPTY,
            notify_pending: SysMap::EMPTY,
            asyn_pending: SysMap::EMPTY,
            k_call_mask: CallMask::NONE,
            irq_tab: Vec::new(),
            io_tab: Vec::new(),
            mem_tab: Vec::new(),
            ipcf: None,
            sig_mgr: Endpoint::SELF,
            bak_sig_mgr: Endpoint::NONE,
            sig_pending: SigSet::empty(),
            diag_sig: false,
            asynsize: 0,
        }
    }

    /// Id of this entry.
    #[inline]
    pub fn id(&self) -> PrivId {
        self.id
    }

    /// Process bound to this entry.
    #[inline]
    pub fn proc_nr(&self) -> Option<ProcNr> {
        self.proc_nr
    }

    /// Check if this entry is bound to a process.
    #[inline]
    pub fn is_bound(&self) -> bool {
        self.proc_nr.is_some()
    }

    /// Head of the IPC filter chain.
    #[inline]
    pub fn ipc_filters(&self) -> Option<FilterId> {
        self.ipcf
    }
}

/// The privilege table.
#[derive(Debug)]
pub struct PrivTable {
    entries: [PrivEntry; NR_SYS_PROCS],
}

impl PrivTable {
    /// Create a table with every entry unbound.
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|i| PrivEntry::new(PrivId(i as u16))),
        }
    }

    /// Look up an entry.
    #[inline]
    pub fn get(&self, id: PrivId) -> &PrivEntry {
        &self.entries[id.index()]
    }

    /// Look up an entry for modification.
    #[inline]
    pub fn get_mut(&mut self, id: PrivId) -> &mut PrivEntry {
        &mut self.entries[id.index()]
    }

    /// Process bound to `id`.
    #[inline]
    pub fn id_to_nr(&self, id: PrivId) -> Option<ProcNr> {
        self.get(id).proc_nr
    }

    /// Iterate over bound entries.
    pub fn bound(&self) -> impl Iterator<Item = &PrivEntry> {
        self.entries.iter().filter(|e| e.is_bound())
    }

    /// Number of free dynamic slots.
    pub fn free_dynamic(&self) -> usize {
        self.entries[NR_STATIC_PRIV_IDS..]
            .iter()
            .filter(|e| !e.is_bound())
            .count()
    }

    /// Bind a privilege slot to `nr`.
    ///
    /// The slot is reset to defaults before binding.
    ///
    /// # Errors
    /// * `NoSpace` - dynamic pool exhausted
    /// * `InvalidArgument` - not a static id
    /// * `Busy` - static id already bound
    pub fn alloc(&mut self, nr: ProcNr, req: PrivRequest) -> Result<PrivId, KernelError> {
        let id = match req {
            PrivRequest::Dynamic => self.entries[NR_STATIC_PRIV_IDS..]
                .iter()
                .find(|e| !e.is_bound())
                .map(|e| e.id)
                .ok_or(KernelError::NoSpace)?,
            PrivRequest::Static(index) => {
                let id = PrivId::new(index)
                    .filter(|id| id.is_static())
                    .ok_or(KernelError::InvalidArgument)?;
                if self.get(id).is_bound() {
                    return Err(KernelError::Busy);
                }
                id
            }
        };

        let entry = self.get_mut(id);
        *entry = PrivEntry::new(id);
        entry.proc_nr = Some(nr);
        if matches!(req, PrivRequest::Dynamic) {
            entry.flags.insert(PrivFlags::DYN_PRIV_ID);
        }
        log::debug!("priv: slot {} bound to proc {}", id.index(), nr.index());
        Ok(id)
    }

    /// Return a slot to the pool and drop every send permission naming it.
    pub fn release(&mut self, id: PrivId) {
        for e in self.entries.iter_mut() {
            e.ipc_to.unset(id);
            e.notify_pending.unset(id);
            e.asyn_pending.unset(id);
        }
        *self.get_mut(id) = PrivEntry::new(id);
        log::debug!("priv: slot {} released", id.index());
    }

    /// Allow `from` to send to `to`. One direction only.
    pub fn allow_send(&mut self, from: PrivId, to: PrivId) {
        self.get_mut(from).ipc_to.set(to);
    }

    /// Allow `to` to send back to `from`, unless `to` can only receive.
    ///
    /// Returns true if the return permission was granted.
    pub fn grant_reciprocal(&mut self, from: PrivId, to: PrivId) -> bool {
        let target = self.get_mut(to);
        if target.trap_mask.difference(TrapMask::RECEIVE).is_empty() {
            return false;
        }
        target.ipc_to.set(from);
        true
    }

    /// Check if `from` may send to `to`.
    #[inline]
    pub fn may_send_to(&self, from: PrivId, to: PrivId) -> bool {
        self.get(from).ipc_to.get(to)
    }

    /// Grant `rp` permission to send to `id`, with the return path.
    ///
    /// Naming an unbound slot or `rp` itself clears the bit instead.
    pub fn set_sendto_bit(&mut self, rp: PrivId, id: PrivId) {
        if self.id_to_nr(id).is_none() || rp == id {
            self.get_mut(rp).ipc_to.unset(id);
            return;
        }
        self.allow_send(rp, id);
        self.grant_reciprocal(rp, id);
    }

    /// Revoke send permission between `rp` and `id` in both directions.
    pub fn unset_sendto_bit(&mut self, rp: PrivId, id: PrivId) {
        self.get_mut(rp).ipc_to.unset(id);
        self.get_mut(id).ipc_to.unset(rp);
    }

    /// Replace the send mask of `rp` with `map`.
    pub fn fill_sendto_mask(&mut self, rp: PrivId, map: SysMap) {
        for i in 0..NR_SYS_PROCS {
            let Some(id) = PrivId::new(i) else { continue };
            if map.get(id) {
                self.set_sendto_bit(rp, id);
            } else {
                self.unset_sendto_bit(rp, id);
            }
        }
    }
}

impl Default for PrivTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nr(n: usize) -> ProcNr {
        ProcNr::new(n).unwrap()
    }

    #[test]
    fn test_static_alloc() {
        let mut table = PrivTable::new();
        let id = table.alloc(nr(2), PrivRequest::Static(3)).unwrap();
        assert_eq!(id.index(), 3);
        assert_eq!(table.id_to_nr(id), Some(nr(2)));
        assert!(!table.get(id).flags.contains(PrivFlags::DYN_PRIV_ID));
    }

    #[test]
    fn test_static_busy() {
        let mut table = PrivTable::new();
        table.alloc(nr(2), PrivRequest::Static(3)).unwrap();
        assert_eq!(
            table.alloc(nr(4), PrivRequest::Static(3)),
            Err(KernelError::Busy)
        );
    }

    #[test]
    fn test_static_invalid() {
        let mut table = PrivTable::new();
        assert_eq!(
            table.alloc(nr(2), PrivRequest::Static(NR_STATIC_PRIV_IDS)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            table.alloc(nr(2), PrivRequest::Static(NR_SYS_PROCS + 7)),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_dynamic_pool_exhaustion() {
        let mut table = PrivTable::new();
        let pool = NR_SYS_PROCS - NR_STATIC_PRIV_IDS;
        for i in 0..pool {
            let id = table.alloc(nr(i % 8), PrivRequest::Dynamic).unwrap();
            assert!(!id.is_static());
            assert!(table.get(id).flags.contains(PrivFlags::DYN_PRIV_ID));
        }
        assert_eq!(table.free_dynamic(), 0);
        assert_eq!(
            table.alloc(nr(9), PrivRequest::Dynamic),
            Err(KernelError::NoSpace)
        );

        let victim = PrivId::new(NR_STATIC_PRIV_IDS + 5).unwrap();
        table.release(victim);
        assert_eq!(table.alloc(nr(9), PrivRequest::Dynamic), Ok(victim));
    }

    #[test]
    fn test_set_sendto_bit_bidirectional() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let b = table.alloc(nr(3), PrivRequest::Static(4)).unwrap();
        table.set_sendto_bit(a, b);
        assert!(table.may_send_to(a, b));
        assert!(table.may_send_to(b, a));
    }

    #[test]
    fn test_set_sendto_bit_receive_only_target() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let b = table.alloc(nr(3), PrivRequest::Static(4)).unwrap();
        table.get_mut(b).trap_mask = TrapMask::RECEIVE;
        table.set_sendto_bit(a, b);
        assert!(table.may_send_to(a, b));
        assert!(!table.may_send_to(b, a));
    }

    #[test]
    fn test_set_sendto_bit_self_clears() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        table.get_mut(a).ipc_to.set(a);
        table.set_sendto_bit(a, a);
        assert!(!table.may_send_to(a, a));
    }

    #[test]
    fn test_set_sendto_bit_unbound_clears() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let ghost = PrivId::new(9).unwrap();
        table.get_mut(a).ipc_to.set(ghost);
        table.set_sendto_bit(a, ghost);
        assert!(!table.may_send_to(a, ghost));
    }

    #[test]
    fn test_allow_send_is_one_way() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let b = table.alloc(nr(3), PrivRequest::Static(4)).unwrap();
        table.allow_send(a, b);
        assert!(table.may_send_to(a, b));
        assert!(!table.may_send_to(b, a));
    }

    #[test]
    fn test_fill_sendto_mask_replaces() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let b = table.alloc(nr(3), PrivRequest::Static(4)).unwrap();
        let c = table.alloc(nr(4), PrivRequest::Static(5)).unwrap();
        table.set_sendto_bit(a, b);

        let mut map = SysMap::EMPTY;
        map.set(c);
        table.fill_sendto_mask(a, map);
        assert!(!table.may_send_to(a, b));
        assert!(!table.may_send_to(b, a));
        assert!(table.may_send_to(a, c));
        assert!(table.may_send_to(c, a));
    }

    #[test]
    fn test_release_drops_references() {
        let mut table = PrivTable::new();
        let a = table.alloc(nr(2), PrivRequest::Static(2)).unwrap();
        let b = table.alloc(nr(3), PrivRequest::Static(4)).unwrap();
        table.set_sendto_bit(a, b);
        table.release(b);
        assert!(!table.get(b).is_bound());
        assert!(!table.may_send_to(a, b));
    }
}
