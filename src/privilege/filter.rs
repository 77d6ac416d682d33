//! IPC Filters
//!
//! A process can restrict which messages it accepts with a chain of
//! whitelist and blacklist filters. Each filter is a small array of match
//! rules on message source and type, copied from user memory.
//!
//! # Evaluation
//! The first filter's polarity sets the default: a blacklist starts from
//! allow, a whitelist from deny. Walking the chain, every filter of the
//! opposite polarity to the current decision may flip it on a match.

use heapless::Vec;

use crate::config::{IPCF_MAX_ELEMENTS, IPCF_POOL_SIZE};
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::proc::{Endpoint, ProcNr, ProcTable, VM_PROC_NR};
use crate::signal::SIGKMEM;
use crate::syscall::message::{Message, NOTIFY_MESSAGE};
use crate::syscall::user::UserMemory;

/// Rule matches on the message source.
pub const IPCF_MATCH_M_SOURCE: u32 = 0x1;
/// Rule matches on the message type.
pub const IPCF_MATCH_M_TYPE: u32 = 0x2;
const IPCF_MATCH_ALL: u32 = IPCF_MATCH_M_SOURCE | IPCF_MATCH_M_TYPE;

/// Filter polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterKind {
    /// Matching messages are refused.
    Blacklist = 1,
    /// Only matching messages are accepted.
    Whitelist = 2,
}

impl FilterKind {
    /// Decode the ABI value.
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(Self::Blacklist),
            2 => Some(Self::Whitelist),
            _ => None,
        }
    }
}

/// One match rule.
///
/// Wire format (little endian, 12 bytes):
/// ```text
///   0..4   flags     IPCF_MATCH_* bits
///   4..8   m_source  endpoint, or ANY
///   8..12  m_type    message type
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcFilterElement {
    pub flags: u32,
    pub m_source: Endpoint,
    pub m_type: i32,
}

impl IpcFilterElement {
    /// Size of one element on the wire.
    pub const WIRE_SIZE: usize = 12;

    /// Decode one element.
    pub fn from_bytes(b: &[u8]) -> Self {
        let word = |i: usize| [b[i], b[i + 1], b[i + 2], b[i + 3]];
        Self {
            flags: u32::from_le_bytes(word(0)),
            m_source: Endpoint(i32::from_le_bytes(word(4))),
            m_type: i32::from_le_bytes(word(8)),
        }
    }

    /// Encode one element.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4..8].copy_from_slice(&self.m_source.0.to_le_bytes());
        out[8..12].copy_from_slice(&self.m_type.to_le_bytes());
        out
    }

    /// Check structural well-formedness.
    fn is_well_formed(&self, procs: &ProcTable) -> bool {
        if self.flags == 0 || self.flags & !IPCF_MATCH_ALL != 0 {
            return false;
        }
        if self.flags & IPCF_MATCH_M_SOURCE != 0 {
            return self.m_source == Endpoint::ANY || procs.isokendpt(self.m_source).is_some();
        }
        true
    }

    /// Check whether this rule matches `msg`.
    fn matches(&self, msg: &Message) -> bool {
        if self.flags & IPCF_MATCH_M_TYPE != 0 && self.m_type != msg.m_type {
            return false;
        }
        if self.flags & IPCF_MATCH_M_SOURCE != 0
            && self.m_source != Endpoint::ANY
            && self.m_source != msg.source
        {
            return false;
        }
        true
    }
}

/// Handle to a filter in the pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct FilterId(u8);

impl FilterId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One filter of a chain.
#[derive(Debug, Clone)]
pub struct IpcFilter {
    pub kind: FilterKind,
    /// Union of the element flags.
    pub flags: u32,
    pub elements: Vec<IpcFilterElement, IPCF_MAX_ELEMENTS>,
    next: Option<FilterId>,
}

impl IpcFilter {
    /// Next filter of the chain.
    pub fn next(&self) -> Option<FilterId> {
        self.next
    }

    fn matches(&self, msg: &Message) -> bool {
        self.elements.iter().any(|e| e.matches(msg))
    }
}

/// Bounded pool every filter chain is allocated from.
#[derive(Debug)]
pub struct FilterPool {
    slots: [Option<IpcFilter>; IPCF_POOL_SIZE],
}

impl FilterPool {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    fn allocate(&mut self, kind: FilterKind) -> Option<FilterId> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(IpcFilter {
            kind,
            flags: 0,
            elements: Vec::new(),
            next: None,
        });
        Some(FilterId(index as u8))
    }

    fn free(&mut self, id: FilterId) {
        assert!(
            self.slots[id.index()].take().is_some(),
            "ipcf: double free of slot {}",
            id.index()
        );
    }

    /// Look up a filter.
    ///
    /// Panics if the slot is free.
    pub fn get(&self, id: FilterId) -> &IpcFilter {
        match &self.slots[id.index()] {
            Some(f) => f,
            None => panic!("ipcf: slot {} not allocated", id.index()),
        }
    }

    fn get_mut(&mut self, id: FilterId) -> &mut IpcFilter {
        match &mut self.slots[id.index()] {
            Some(f) => f,
            None => panic!("ipcf: slot {} not allocated", id.index()),
        }
    }

    /// Number of filters in use.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Walk a chain starting at `head`.
    pub fn chain(&self, head: Option<FilterId>) -> impl Iterator<Item = &IpcFilter> {
        let mut cur = head;
        core::iter::from_fn(move || {
            let f = self.get(cur?);
            cur = f.next;
            Some(f)
        })
    }

    fn chain_allows(&self, head: FilterId, msg: &Message) -> bool {
        let mut allow = self.get(head).kind == FilterKind::Blacklist;
        for f in self.chain(Some(head)) {
            let whitelist = f.kind == FilterKind::Whitelist;
            if whitelist != allow && f.matches(msg) {
                allow = whitelist;
            }
        }
        allow
    }

    fn tail(&self, head: Option<FilterId>) -> Option<FilterId> {
        let mut tail = head?;
        while let Some(next) = self.get(tail).next {
            tail = next;
        }
        Some(tail)
    }

    /// Validate every element of a filter.
    ///
    /// With `fill_flags` the aggregate flags are recomputed and stored;
    /// otherwise the stored aggregate must still match.
    pub fn check(
        &mut self,
        id: FilterId,
        fill_flags: bool,
        procs: &ProcTable,
    ) -> Result<(), KernelError> {
        let f = self.get_mut(id);
        let mut flags = 0;
        for e in f.elements.iter() {
            if !e.is_well_formed(procs) {
                return Err(KernelError::InvalidArgument);
            }
            flags |= e.flags;
        }
        if fill_flags {
            f.flags = flags;
        } else if f.flags != flags {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for FilterPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Append a filter, read from `len` bytes at `addr` in the process's
    /// memory, to the filter chain of `rp`.
    ///
    /// # Errors
    /// * `InvalidArgument` - bad kind, bad length, or malformed element
    /// * `OutOfMemory` - filter pool exhausted
    /// * `Fault` - user memory not readable
    pub fn add_ipc_filter(
        &mut self,
        mem: &dyn UserMemory,
        rp: ProcNr,
        kind: FilterKind,
        addr: u64,
        len: usize,
    ) -> Result<FilterId, KernelError> {
        let n = len / IpcFilterElement::WIRE_SIZE;
        if len % IpcFilterElement::WIRE_SIZE != 0 || n < 1 || n > IPCF_MAX_ELEMENTS {
            return Err(KernelError::InvalidArgument);
        }
        let priv_id = self.priv_of(rp);
        let id = self.ipcf.allocate(kind).ok_or_else(|| {
            log::warn!("ipcf: pool exhausted");
            KernelError::OutOfMemory
        })?;

        if let Err(e) = self.fill_ipc_filter(mem, rp, id, addr, len) {
            self.ipcf.free(id);
            return Err(e);
        }

        match self.ipcf.tail(self.privs.get(priv_id).ipcf) {
            Some(tail) => self.ipcf.get_mut(tail).next = Some(id),
            None => self.privs.get_mut(priv_id).ipcf = Some(id),
        }
        log::debug!("ipcf: {:?} added to proc {} ({} elements)", kind, rp.index(), n);
        Ok(id)
    }

    fn fill_ipc_filter(
        &mut self,
        mem: &dyn UserMemory,
        rp: ProcNr,
        id: FilterId,
        addr: u64,
        len: usize,
    ) -> Result<(), KernelError> {
        let mut raw = [0u8; IPCF_MAX_ELEMENTS * IpcFilterElement::WIRE_SIZE];
        let owner = self.procs.get(rp).endpoint;
        mem.copy_from(owner, addr, &mut raw[..len])?;

        let f = self.ipcf.get_mut(id);
        for chunk in raw[..len].chunks_exact(IpcFilterElement::WIRE_SIZE) {
            // Capacity is guaranteed by the length check in the caller
            let _ = f.elements.push(IpcFilterElement::from_bytes(chunk));
        }
        self.ipcf.check(id, true, &self.procs)
    }

    /// Free the whole filter chain of `rp`.
    ///
    /// When VM drops its filters while memory requests are queued it is
    /// told to look again.
    pub fn clear_ipc_filters(&mut self, rp: ProcNr) {
        let priv_id = self.priv_of(rp);
        let mut cur = self.privs.get_mut(priv_id).ipcf.take();
        while let Some(id) = cur {
            cur = self.ipcf.get(id).next;
            self.ipcf.free(id);
        }

        if rp == VM_PROC_NR && self.vmrequest.is_some() {
            let vm = self.procs.get(VM_PROC_NR).endpoint;
            if self.send_sig(vm, SIGKMEM).is_err() {
                panic!("clear_ipc_filters: send_sig to VM failed");
            }
        }
    }

    /// Re-validate a filter already in the pool.
    pub fn check_ipc_filter(&mut self, id: FilterId, fill_flags: bool) -> Result<(), KernelError> {
        self.ipcf.check(id, fill_flags, &self.procs)
    }

    /// Decide whether `rp` accepts a message from `src_e`.
    ///
    /// `body` is the message if the kernel already holds it; otherwise the
    /// type is read from `m_src_v` in the sender's memory when a rule needs
    /// it. If that read fails the message is let through.
    pub fn allow_ipc_filtered_msg(
        &self,
        mem: &dyn UserMemory,
        rp: ProcNr,
        src_e: Endpoint,
        m_src_v: u64,
        body: Option<&Message>,
    ) -> bool {
        let Some(head) = self.procs.get(rp).priv_id.and_then(|id| self.privs.get(id).ipcf)
        else {
            return true;
        };

        let mut msg = match body {
            Some(m) => *m,
            None => {
                let mut m = Message::default();
                let need_type = self
                    .ipcf
                    .chain(Some(head))
                    .any(|f| f.flags & IPCF_MATCH_M_TYPE != 0);
                if need_type {
                    let mut raw = [0u8; 4];
                    if mem
                        .copy_from(src_e, m_src_v + Message::M_TYPE_OFFSET as u64, &mut raw)
                        .is_err()
                    {
                        return true;
                    }
                    m.m_type = i32::from_le_bytes(raw);
                }
                m
            }
        };
        msg.source = src_e;
        self.ipcf.chain_allows(head, &msg)
    }

    /// Decide whether VM may be notified of a memory request.
    pub fn allow_ipc_filtered_memreq(&self) -> bool {
        let Some(head) = self
            .procs
            .get(VM_PROC_NR)
            .priv_id
            .and_then(|id| self.privs.get(id).ipcf)
        else {
            return true;
        };
        let notify = Message {
            source: Endpoint::SYSTEM,
            m_type: NOTIFY_MESSAGE,
            ..Message::default()
        };
        self.ipcf.chain_allows(head, &notify)
    }
}
