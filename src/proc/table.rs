//! Process Table
//!
//! The slice of process state the kernel-call core reads and writes:
//! endpoint validity, IPC blocking state, the caller queue, signal pending
//! bits and the VM-request linkage. Scheduling policy lives elsewhere.
//!
//! Slots are plain data mutated through `&mut ProcTable`. The one exception
//! is the signal pending set, which sits behind a spin lock; see the
//! locking notes in [`crate::signal`].

use heapless::String;
use spin::Mutex;

use super::endpoint::{Endpoint, ProcNr, FIRST_DYNAMIC_PROC_NR, MAX_GENERATION};
use super::flags::{MiscFlags, RtsFlags};
use crate::config::NR_PROCS;
use crate::error::KernelError;
use crate::privilege::PrivId;
use crate::signal::SigSet;
use crate::syscall::Message;

/// Why a process sits on the VM-request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmRequestType {
    /// A kernel call returned `VmSuspend` and must be resumed.
    KernelCall,
}

/// VM-request linkage of one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmRequest {
    /// Set while the process is linked on the queue.
    pub kind: Option<VmRequestType>,
    /// Request message of a suspended kernel call.
    pub saved: Option<Message>,
    /// Next requestor on the queue.
    pub(crate) next: Option<ProcNr>,
}

/// One process table slot.
#[derive(Debug)]
pub struct Proc {
    nr: ProcNr,
    generation: u32,
    /// Current endpoint; meaningless while the slot is free.
    pub endpoint: Endpoint,
    /// Short name for diagnostics.
    pub name: String<16>,
    /// Runtime flags.
    pub rts: RtsFlags,
    /// Miscellaneous flags.
    pub misc: MiscFlags,
    /// Bound privilege structure.
    pub priv_id: Option<PrivId>,
    /// Signals waiting for an external signal manager.
    pub(crate) pending: Mutex<SigSet>,
    /// Destination while `SENDING`.
    pub sendto_e: Endpoint,
    /// Expected source while `RECEIVING`.
    pub getfrom_e: Endpoint,
    /// Link in some other process's caller queue.
    pub(crate) q_link: Option<ProcNr>,
    /// Head of the queue of processes blocked sending to this one.
    pub(crate) caller_q: Option<ProcNr>,
    /// Value returned to the process when it next runs.
    pub retreg: i32,
    /// User address replies are delivered to.
    pub delivermsg_vir: u64,
    /// VM-request state.
    pub vmrequest: VmRequest,
    /// Scheduling queue.
    pub priority: usize,
    /// Quantum length in milliseconds.
    pub quantum_size_ms: u32,
    /// Remaining time in the current quantum, in milliseconds.
    pub cpu_time_left: u32,
    /// CPU the process runs on.
    pub cpu: usize,
}

impl Proc {
    fn free(nr: ProcNr) -> Self {
        Self {
            nr,
            generation: 0,
            endpoint: Endpoint::NONE,
            name: String::new(),
            rts: RtsFlags::SLOT_FREE,
            misc: MiscFlags::empty(),
            priv_id: None,
            pending: Mutex::new(SigSet::empty()),
            sendto_e: Endpoint::NONE,
            getfrom_e: Endpoint::NONE,
            q_link: None,
            caller_q: None,
            retreg: 0,
            delivermsg_vir: 0,
            vmrequest: VmRequest::default(),
            priority: 0,
            quantum_size_ms: 0,
            cpu_time_left: 0,
            cpu: 0,
        }
    }

    /// Table slot of this process.
    #[inline]
    pub fn nr(&self) -> ProcNr {
        self.nr
    }

    /// Check if the slot is unused.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rts.contains(RtsFlags::SLOT_FREE)
    }

    /// Check if no flag keeps the process from running.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.rts.is_empty()
    }

    /// Endpoint this process is blocked on, or `NONE`.
    pub fn blocked_on(&self) -> Endpoint {
        if self.rts.contains(RtsFlags::SENDING) {
            self.sendto_e
        } else if self.rts.contains(RtsFlags::RECEIVING) {
            self.getfrom_e
        } else {
            Endpoint::NONE
        }
    }

    /// Snapshot of the signals pending for the external manager.
    pub fn pending_signals(&self) -> SigSet {
        *self.pending.lock()
    }
}

/// Fixed table of process slots.
#[derive(Debug)]
pub struct ProcTable {
    procs: [Proc; NR_PROCS],
}

impl ProcTable {
    /// Create a table with every slot free.
    pub fn new() -> Self {
        Self {
            procs: core::array::from_fn(|i| Proc::free(ProcNr(i))),
        }
    }

    /// Look up a slot.
    #[inline]
    pub fn get(&self, nr: ProcNr) -> &Proc {
        &self.procs[nr.index()]
    }

    /// Look up a slot for modification.
    #[inline]
    pub fn get_mut(&mut self, nr: ProcNr) -> &mut Proc {
        &mut self.procs[nr.index()]
    }

    /// Occupy a specific slot (boot image processes).
    pub fn spawn_at(&mut self, nr: ProcNr, name: &str) -> Result<Endpoint, KernelError> {
        let p = self.get_mut(nr);
        if !p.is_empty() {
            return Err(KernelError::Busy);
        }
        p.endpoint = Endpoint::new(p.generation, nr);
        p.rts = RtsFlags::empty();
        p.name.clear();
        for c in name.chars() {
            if p.name.push(c).is_err() {
                break;
            }
        }
        log::debug!("proc: {} started in slot {} as {:?}", name, nr.index(), p.endpoint);
        Ok(p.endpoint)
    }

    /// Occupy the first free slot after the boot image.
    pub fn spawn(&mut self, name: &str) -> Result<ProcNr, KernelError> {
        let nr = (FIRST_DYNAMIC_PROC_NR..NR_PROCS)
            .map(ProcNr)
            .find(|&nr| self.get(nr).is_empty())
            .ok_or(KernelError::NoSpace)?;
        self.spawn_at(nr, name)?;
        Ok(nr)
    }

    /// Return a slot to the free state. The next occupant gets a new
    /// generation, so endpoints of this process stop resolving.
    pub fn release(&mut self, nr: ProcNr) {
        let generation = match self.get(nr).generation {
            MAX_GENERATION => 0,
            g => g + 1,
        };
        let p = self.get_mut(nr);
        *p = Proc::free(nr);
        p.generation = generation;
    }

    /// Resolve an endpoint to a live slot.
    pub fn isokendpt(&self, ep: Endpoint) -> Option<ProcNr> {
        let nr = ProcNr::new(ep.slot())?;
        let p = self.get(nr);
        (!p.is_empty() && p.endpoint == ep).then_some(nr)
    }

    /// Iterate over occupied slots.
    pub fn live(&self) -> impl Iterator<Item = &Proc> {
        self.procs.iter().filter(|p| !p.is_empty())
    }

    /// Slot numbers of occupied slots.
    pub fn live_nrs(&self) -> heapless::Vec<ProcNr, NR_PROCS> {
        self.live().map(Proc::nr).collect()
    }

    /// Block `src` sending to `dst` and append it to `dst`'s caller queue.
    pub fn block_sending(&mut self, src: ProcNr, dst: ProcNr) {
        let dst_ep = self.get(dst).endpoint;
        {
            let p = self.get_mut(src);
            p.rts.insert(RtsFlags::SENDING);
            p.sendto_e = dst_ep;
            p.q_link = None;
        }
        match self.last_caller(dst) {
            Some(tail) => self.get_mut(tail).q_link = Some(src),
            None => self.get_mut(dst).caller_q = Some(src),
        }
    }

    /// Block `p` receiving from `from` (may be `ANY`).
    pub fn block_receiving(&mut self, p: ProcNr, from: Endpoint) {
        let p = self.get_mut(p);
        p.rts.insert(RtsFlags::RECEIVING);
        p.getfrom_e = from;
    }

    /// Unlink `src` from `dst`'s caller queue. Returns true if it was queued.
    pub fn unlink_caller(&mut self, dst: ProcNr, src: ProcNr) -> bool {
        let mut prev: Option<ProcNr> = None;
        let mut cur = self.get(dst).caller_q;
        while let Some(nr) = cur {
            let next = self.get(nr).q_link;
            if nr == src {
                match prev {
                    Some(p) => self.get_mut(p).q_link = next,
                    None => self.get_mut(dst).caller_q = next,
                }
                self.get_mut(src).q_link = None;
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }

    /// Processes queued to send to `dst`, in arrival order.
    pub fn callers(&self, dst: ProcNr) -> heapless::Vec<ProcNr, NR_PROCS> {
        let mut out = heapless::Vec::new();
        let mut cur = self.get(dst).caller_q;
        while let Some(nr) = cur {
            if out.push(nr).is_err() {
                panic!("proc: caller queue of {} is corrupt", dst.index());
            }
            cur = self.get(nr).q_link;
        }
        out
    }

    fn last_caller(&self, dst: ProcNr) -> Option<ProcNr> {
        self.callers(dst).last().copied()
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}
