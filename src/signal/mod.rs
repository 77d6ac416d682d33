//! Kernel Signals
//!
//! Signals raised by the kernel are never delivered directly. They are
//! queued and the process's signal manager is notified; a self-managed
//! system process is notified itself.
//!
//! # Locking
//! The per-process pending set is guarded by a spin lock so that queuing a
//! signal and raising `SIGNALED` happen together with respect to other CPUs.
//! `cause_sig` takes it for the update and drops it before the manager is
//! notified; `Proc::pending_signals` takes it for a snapshot. Within one
//! `Kernel` every writer already holds `&mut Kernel`, so the lock is never
//! contended there; paths that only drain the set go through
//! `Mutex::get_mut` instead.

pub mod set;

pub use set::{
    is_valid, SigSet, Signal, NSIG, SIGKILL, SIGKMEM, SIGKMESS, SIGKSIG, SIGKSIGSM, SIGSEGV,
    SIGSNDELAY,
};

use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::proc::{Endpoint, MiscFlags, ProcNr, RtsFlags, SYSTEM_PROC_NR};

impl Kernel {
    /// Post a notification from `src` to `dst`.
    ///
    /// The destination sees the source's privilege id in its pending
    /// notification map the next time it receives.
    pub fn mini_notify(&mut self, src: ProcNr, dst: Endpoint) -> Result<(), KernelError> {
        let dst_nr = self.procs.isokendpt(dst).ok_or(KernelError::DeadSrcDst)?;
        let src_id = self.priv_of(src);
        let dst_id = self.priv_of(dst_nr);
        self.privs.get_mut(dst_id).notify_pending.set(src_id);
        log::trace!("notify: {} -> {:?}", src.index(), dst);
        Ok(())
    }

    /// Queue kernel signal `sig` for the system process at `ep` and notify it.
    ///
    /// Panics on a signal number outside `1..NSIG`.
    ///
    /// # Errors
    /// * `InvalidArgument` - endpoint is stale or the slot is empty
    pub fn send_sig(&mut self, ep: Endpoint, sig: Signal) -> Result<(), KernelError> {
        assert!(is_valid(sig), "send_sig: bad signal {}", sig);
        let nr = self.procs.isokendpt(ep).ok_or(KernelError::InvalidArgument)?;
        let id = self.priv_of(nr);
        self.privs.get_mut(id).sig_pending.add(sig);
        self.mini_notify(SYSTEM_PROC_NR, ep)
    }

    /// Raise `sig` for process `nr`.
    ///
    /// A self-managed process gets the signal in its own kernel pending set
    /// and a `SIGKSIGSM` notification. Otherwise the signal is queued for the
    /// signal manager, which is sent `SIGKSIG` unless the signal was already
    /// pending. A notification that cannot be sent is fatal.
    pub fn cause_sig(&mut self, nr: ProcNr, sig: Signal) {
        assert!(is_valid(sig), "cause_sig: bad signal {}", sig);
        let id = self.priv_of(nr);
        let p = self.procs.get_mut(nr);
        let ep = p.endpoint;
        let mgr = match self.privs.get(id).sig_mgr {
            Endpoint::SELF => ep,
            m => m,
        };

        let notify = {
            let mut pending = p.pending.lock();
            if mgr == ep {
                self.privs.get_mut(id).sig_pending.add(sig);
                p.rts.insert(RtsFlags::SIGNALED | RtsFlags::SIG_PENDING);
                Some((ep, SIGKSIGSM))
            } else if !pending.contains(sig) {
                pending.add(sig);
                p.rts.insert(RtsFlags::SIGNALED | RtsFlags::SIG_PENDING);
                Some((mgr, SIGKSIG))
            } else {
                None
            }
        };

        if let Some((target, ksig)) = notify {
            log::debug!("signal {} for proc {} -> manager {:?}", sig, nr.index(), target);
            if let Err(e) = self.send_sig(target, ksig) {
                panic!("cause_sig: send_sig to {:?} failed: {}", target, e);
            }
        }
    }

    /// Deliver a signal whose delivery was postponed.
    pub fn sig_delay_done(&mut self, nr: ProcNr) {
        self.procs.get_mut(nr).misc.remove(MiscFlags::SIG_DELAY);
        self.cause_sig(nr, SIGSNDELAY);
    }

    /// Tell every process that asked for it that diagnostics are available.
    pub fn send_diag_sig(&mut self) {
        let mut targets: heapless::Vec<Endpoint, { crate::config::NR_SYS_PROCS }> =
            heapless::Vec::new();
        for e in self.privs.bound().filter(|e| e.diag_sig) {
            if let Some(nr) = e.proc_nr() {
                let _ = targets.push(self.procs.get(nr).endpoint);
            }
        }
        for ep in targets {
            if let Err(e) = self.send_sig(ep, SIGKMESS) {
                log::warn!("diag: cannot signal {:?}: {}", ep, e);
            }
        }
    }

    /// Hand one process with pending signals over to its manager `mgr`.
    ///
    /// Returns the process's endpoint and the signals taken, or None if no
    /// process managed by `mgr` is signaled. `SIG_PENDING` stays set until
    /// the manager calls [`Kernel::end_ksig`].
    pub fn get_ksig(&mut self, mgr: Endpoint) -> Option<(Endpoint, SigSet)> {
        for nr in self.procs.live_nrs() {
            let p = self.procs.get(nr);
            if !p.rts.contains(RtsFlags::SIGNALED) {
                continue;
            }
            let Some(id) = p.priv_id else { continue };
            if self.privs.get(id).sig_mgr != mgr {
                continue;
            }
            let p = self.procs.get_mut(nr);
            let sigs = p.pending.get_mut().take();
            p.rts.remove(RtsFlags::SIGNALED);
            return Some((p.endpoint, sigs));
        }
        None
    }

    /// Signal manager `mgr` finished processing the signals of `target`.
    ///
    /// # Errors
    /// * `InvalidArgument` - target is gone or has nothing pending
    /// * `NotPermitted` - `mgr` does not manage `target`
    pub fn end_ksig(&mut self, mgr: Endpoint, target: Endpoint) -> Result<(), KernelError> {
        let nr = self.procs.isokendpt(target).ok_or(KernelError::InvalidArgument)?;
        let id = self.priv_of(nr);
        if self.privs.get(id).sig_mgr != mgr {
            return Err(KernelError::NotPermitted);
        }
        let p = self.procs.get_mut(nr);
        if !p.rts.contains(RtsFlags::SIG_PENDING) {
            return Err(KernelError::InvalidArgument);
        }
        // More signals may have arrived since get_ksig
        if !p.rts.contains(RtsFlags::SIGNALED) {
            p.rts.remove(RtsFlags::SIG_PENDING);
        }
        Ok(())
    }
}
