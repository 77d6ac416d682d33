//! Kernel-Call Dispatcher
//!
//! Entry point for the kernel-call trap.
//!
//! ```text
//!   Received -> PermissionChecked -> Denied     -> Replied
//!                                 -> Dispatched -> Replied
//!                                               -> Suspended -> (resume) -> ...
//! ```
//!
//! # Security Considerations
//! - The call-mask bit is checked before the vector is consulted, so a
//!   denied caller never reaches a handler
//! - Unmapped calls return `EBADREQUEST`
//! - A bad user pointer is a [`Fault`] for signal delivery, never a reply

use super::message::{call_nr, Message};
use super::user::UserMemory;
use crate::error::{errno, Fault, KernelError};
use crate::kernel::Kernel;
use crate::proc::{Endpoint, MiscFlags, ProcNr, RtsFlags, VmRequestType, VM_PROC_NR};
use crate::signal::{SIGKMEM, SIGSEGV};

/// How a handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Reply `OK` with the (possibly modified) message.
    Reply,
    /// No reply; the handler arranged for the caller's wakeup itself.
    DontReply,
    /// Wait for VM. The handler has called [`Kernel::vm_suspend`].
    VmSuspend,
}

impl Completion {
    /// ABI status code of this completion.
    pub const fn code(self) -> i32 {
        match self {
            Self::Reply => errno::OK,
            Self::DontReply => errno::EDONTREPLY,
            Self::VmSuspend => errno::VMSUSPEND,
        }
    }
}

/// What became of a kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Reply with this status was written to the caller.
    Replied(i32),
    /// No reply was written.
    NoReply,
    /// Call is parked until VM completes it.
    Suspended,
}

impl Kernel {
    /// Handle a kernel-call trap of `caller` with its request at `m_user`.
    ///
    /// A bad user pointer, on the request or on the reply, is raised as
    /// `SIGSEGV` on the caller and None is returned.
    pub fn kernel_call(
        &mut self,
        mem: &mut dyn UserMemory,
        caller: ProcNr,
        m_user: u64,
    ) -> Option<CallOutcome> {
        match self.try_kernel_call(mem, caller, m_user) {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                self.cause_sig(caller, SIGSEGV);
                None
            }
        }
    }

    /// Like [`Kernel::kernel_call`], but hand a bad user pointer back as a
    /// [`Fault`] instead of signaling the caller.
    pub fn try_kernel_call(
        &mut self,
        mem: &mut dyn UserMemory,
        caller: ProcNr,
        m_user: u64,
    ) -> Result<CallOutcome, Fault> {
        let p = self.procs.get_mut(caller);
        assert!(!p.is_empty(), "kernel_call: empty slot {}", caller.index());
        p.delivermsg_vir = m_user;
        let ep = p.endpoint;

        let mut msg = Message::copy_from_user(mem, ep, m_user).map_err(|f| {
            log::warn!("bad user ptr {:#x} from {}/{:?}", m_user, self.procs.get(caller).name, ep);
            f
        })?;
        msg.source = ep;

        let result = self.dispatch(mem, caller, &mut msg);
        self.finish(mem, caller, &mut msg, result)
    }

    /// Check the caller's call mask and run the handler.
    pub fn dispatch(
        &mut self,
        mem: &mut dyn UserMemory,
        caller: ProcNr,
        msg: &mut Message,
    ) -> Result<Completion, KernelError> {
        let Some(nr) = call_nr(msg.m_type) else {
            log::warn!("SYSTEM: bad call type {:#x} from {:?}", msg.m_type, msg.source);
            return Err(KernelError::BadRequest);
        };
        let id = self.priv_of(caller);
        if !self.privs.get(id).k_call_mask.is_allowed(nr) {
            log::warn!("SYSTEM: denied call {} from {:?}", nr, msg.source);
            return Err(KernelError::CallDenied);
        }
        let Some(handler) = self.calls.get(nr) else {
            log::warn!("SYSTEM: unused call {} from {:?}", nr, msg.source);
            return Err(KernelError::BadRequest);
        };
        handler(self, mem, caller, msg)
    }

    fn finish(
        &mut self,
        mem: &mut dyn UserMemory,
        caller: ProcNr,
        msg: &mut Message,
        result: Result<Completion, KernelError>,
    ) -> Result<CallOutcome, Fault> {
        let p = self.procs.get_mut(caller);
        if result == Ok(Completion::VmSuspend) {
            assert!(
                p.rts.contains(RtsFlags::VMREQUEST),
                "kernel_call: proc {} suspended without a VM request",
                caller.index()
            );
            assert_eq!(p.vmrequest.kind, Some(VmRequestType::KernelCall));
            p.vmrequest.saved = Some(*msg);
            p.misc.insert(MiscFlags::KCALL_RESUME);
            log::debug!("kernel_call: proc {} suspended", caller.index());
            return Ok(CallOutcome::Suspended);
        }

        p.vmrequest.saved = None;
        let code = match result {
            Ok(Completion::DontReply) => return Ok(CallOutcome::NoReply),
            Ok(c) => c.code(),
            Err(e) => e.errno(),
        };
        msg.source = Endpoint::SYSTEM;
        msg.m_type = code;
        let (ep, addr) = (p.endpoint, p.delivermsg_vir);
        if let Err(f) = msg.copy_to_user(mem, ep, addr) {
            log::warn!(
                "bad user ptr {:#x} from {}/{:?} in kernel_call_finish",
                addr,
                self.procs.get(caller).name,
                ep
            );
            return Err(f);
        }
        Ok(CallOutcome::Replied(code))
    }

    /// Re-run the suspended kernel call of `caller` after VM completed it.
    ///
    /// Bad user pointers are signaled as in [`Kernel::kernel_call`].
    ///
    /// # Panics
    /// Panics if `caller` has no suspended call or is still queued for VM.
    pub fn resume(&mut self, mem: &mut dyn UserMemory, caller: ProcNr) -> Option<CallOutcome> {
        match self.try_resume(mem, caller) {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                self.cause_sig(caller, SIGSEGV);
                None
            }
        }
    }

    /// Like [`Kernel::resume`], but hand a bad user pointer back as a [`Fault`].
    pub fn try_resume(
        &mut self,
        mem: &mut dyn UserMemory,
        caller: ProcNr,
    ) -> Result<CallOutcome, Fault> {
        let p = self.procs.get_mut(caller);
        assert!(!p.is_empty(), "resume: empty slot {}", caller.index());
        assert!(
            p.misc.contains(MiscFlags::KCALL_RESUME),
            "resume: proc {} has no suspended call",
            caller.index()
        );
        assert!(
            !p.rts.contains(RtsFlags::VMREQUEST),
            "resume: proc {} still waiting for VM",
            caller.index()
        );
        let Some(mut msg) = p.vmrequest.saved.take() else {
            panic!("resume: proc {} lost its saved request", caller.index());
        };
        p.misc.remove(MiscFlags::KCALL_RESUME);
        log::debug!("kernel_call: proc {} resumed", caller.index());

        let result = self.dispatch(mem, caller, &mut msg);
        self.finish(mem, caller, &mut msg, result)
    }

    /// Queue `nr` for VM and stop it from running.
    ///
    /// A handler calls this right before returning [`Completion::VmSuspend`].
    /// VM is woken with `SIGKMEM` when the queue goes from empty to busy and
    /// its filters let the request through.
    pub fn vm_suspend(&mut self, nr: ProcNr) {
        let head = self.vmrequest;
        let p = self.procs.get_mut(nr);
        assert!(
            !p.rts.contains(RtsFlags::VMREQUEST),
            "vm_suspend: proc {} already queued",
            nr.index()
        );
        p.rts.insert(RtsFlags::VMREQUEST);
        p.vmrequest.kind = Some(VmRequestType::KernelCall);
        p.vmrequest.next = head;
        self.vmrequest = Some(nr);

        if head.is_none() && self.allow_ipc_filtered_memreq() {
            let vm = self.procs.get(VM_PROC_NR).endpoint;
            if let Err(e) = self.send_sig(vm, SIGKMEM) {
                panic!("vm_suspend: send_sig to VM failed: {}", e);
            }
        }
    }

    /// Unlink `nr` from the VM-request queue. Returns true if it was queued.
    pub(crate) fn vmrequest_unlink(&mut self, nr: ProcNr) -> bool {
        let mut prev: Option<ProcNr> = None;
        let mut cur = self.vmrequest;
        while let Some(c) = cur {
            let next = self.procs.get(c).vmrequest.next;
            if c == nr {
                match prev {
                    Some(p) => self.procs.get_mut(p).vmrequest.next = next,
                    None => self.vmrequest = next,
                }
                let p = self.procs.get_mut(nr);
                p.vmrequest.next = None;
                p.vmrequest.kind = None;
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }

    /// Processes waiting for VM, most recent first.
    pub fn vm_requests(&self) -> heapless::Vec<ProcNr, { crate::config::NR_PROCS }> {
        let mut out = heapless::Vec::new();
        let mut cur = self.vmrequest;
        while let Some(c) = cur {
            if out.push(c).is_err() {
                panic!("vm request queue is corrupt");
            }
            cur = self.procs.get(c).vmrequest.next;
        }
        out
    }
}
