//! Endpoint Teardown

use crate::error::errno;
use crate::kernel::Kernel;
use crate::privilege::{PrivFlags, PrivId};
use crate::proc::{MiscFlags, ProcNr, RtsFlags};

impl Kernel {
    /// Drop the pending VM request of `rc`, if any.
    ///
    /// A suspended kernel call is discarded together with the request; it
    /// is never resumed.
    pub fn clear_memreq(&mut self, rc: ProcNr) {
        if !self.procs.get(rc).rts.contains(RtsFlags::VMREQUEST) {
            return;
        }
        self.vmrequest_unlink(rc);
        let p = self.procs.get_mut(rc);
        p.rts.remove(RtsFlags::VMREQUEST);
        p.vmrequest.saved = None;
        p.misc.remove(MiscFlags::KCALL_RESUME);
        log::debug!("memreq: dropped request of proc {}", rc.index());
    }

    /// Take `rc` off the caller queue it is sending to and stop it receiving.
    pub fn clear_ipc(&mut self, rc: ProcNr) {
        let p = self.procs.get(rc);
        if p.rts.contains(RtsFlags::SENDING) {
            let sendto_e = p.sendto_e;
            // The destination may itself be on its way out
            let dst = ProcNr::new(sendto_e.slot());
            let unlinked = dst.is_some_and(|dst| self.procs.unlink_caller(dst, rc));
            if !unlinked {
                log::warn!("clear_ipc: proc {} not on caller queue of {:?}", rc.index(), sendto_e);
            }
            self.procs.get_mut(rc).rts.remove(RtsFlags::SENDING);
        }
        self.procs.get_mut(rc).rts.remove(RtsFlags::RECEIVING);
    }

    /// Remove every reference other processes hold to `rc`.
    ///
    /// Pending asynchronous sends to `rc` are cancelled, notifications and
    /// asynchronous messages from `rc` are forgotten, and processes blocked
    /// on `rc` are unblocked with `error_code` as their return value.
    pub fn clear_ipc_refs(&mut self, rc: ProcNr, error_code: i32) {
        let rc_id = self.procs.get(rc).priv_id;
        let rc_ep = self.procs.get(rc).endpoint;

        if let Some(rc_id) = rc_id {
            while let Some(src) = self.privs.get(rc_id).asyn_pending.first() {
                self.cancel_async(src, rc);
            }
        }

        for nr in self.procs.live_nrs() {
            if let (Some(rc_id), Some(id)) = (rc_id, self.procs.get(nr).priv_id) {
                let entry = self.privs.get_mut(id);
                entry.notify_pending.unset(rc_id);
                entry.asyn_pending.unset(rc_id);
            }
            if self.procs.get(nr).blocked_on() == rc_ep {
                log::debug!("ipc: unblocking proc {} from dead {:?}", nr.index(), rc_ep);
                self.procs.get_mut(nr).retreg = error_code;
                self.clear_ipc(nr);
            }
        }
    }

    /// Cancel the asynchronous messages from privilege `src` to `dst`.
    fn cancel_async(&mut self, src: PrivId, dst: ProcNr) {
        let dst_id = self.priv_of(dst);
        self.privs.get_mut(dst_id).asyn_pending.unset(src);
        log::trace!("ipc: async from priv {} to proc {} cancelled", src.index(), dst.index());
    }

    /// Invalidate the endpoint of `rc` and clean up after it.
    ///
    /// # Panics
    /// Panics if the slot is empty.
    pub fn clear_endpoint(&mut self, rc: ProcNr) {
        let p = self.procs.get_mut(rc);
        assert!(!p.is_empty(), "clear_endpoint: empty slot {}", rc.index());
        p.rts.insert(RtsFlags::NO_ENDPOINT);
        if let Some(id) = p.priv_id {
            let entry = self.privs.get_mut(id);
            if entry.flags.contains(PrivFlags::SYS_PROC) {
                entry.asynsize = 0;
            }
        }

        self.clear_ipc(rc);
        self.clear_ipc_refs(rc, errno::EDEADSRCDST);
        self.clear_memreq(rc);
    }

    /// Tear down process `nr` completely and free its slot.
    ///
    /// Its privilege slot and IPC filters are returned to their pools and
    /// its endpoint stops resolving.
    pub fn proc_exit(&mut self, nr: ProcNr) {
        self.clear_endpoint(nr);
        if self.procs.get(nr).priv_id.is_some() {
            self.clear_ipc_filters(nr);
            self.release_priv(nr);
        }
        log::debug!("proc: {} exited", self.procs.get(nr).name);
        self.procs.release(nr);
    }
}
