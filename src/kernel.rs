//! Kernel State
//!
//! `Kernel` owns every table of the kernel-call core. Subsystems add their
//! operations in their own modules with `impl Kernel` blocks; this module
//! holds construction, boot and privilege binding.
//!
//! # Boot Image
//! ```text
//!   slot 0  SYSTEM  priv 0  all calls
//!   slot 1  VM      priv 1  all calls
//! ```

use crate::cap::CapabilityDag;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::privilege::{
    CallMask, FilterPool, PrivFlags, PrivId, PrivRequest, PrivTable, SYSTEM_PRIV_ID,
};
use crate::proc::{ProcNr, ProcTable, SYSTEM_PROC_NR, VM_PROC_NR};
use crate::syscall::CallTable;

/// Privilege id of VM in the boot image.
pub const VM_PRIV_ID: usize = 1;

/// The kernel-call core.
#[derive(Debug)]
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) dag: CapabilityDag,
    pub(crate) privs: PrivTable,
    pub(crate) procs: ProcTable,
    pub(crate) calls: CallTable,
    pub(crate) ipcf: FilterPool,
    /// Head of the VM-request queue.
    pub(crate) vmrequest: Option<ProcNr>,
}

impl Kernel {
    /// Empty kernel with no process running.
    pub fn new(config: KernelConfig, calls: CallTable) -> Self {
        Self {
            config,
            dag: CapabilityDag::new(),
            privs: PrivTable::new(),
            procs: ProcTable::new(),
            calls,
            ipcf: FilterPool::new(),
            vmrequest: None,
        }
    }

    /// Kernel with the built-in calls and the boot image started.
    pub fn boot(config: KernelConfig) -> Result<Self, KernelError> {
        Self::boot_with(config, CallTable::system())
    }

    /// Kernel with the calls of `calls` and the boot image started.
    pub fn boot_with(config: KernelConfig, calls: CallTable) -> Result<Self, KernelError> {
        let mut k = Self::new(config, calls);
        k.procs.spawn_at(SYSTEM_PROC_NR, "system")?;
        k.get_priv(SYSTEM_PROC_NR, PrivRequest::Static(SYSTEM_PRIV_ID.index()))?;
        k.procs.spawn_at(VM_PROC_NR, "vm")?;
        k.get_priv(VM_PROC_NR, PrivRequest::Static(VM_PRIV_ID))?;

        for nr in [SYSTEM_PROC_NR, VM_PROC_NR] {
            let id = k.priv_of(nr);
            let entry = k.privs.get_mut(id);
            entry.flags.insert(PrivFlags::SYS_PROC);
            entry.k_call_mask = CallMask::ALL;
        }
        let (sys, vm) = (k.priv_of(SYSTEM_PROC_NR), k.priv_of(VM_PROC_NR));
        k.privs.set_sendto_bit(sys, vm);
        k.privs.set_sendto_bit(vm, sys);

        log::info!("kernel: boot image started ({} cpus)", config.ncpus);
        Ok(k)
    }

    /// Boot parameters.
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The capability derivation graph.
    pub fn dag(&self) -> &CapabilityDag {
        &self.dag
    }

    /// The capability derivation graph, for modification.
    pub fn dag_mut(&mut self) -> &mut CapabilityDag {
        &mut self.dag
    }

    /// The process table.
    pub fn procs(&self) -> &ProcTable {
        &self.procs
    }

    /// The process table, for modification.
    pub fn procs_mut(&mut self) -> &mut ProcTable {
        &mut self.procs
    }

    /// The privilege table.
    pub fn privs(&self) -> &PrivTable {
        &self.privs
    }

    /// The privilege table, for modification.
    pub fn privs_mut(&mut self) -> &mut PrivTable {
        &mut self.privs
    }

    /// The IPC filter pool.
    pub fn ipc_filter_pool(&self) -> &FilterPool {
        &self.ipcf
    }

    /// The kernel-call vector.
    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    /// Bind a privilege slot to process `nr`.
    ///
    /// # Errors
    /// * `NoSpace` - dynamic pool exhausted
    /// * `InvalidArgument` - not a static id
    /// * `Busy` - static id already bound
    pub fn get_priv(&mut self, nr: ProcNr, req: PrivRequest) -> Result<PrivId, KernelError> {
        assert!(
            self.procs.get(nr).priv_id.is_none(),
            "get_priv: proc {} already has a privilege slot",
            nr.index()
        );
        let id = self.privs.alloc(nr, req)?;
        self.procs.get_mut(nr).priv_id = Some(id);
        Ok(id)
    }

    /// Unbind the privilege slot of `nr` and return it to the pool.
    pub fn release_priv(&mut self, nr: ProcNr) {
        if let Some(id) = self.procs.get_mut(nr).priv_id.take() {
            self.privs.release(id);
        }
    }

    /// Start a system process with a dynamic privilege slot.
    ///
    /// The process may not make any kernel call until it is given a call
    /// mask.
    pub fn spawn_service(&mut self, name: &str) -> Result<ProcNr, KernelError> {
        let nr = self.procs.spawn(name)?;
        let id = match self.get_priv(nr, PrivRequest::Dynamic) {
            Ok(id) => id,
            Err(e) => {
                self.procs.release(nr);
                return Err(e);
            }
        };
        self.privs.get_mut(id).flags.insert(PrivFlags::SYS_PROC);
        Ok(nr)
    }

    /// Replace the kernel-call mask of `nr`.
    pub fn set_call_mask(&mut self, nr: ProcNr, mask: CallMask) {
        let id = self.priv_of(nr);
        self.privs.get_mut(id).k_call_mask = mask;
    }

    /// Privilege slot of `nr`.
    ///
    /// Panics if the process has none; every caller of the kernel-call path
    /// is bound before it runs.
    pub(crate) fn priv_of(&self, nr: ProcNr) -> PrivId {
        match self.procs.get(nr).priv_id {
            Some(id) => id,
            None => panic!("proc {} has no privilege slot", nr.index()),
        }
    }
}
