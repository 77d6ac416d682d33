//! Kernel Configuration
//!
//! Compile-time table sizes and the runtime boot parameters.
//!
//! Every table in the kernel core is a fixed-capacity arena sized by one of
//! the constants below. Running out of a table is a recoverable condition
//! reported to the caller, never a reason to allocate.

/// Maximum number of capability nodes in one DAG.
pub const KCAPABILITY_MAX_NODES: usize = 64;

/// Number of adjacency entries shared by all nodes of one DAG.
pub const KCAPABILITY_EDGE_POOL: usize = 512;

/// Number of process table slots.
pub const NR_PROCS: usize = 64;

/// Number of privilege structures (and bits in every send/notify map).
pub const NR_SYS_PROCS: usize = 64;

/// Privilege ids below this value are reserved for boot-image processes.
/// The rest form the dynamic pool.
pub const NR_STATIC_PRIV_IDS: usize = 16;

/// IRQ lines a single process may register.
pub const NR_IRQ: usize = 16;

/// I/O port ranges a single process may register.
pub const NR_IO_RANGE: usize = 16;

/// Physical memory ranges a single process may register.
pub const NR_MEM_RANGE: usize = 16;

/// Maximum elements in one IPC filter.
pub const IPCF_MAX_ELEMENTS: usize = 32;

/// IPC filters available to the whole system.
pub const IPCF_POOL_SIZE: usize = 32;

/// Size of the kernel-call vector.
pub const NR_SYS_CALLS: usize = 64;

/// Number of scheduling queues (valid priorities are `0..NR_SCHED_QUEUES`).
pub const NR_SCHED_QUEUES: usize = 16;

/// Upper bound on CPUs described by [`KernelConfig`].
pub const MAX_CPUS: usize = 8;

/// Runtime boot parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of CPUs brought up by the boot code.
    pub ncpus: usize,
    /// Bit `n` set means CPU `n` finished its own initialization.
    pub cpus_ready: u32,
}

impl KernelConfig {
    /// Uniprocessor configuration.
    pub const fn uniprocessor() -> Self {
        Self {
            ncpus: 1,
            cpus_ready: 1,
        }
    }

    /// Configuration with `ncpus` CPUs, all of them ready.
    ///
    /// # Panics
    /// Panics if `ncpus` is zero or exceeds [`MAX_CPUS`].
    pub const fn with_cpus(ncpus: usize) -> Self {
        assert!(ncpus > 0 && ncpus <= MAX_CPUS, "bad CPU count");
        Self {
            ncpus,
            cpus_ready: (1u32 << ncpus) - 1,
        }
    }

    /// Check whether `cpu` exists and is ready to run processes.
    #[inline]
    pub const fn cpu_is_ready(&self, cpu: usize) -> bool {
        cpu < self.ncpus && self.cpus_ready & (1 << cpu) != 0
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::uniprocessor()
    }
}
