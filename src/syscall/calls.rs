//! Built-in Kernel Calls
//!
//! Argument layout of each call is documented on its handler. Endpoints are
//! passed as the low 32 bits of an argument word.
//!
//! # Security
//! - Targets are resolved with `isokendpt`; stale endpoints get `EINVAL`
//! - Privilege changes are restricted to system processes
//! - User buffers are copied into kernel memory before use

use super::dispatch::Completion;
use super::message::Message;
use super::user::UserMemory;
use crate::cap::{CapId, NodeRef, RightsMask, SecurityLevel};
use crate::config::NR_SCHED_QUEUES;
use crate::error::{errno, KernelError};
use crate::kernel::Kernel;
use crate::privilege::{FilterKind, IoRange, MemRange, PrivFlags};
use crate::proc::{Endpoint, MiscFlags, ProcNr, RtsFlags, SYSTEM_PROC_NR, VM_PROC_NR};
use crate::signal::{self, SigSet};
use crate::{kprint, kprintln};

/// `SYS_PRIVCTL` requests.
pub mod privctl {
    pub const ALLOW: u64 = 1;
    pub const DISALLOW: u64 = 2;
    pub const CLEAR_IPC_REFS: u64 = 3;
    pub const ADD_IO: u64 = 4;
    pub const ADD_MEM: u64 = 5;
    pub const ADD_IRQ: u64 = 6;
    pub const QUERY_MEM: u64 = 7;
    pub const SET_IPCF: u64 = 8;
    pub const CLEAR_IPCF: u64 = 9;
}

/// `SYS_DIAGCTL` codes.
pub mod diagctl {
    pub const DIAG: u64 = 1;
    pub const STACKTRACE: u64 = 2;
    pub const REGISTER: u64 = 3;
    pub const UNREGISTER: u64 = 4;
}

/// `SYS_CAPCTL` requests.
pub mod capctl {
    pub const CREATE: u64 = 1;
    pub const DERIVE: u64 = 2;
    pub const VALIDATE: u64 = 3;
    pub const LOOKUP: u64 = 4;
}

/// `SYS_VMCTL` parameter: VM finished the request of the target.
pub const VMCTL_KERN_DONE: u64 = 1;

/// Longest diagnostic string accepted by `SYS_DIAGCTL`.
pub const DIAG_BUFSIZE: usize = 256;

/// Resolve an endpoint argument, with `SELF` naming the caller.
fn target(k: &Kernel, caller: ProcNr, ep: Endpoint) -> Result<ProcNr, KernelError> {
    if ep == Endpoint::SELF {
        return Ok(caller);
    }
    k.procs.isokendpt(ep).ok_or(KernelError::InvalidArgument)
}

fn is_sys_proc(k: &Kernel, nr: ProcNr) -> bool {
    k.procs
        .get(nr)
        .priv_id
        .is_some_and(|id| k.privs.get(id).flags.contains(PrivFlags::SYS_PROC))
}

/// Change the privileges of a process.
///
/// ```text
///   args[0]  target endpoint (SELF allowed)
///   args[1]  request (privctl::*)
///   args[2]  user address of the request data
///   args[3]  QUERY_MEM: physical base / SET_IPCF: filter kind
///   args[4]  QUERY_MEM: length / SET_IPCF: byte length
/// ```
pub fn do_privctl(
    k: &mut Kernel,
    mem: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    if !is_sys_proc(k, caller) {
        return Err(KernelError::NotPermitted);
    }
    let rp = target(k, caller, msg.endpoint_arg(0))?;
    let caller_e = k.procs.get(caller).endpoint;
    let arg_ptr = msg.args[2];
    let priv_id = k.procs.get(rp).priv_id;
    let no_priv = k.procs.get(rp).rts.contains(RtsFlags::NO_PRIV);

    match msg.args[1] {
        privctl::ALLOW => {
            if !no_priv || priv_id.is_none() {
                return Err(KernelError::NotPermitted);
            }
            k.procs.get_mut(rp).rts.remove(RtsFlags::NO_PRIV);
        }
        privctl::DISALLOW => {
            if no_priv {
                return Err(KernelError::NotPermitted);
            }
            k.procs.get_mut(rp).rts.insert(RtsFlags::NO_PRIV);
        }
        privctl::CLEAR_IPC_REFS => {
            k.clear_ipc_refs(rp, errno::EDEADSRCDST);
        }
        privctl::ADD_IO | privctl::ADD_MEM | privctl::ADD_IRQ => {
            let id = match priv_id {
                Some(id) if !no_priv => id,
                _ => return Err(KernelError::NotPermitted),
            };
            let entry = k.privs.get_mut(id);
            match msg.args[1] {
                privctl::ADD_IO => {
                    let mut raw = [0u8; IoRange::WIRE_SIZE];
                    mem.copy_from(caller_e, arg_ptr, &mut raw)?;
                    entry.add_io(IoRange::from_bytes(&raw))?;
                }
                privctl::ADD_MEM => {
                    let mut raw = [0u8; MemRange::WIRE_SIZE];
                    mem.copy_from(caller_e, arg_ptr, &mut raw)?;
                    entry.add_mem(MemRange::from_bytes(&raw))?;
                }
                _ => {
                    let mut raw = [0u8; 4];
                    mem.copy_from(caller_e, arg_ptr, &mut raw)?;
                    entry.add_irq(u32::from_le_bytes(raw))?;
                }
            }
        }
        privctl::QUERY_MEM => {
            let id = priv_id.ok_or(KernelError::NotPermitted)?;
            k.privs.get(id).query_mem(msg.args[3], msg.args[4])?;
        }
        privctl::SET_IPCF => {
            if priv_id.is_none() {
                return Err(KernelError::NotPermitted);
            }
            let kind = FilterKind::from_raw(msg.args[3]).ok_or(KernelError::InvalidArgument)?;
            let len = usize::try_from(msg.args[4]).map_err(|_| KernelError::InvalidArgument)?;
            k.add_ipc_filter(mem, rp, kind, arg_ptr, len)?;
        }
        privctl::CLEAR_IPCF => {
            if priv_id.is_none() {
                return Err(KernelError::NotPermitted);
            }
            k.clear_ipc_filters(rp);
        }
        other => {
            log::warn!("do_privctl: bad request {}", other);
            return Err(KernelError::InvalidArgument);
        }
    }
    Ok(Completion::Reply)
}

/// Raise a signal on a process.
///
/// ```text
///   args[0]  target endpoint
///   args[1]  signal number
/// ```
pub fn do_kill(
    k: &mut Kernel,
    _mem: &mut dyn UserMemory,
    _caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    let rp = k
        .procs
        .isokendpt(msg.endpoint_arg(0))
        .ok_or(KernelError::InvalidArgument)?;
    let sig = u32::try_from(msg.args[1]).map_err(|_| KernelError::InvalidArgument)?;
    if !signal::is_valid(sig) {
        return Err(KernelError::InvalidArgument);
    }
    if rp == SYSTEM_PROC_NR {
        return Err(KernelError::NotPermitted);
    }
    k.cause_sig(rp, sig);
    Ok(Completion::Reply)
}

/// Collect one process with signals pending for the caller.
///
/// ```text
///   reply args[0]  endpoint of the signaled process, or NONE
///   reply args[1]  pending signal set
/// ```
pub fn do_getksig(
    k: &mut Kernel,
    _mem: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    let mgr = k.procs.get(caller).endpoint;
    let (ep, sigs) = k
        .get_ksig(mgr)
        .unwrap_or((Endpoint::NONE, SigSet::empty()));
    msg.args[0] = ep.0 as u32 as u64;
    msg.args[1] = sigs.bits();
    Ok(Completion::Reply)
}

/// Finish signal processing for a process.
///
/// ```text
///   args[0]  endpoint of the signaled process
/// ```
pub fn do_endksig(
    k: &mut Kernel,
    _mem: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    let mgr = k.procs.get(caller).endpoint;
    k.end_ksig(mgr, msg.endpoint_arg(0))?;
    Ok(Completion::Reply)
}

/// Diagnostics control.
///
/// ```text
///   args[0]  code (diagctl::*)
///   args[1]  DIAG: user address of the text
///   args[2]  DIAG: length
///   args[3]  STACKTRACE: target endpoint
/// ```
pub fn do_diagctl(
    k: &mut Kernel,
    mem: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    match msg.args[0] {
        diagctl::DIAG => {
            let len = usize::try_from(msg.args[2]).map_err(|_| KernelError::InvalidArgument)?;
            if len == 0 || len > DIAG_BUFSIZE {
                log::warn!("do_diagctl: diagnostics of {} bytes refused", len);
                return Err(KernelError::InvalidArgument);
            }
            let mut buf = [0u8; DIAG_BUFSIZE];
            let owner = k.procs.get(caller).endpoint;
            mem.copy_from(owner, msg.args[1], &mut buf[..len])?;

            let mut text: heapless::String<{ DIAG_BUFSIZE * 2 }> = heapless::String::new();
            for &byte in &buf[..len] {
                let _ = text.push(byte as char);
            }
            kprint!("{}", text.trim_end_matches('\n'));
            k.send_diag_sig();
        }
        diagctl::STACKTRACE => {
            let rp = k
                .procs
                .isokendpt(msg.endpoint_arg(3))
                .ok_or(KernelError::InvalidArgument)?;
            let p = k.procs.get(rp);
            kprintln!(
                "{} ({:?}): rts {:?} misc {:?} blocked on {:?}",
                p.name,
                p.endpoint,
                p.rts,
                p.misc,
                p.blocked_on()
            );
        }
        diagctl::REGISTER | diagctl::UNREGISTER => {
            if !is_sys_proc(k, caller) {
                return Err(KernelError::NotPermitted);
            }
            let id = k.priv_of(caller);
            k.privs.get_mut(id).diag_sig = msg.args[0] == diagctl::REGISTER;
        }
        other => {
            log::warn!("do_diagctl: invalid code {}", other);
            return Err(KernelError::InvalidArgument);
        }
    }
    Ok(Completion::Reply)
}

impl Kernel {
    /// Change the scheduling parameters of `p`. `-1` keeps a value.
    ///
    /// # Errors
    /// * `InvalidArgument` - priority or quantum out of range
    /// * `BadCpu` - CPU missing or not ready (SMP builds)
    pub fn sched_proc(
        &mut self,
        p: ProcNr,
        priority: i32,
        quantum: i32,
        cpu: i32,
        niced: bool,
    ) -> Result<(), KernelError> {
        if priority != -1 && !(0..NR_SCHED_QUEUES as i32).contains(&priority) {
            return Err(KernelError::InvalidArgument);
        }
        if quantum != -1 && quantum < 1 {
            return Err(KernelError::InvalidArgument);
        }
        #[cfg(feature = "smp")]
        if cpu != -1 && (cpu < 0 || !self.config.cpu_is_ready(cpu as usize)) {
            return Err(KernelError::BadCpu);
        }
        #[cfg(not(feature = "smp"))]
        let _ = cpu;

        let rp = self.procs.get_mut(p);
        let runnable = rp.is_runnable();
        if runnable {
            rp.rts.insert(RtsFlags::NO_QUANTUM);
        }
        if priority != -1 {
            rp.priority = priority as usize;
        }
        if quantum != -1 {
            rp.quantum_size_ms = quantum as u32;
            rp.cpu_time_left = quantum as u32;
        }
        #[cfg(feature = "smp")]
        if cpu != -1 {
            rp.cpu = cpu as usize;
        }
        rp.misc.set(MiscFlags::NICED, niced);
        rp.rts.remove(RtsFlags::NO_QUANTUM);
        Ok(())
    }
}

/// Set scheduling parameters.
///
/// ```text
///   args[0]  target endpoint
///   args[1]  priority, or -1
///   args[2]  quantum in ms, or -1
///   args[3]  cpu, or -1
///   args[4]  nonzero if niced
/// ```
pub fn do_schedule(
    k: &mut Kernel,
    _mem: &mut dyn UserMemory,
    _caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    let rp = k
        .procs
        .isokendpt(msg.endpoint_arg(0))
        .ok_or(KernelError::InvalidArgument)?;
    k.sched_proc(rp, msg.int_arg(1), msg.int_arg(2), msg.int_arg(3), msg.args[4] != 0)?;
    Ok(Completion::Reply)
}

/// VM control. Only VM may call it.
///
/// ```text
///   args[0]  target endpoint (SELF allowed)
///   args[1]  VMCTL_KERN_DONE
/// ```
pub fn do_vmctl(
    k: &mut Kernel,
    mem: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    if caller != VM_PROC_NR {
        return Err(KernelError::NotPermitted);
    }
    let rp = target(k, caller, msg.endpoint_arg(0))?;
    match msg.args[1] {
        VMCTL_KERN_DONE => {
            let p = k.procs.get(rp);
            if !p.rts.contains(RtsFlags::VMREQUEST) || !p.misc.contains(MiscFlags::KCALL_RESUME) {
                return Err(KernelError::InvalidArgument);
            }
            k.vmrequest_unlink(rp);
            k.procs.get_mut(rp).rts.remove(RtsFlags::VMREQUEST);
            k.resume(mem, rp);
            Ok(Completion::Reply)
        }
        _ => Err(KernelError::InvalidArgument),
    }
}

fn node_arg(raw: u64) -> Result<NodeRef, KernelError> {
    usize::try_from(raw)
        .ok()
        .and_then(NodeRef::new)
        .ok_or(KernelError::Capability(crate::cap::DagError::NodeNotFound))
}

/// Capability derivation control.
///
/// ```text
///   CREATE    args[1] id, args[2] rights, args[3] level  -> reply args[0] node
///   DERIVE    args[1] parent node, args[2] child node
///   VALIDATE  args[1] source node, args[2] target node   -> reply args[0] 0/1
///   LOOKUP    args[1] id                                 -> reply args[0] node
/// ```
pub fn do_capctl(
    k: &mut Kernel,
    _mem: &mut dyn UserMemory,
    _caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    match msg.args[0] {
        capctl::CREATE => {
            let level = u16::try_from(msg.args[3]).map_err(|_| KernelError::InvalidArgument)?;
            let node = k
                .dag
                .node_create(
                    CapId(msg.args[1]),
                    RightsMask::from_bits(msg.args[2]),
                    SecurityLevel(level),
                )
                .ok_or(KernelError::NoSpace)?;
            msg.args[0] = node.index() as u64;
        }
        capctl::DERIVE => {
            let parent = node_arg(msg.args[1])?;
            let child = node_arg(msg.args[2])?;
            k.dag.add_edge(parent, child)?;
        }
        capctl::VALIDATE => {
            let source = node_arg(msg.args[1])?;
            let target = node_arg(msg.args[2])?;
            msg.args[0] = k.dag.validate_derivation(source, target) as u64;
        }
        capctl::LOOKUP => {
            let node = k
                .dag
                .lookup_node(CapId(msg.args[1]))
                .ok_or(KernelError::Capability(crate::cap::DagError::NodeNotFound))?;
            msg.args[0] = node.index() as u64;
        }
        other => {
            log::warn!("do_capctl: bad request {}", other);
            return Err(KernelError::InvalidArgument);
        }
    }
    Ok(Completion::Reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cap::{DagError, KCAP_RIGHTS_VIOLATION};
    use crate::privilege::{IpcFilterElement, IPCF_MATCH_M_SOURCE};
    use crate::signal::{SIGKMESS, SIGKILL};
    use crate::syscall::message::KERNEL_CALL;
    use crate::syscall::CallHandler;
    use crate::test_utils::{booted, FlatMemory, USER_BASE};

    /// Run handler `h` directly, returning the reply message.
    fn call(
        k: &mut Kernel,
        mem: &mut FlatMemory,
        h: CallHandler,
        caller: ProcNr,
        args: &[u64],
    ) -> Result<Message, KernelError> {
        let mut msg = Message::call(KERNEL_CALL, args);
        msg.source = k.procs.get(caller).endpoint;
        h(k, mem, caller, &mut msg).map(|_| msg)
    }

    fn sys(
        k: &mut Kernel,
        mem: &mut FlatMemory,
        h: CallHandler,
        args: &[u64],
    ) -> Result<Message, KernelError> {
        call(k, mem, h, SYSTEM_PROC_NR, args)
    }

    fn ep(k: &Kernel, nr: ProcNr) -> u64 {
        k.procs.get(nr).endpoint.0 as u64
    }

    #[test]
    fn test_privctl_needs_sys_proc() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let id = k.priv_of(p);
        k.privs.get_mut(id).flags.remove(PrivFlags::SYS_PROC);
        let self_e = Endpoint::SELF.0 as u64;
        assert_eq!(
            call(&mut k, &mut mem, do_privctl, p, &[self_e, privctl::DISALLOW]).err(),
            Some(KernelError::NotPermitted)
        );
    }

    #[test]
    fn test_privctl_allow_disallow() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let target = ep(&k, p);

        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[target, privctl::ALLOW]).err(),
            Some(KernelError::NotPermitted)
        );
        sys(&mut k, &mut mem, do_privctl, &[target, privctl::DISALLOW]).unwrap();
        assert!(k.procs.get(p).rts.contains(RtsFlags::NO_PRIV));
        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[target, privctl::DISALLOW]).err(),
            Some(KernelError::NotPermitted)
        );
        // No resources while privileges are withdrawn
        mem.poke(USER_BASE, &7u32.to_le_bytes());
        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[target, privctl::ADD_IRQ, USER_BASE]).err(),
            Some(KernelError::NotPermitted)
        );
        sys(&mut k, &mut mem, do_privctl, &[target, privctl::ALLOW]).unwrap();
        assert!(!k.procs.get(p).rts.contains(RtsFlags::NO_PRIV));
    }

    #[test]
    fn test_privctl_resources() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let target = ep(&k, p);

        mem.poke(USER_BASE, &11u32.to_le_bytes());
        sys(&mut k, &mut mem, do_privctl, &[target, privctl::ADD_IRQ, USER_BASE]).unwrap();

        let mut io = [0u8; IoRange::WIRE_SIZE];
        io[0..4].copy_from_slice(&0x3f8u32.to_le_bytes());
        io[4..8].copy_from_slice(&0x3ffu32.to_le_bytes());
        mem.poke(USER_BASE + 0x10, &io);
        sys(&mut k, &mut mem, do_privctl, &[target, privctl::ADD_IO, USER_BASE + 0x10]).unwrap();

        let mut range = [0u8; MemRange::WIRE_SIZE];
        range[0..8].copy_from_slice(&0x1000u64.to_le_bytes());
        range[8..16].copy_from_slice(&0x1fffu64.to_le_bytes());
        mem.poke(USER_BASE + 0x20, &range);
        sys(&mut k, &mut mem, do_privctl, &[target, privctl::ADD_MEM, USER_BASE + 0x20]).unwrap();

        let entry = k.privs.get(k.priv_of(p));
        assert_eq!(entry.irqs(), &[11]);
        let com1 = IoRange {
            base: 0x3f8,
            limit: 0x3ff,
        };
        assert_eq!(entry.io_ranges(), &[com1]);
        assert!(entry
            .flags
            .contains(PrivFlags::CHECK_IRQ | PrivFlags::CHECK_IO_PORT | PrivFlags::CHECK_MEM));

        let query = |k: &mut Kernel, mem: &mut FlatMemory, base: u64, len: u64| {
            sys(k, mem, do_privctl, &[target, privctl::QUERY_MEM, 0, base, len])
        };
        assert!(query(&mut k, &mut mem, 0x1800, 0x100).is_ok());
        assert_eq!(query(&mut k, &mut mem, 0x1f00, 0x200).err(), Some(KernelError::NotPermitted));
        assert_eq!(query(&mut k, &mut mem, u64::MAX, 2).err(), Some(KernelError::NotPermitted));
    }

    #[test]
    fn test_privctl_bad_pointer_and_request() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let target = ep(&k, p);
        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[target, privctl::ADD_IRQ, 0x10]).err(),
            Some(KernelError::Fault)
        );
        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[target, 99]).err(),
            Some(KernelError::InvalidArgument)
        );
        assert_eq!(
            sys(&mut k, &mut mem, do_privctl, &[0x4000, privctl::ALLOW]).err(),
            Some(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_privctl_ipc_filters() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let rule = IpcFilterElement {
            flags: IPCF_MATCH_M_SOURCE,
            m_source: Endpoint::SYSTEM,
            m_type: 0,
        };
        mem.poke(USER_BASE, &rule.to_bytes());
        let self_e = Endpoint::SELF.0 as u64;
        let wire = IpcFilterElement::WIRE_SIZE as u64;

        let set_ipcf = |k: &mut Kernel, mem: &mut FlatMemory, kind: u64| {
            let args = [self_e, privctl::SET_IPCF, USER_BASE, kind, wire];
            call(k, mem, do_privctl, p, &args)
        };
        assert_eq!(set_ipcf(&mut k, &mut mem, 7).err(), Some(KernelError::InvalidArgument));
        set_ipcf(&mut k, &mut mem, FilterKind::Whitelist as u64).unwrap();
        assert_eq!(k.ipcf.in_use(), 1);
        call(&mut k, &mut mem, do_privctl, p, &[self_e, privctl::CLEAR_IPCF]).unwrap();
        assert_eq!(k.ipcf.in_use(), 0);
    }

    #[test]
    fn test_kill() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("victim").unwrap();
        let target = ep(&k, p);
        let system = Endpoint::SYSTEM.0 as u64;

        assert_eq!(
            call(&mut k, &mut mem, do_kill, VM_PROC_NR, &[target, 0]).err(),
            Some(KernelError::InvalidArgument)
        );
        assert_eq!(
            call(&mut k, &mut mem, do_kill, VM_PROC_NR, &[system, SIGKILL as u64]).err(),
            Some(KernelError::NotPermitted)
        );
        call(&mut k, &mut mem, do_kill, VM_PROC_NR, &[target, SIGKILL as u64]).unwrap();
        assert!(k.privs.get(k.priv_of(p)).sig_pending.contains(SIGKILL));
    }

    #[test]
    fn test_getksig_endksig() {
        let (mut k, mut mem) = booted();
        let pm = k.spawn_service("pm").unwrap();
        let p = k.spawn_service("user").unwrap();
        let pm_e = k.procs.get(pm).endpoint;
        let id = k.priv_of(p);
        k.privs.get_mut(id).sig_mgr = pm_e;

        let empty = call(&mut k, &mut mem, do_getksig, pm, &[]).unwrap();
        assert_eq!(empty.endpoint_arg(0), Endpoint::NONE);

        k.cause_sig(p, SIGKILL);
        let got = call(&mut k, &mut mem, do_getksig, pm, &[]).unwrap();
        assert_eq!(got.endpoint_arg(0), k.procs.get(p).endpoint);
        assert!(SigSet::from_bits(got.args[1]).contains(SIGKILL));

        let target = ep(&k, p);
        call(&mut k, &mut mem, do_endksig, pm, &[target]).unwrap();
        assert!(!k.procs.get(p).rts.contains(RtsFlags::SIG_PENDING));
    }

    #[test]
    fn test_diagctl() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("logger").unwrap();
        let text = b"disk 0: read error\n";
        mem.poke(USER_BASE, text);

        call(&mut k, &mut mem, do_diagctl, p, &[diagctl::REGISTER]).unwrap();
        sys(&mut k, &mut mem, do_diagctl, &[diagctl::DIAG, USER_BASE, text.len() as u64]).unwrap();
        assert!(k.privs.get(k.priv_of(p)).sig_pending.contains(SIGKMESS));

        assert_eq!(
            call(
                &mut k,
                &mut mem,
                do_diagctl,
                p,
                &[diagctl::DIAG, USER_BASE, DIAG_BUFSIZE as u64 + 1],
            )
            .err(),
            Some(KernelError::InvalidArgument)
        );
        assert_eq!(
            call(&mut k, &mut mem, do_diagctl, p, &[diagctl::STACKTRACE, 0, 0, 0x4000]).err(),
            Some(KernelError::InvalidArgument)
        );
        let target = ep(&k, p);
        call(&mut k, &mut mem, do_diagctl, p, &[diagctl::STACKTRACE, 0, 0, target]).unwrap();
        assert_eq!(
            call(&mut k, &mut mem, do_diagctl, p, &[42]).err(),
            Some(KernelError::InvalidArgument)
        );

        call(&mut k, &mut mem, do_diagctl, p, &[diagctl::UNREGISTER]).unwrap();
        assert!(!k.privs.get(k.priv_of(p)).diag_sig);
    }

    #[test]
    fn test_sched_proc() {
        let (mut k, _) = booted();
        let p = k.spawn_service("user").unwrap();
        assert_eq!(
            k.sched_proc(p, NR_SCHED_QUEUES as i32, -1, -1, false),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(k.sched_proc(p, -1, 0, -1, false), Err(KernelError::InvalidArgument));

        k.sched_proc(p, 3, 200, -1, true).unwrap();
        let proc = k.procs.get(p);
        assert_eq!(proc.priority, 3);
        assert_eq!(proc.quantum_size_ms, 200);
        assert_eq!(proc.cpu_time_left, 200);
        assert!(proc.misc.contains(MiscFlags::NICED));
        assert!(!proc.rts.contains(RtsFlags::NO_QUANTUM));

        k.sched_proc(p, -1, -1, -1, false).unwrap();
        let proc = k.procs.get(p);
        assert_eq!(proc.priority, 3);
        assert!(!proc.misc.contains(MiscFlags::NICED));
    }

    #[cfg(feature = "smp")]
    #[test]
    fn test_sched_proc_rejects_offline_cpu() {
        use crate::config::KernelConfig;
        use crate::syscall::CallTable;

        let mut config = KernelConfig::with_cpus(2);
        config.cpus_ready = 0b01;
        let mut k = Kernel::boot_with(config, CallTable::system()).unwrap();
        let p = k.spawn_service("user").unwrap();

        for cpu in [1, 2, -5] {
            assert_eq!(k.sched_proc(p, 3, 100, cpu, false), Err(KernelError::BadCpu));
        }
        assert_eq!(k.procs.get(p).priority, 0);

        k.sched_proc(p, 3, 100, 0, false).unwrap();
        let proc = k.procs.get(p);
        assert_eq!(proc.cpu, 0);
        assert_eq!(proc.priority, 3);
    }

    #[test]
    fn test_vmctl_only_from_vm() {
        let (mut k, mut mem) = booted();
        let p = k.spawn_service("drv").unwrap();
        let target = ep(&k, p);
        assert_eq!(
            call(&mut k, &mut mem, do_vmctl, p, &[target, VMCTL_KERN_DONE]).err(),
            Some(KernelError::NotPermitted)
        );
        // Nothing suspended
        assert_eq!(
            call(&mut k, &mut mem, do_vmctl, VM_PROC_NR, &[target, VMCTL_KERN_DONE]).err(),
            Some(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_capctl() {
        let (mut k, mut mem) = booted();
        let create =
            |k: &mut Kernel, mem: &mut FlatMemory, id: u64, rights: RightsMask, level: u64| {
                sys(k, mem, do_capctl, &[capctl::CREATE, id, rights.bits(), level])
                    .map(|m| m.args[0])
            };
        let rw = RightsMask::READ.union(RightsMask::WRITE);
        let parent = create(&mut k, &mut mem, 1, rw, 1).unwrap();
        let child = create(&mut k, &mut mem, 2, RightsMask::READ, 2).unwrap();
        let wide = create(&mut k, &mut mem, 3, RightsMask::ALL, 2).unwrap();
        assert_eq!(
            create(&mut k, &mut mem, 4, RightsMask::READ, 1 << 16).err(),
            Some(KernelError::InvalidArgument)
        );

        sys(&mut k, &mut mem, do_capctl, &[capctl::DERIVE, parent, child]).unwrap();
        let err = sys(&mut k, &mut mem, do_capctl, &[capctl::DERIVE, parent, wide]).unwrap_err();
        assert_eq!(err.errno(), KCAP_RIGHTS_VIOLATION);

        let valid = sys(&mut k, &mut mem, do_capctl, &[capctl::VALIDATE, parent, child]).unwrap();
        assert_eq!(valid.args[0], 1);

        let found = sys(&mut k, &mut mem, do_capctl, &[capctl::LOOKUP, 2]).unwrap();
        assert_eq!(found.args[0], child);
        assert_eq!(
            sys(&mut k, &mut mem, do_capctl, &[capctl::LOOKUP, 99]).err(),
            Some(KernelError::Capability(DagError::NodeNotFound))
        );
        assert_eq!(
            sys(&mut k, &mut mem, do_capctl, &[capctl::DERIVE, parent, 9999]).err(),
            Some(KernelError::Capability(DagError::NodeNotFound))
        );
    }
}
