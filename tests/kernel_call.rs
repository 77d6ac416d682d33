// End-to-end kernel calls through the public interface: a request is
// written to user memory, trapped with `kernel_call`, and the reply is read
// back from the same buffer.

use kcapgate::cap::{CapId, NodeRef, RightsMask, SecurityLevel, KCAP_RIGHTS_VIOLATION};
use kcapgate::config::KernelConfig;
use kcapgate::error::errno;
use kcapgate::privilege::{CallMask, PrivRequest};
use kcapgate::proc::{Endpoint, MiscFlags, ProcNr, RtsFlags, VM_PROC_NR};
use kcapgate::signal::{SigSet, SIGKILL, SIGKMEM};
use kcapgate::syscall::calls::{capctl, privctl, VMCTL_KERN_DONE};
use kcapgate::syscall::message::{
    call_nr, KERNEL_CALL, SYS_CAPCTL, SYS_GETKSIG, SYS_KILL, SYS_PRIVCTL, SYS_SCHEDULE, SYS_VMCTL,
};
use kcapgate::syscall::user::regions::USER_START;
use kcapgate::syscall::{CallOutcome, CallTable, Completion, Message, UserMemory};
use kcapgate::{Kernel, KernelError};

type Memory = kcapgate::syscall::FlatMemory<4096>;

const REQ: u64 = USER_START;
const VM_REQ: u64 = USER_START + 0x200;
const DATA: u64 = USER_START + 0x400;

// ── Fixtures ──

const SUSPENDING: i32 = KERNEL_CALL + 50;
const FINISHED: u64 = 0xf1;

fn do_needs_memory(
    k: &mut Kernel,
    _: &mut dyn UserMemory,
    caller: ProcNr,
    msg: &mut Message,
) -> Result<Completion, KernelError> {
    if msg.args[5] == 0 {
        msg.args[5] = 1;
        k.vm_suspend(caller);
        return Ok(Completion::VmSuspend);
    }
    msg.args[0] = FINISHED;
    Ok(Completion::Reply)
}

fn boot() -> (Kernel, Memory) {
    let mut calls = CallTable::system();
    calls.map(SUSPENDING, do_needs_memory);
    let k = Kernel::boot_with(KernelConfig::uniprocessor(), calls).unwrap();
    (k, Memory::new())
}

fn trap(
    k: &mut Kernel,
    mem: &mut Memory,
    caller: ProcNr,
    addr: u64,
    m_type: i32,
    args: &[u64],
) -> Message {
    mem.poke(addr, &Message::call(m_type, args).to_bytes());
    let outcome = k.kernel_call(mem, caller, addr);
    assert!(matches!(outcome, Some(CallOutcome::Replied(_))), "{:?}", outcome);
    read(mem, addr)
}

fn read(mem: &Memory, addr: u64) -> Message {
    let mut raw = [0u8; Message::SIZE];
    raw.copy_from_slice(mem.peek(addr, Message::SIZE));
    Message::from_bytes(&raw)
}

fn ep(k: &Kernel, nr: ProcNr) -> u64 {
    k.procs().get(nr).endpoint.0 as u64
}

fn allow(k: &mut Kernel, nr: ProcNr, calls: &[i32]) {
    let nrs: Vec<usize> = calls.iter().map(|&c| call_nr(c).unwrap()).collect();
    k.set_call_mask(nr, CallMask::only(&nrs));
}

// ── Permission gate ──

#[test]
fn test_call_outside_mask_is_denied() {
    let (mut k, mut mem) = boot();
    let drv = k.spawn_service("drv").unwrap();
    allow(&mut k, drv, &[SYS_PRIVCTL]);
    let victim = k.spawn_service("victim").unwrap();

    let target = ep(&k, victim);
    let reply = trap(&mut k, &mut mem, drv, REQ, SYS_KILL, &[target, SIGKILL as u64]);
    assert_eq!(reply.m_type, errno::ECALLDENIED);
    assert_eq!(reply.source, Endpoint::SYSTEM);
    assert!(!k.procs().get(victim).rts.contains(RtsFlags::SIGNALED));
}

#[test]
fn test_privctl_add_irq_through_trap() {
    let (mut k, mut mem) = boot();
    let drv = k.spawn_service("drv").unwrap();
    allow(&mut k, drv, &[SYS_PRIVCTL]);

    mem.poke(DATA, &9u32.to_le_bytes());
    let self_e = Endpoint::SELF.0 as u64;
    let reply = trap(&mut k, &mut mem, drv, REQ, SYS_PRIVCTL, &[self_e, privctl::ADD_IRQ, DATA]);
    assert_eq!(reply.m_type, errno::OK);

    let id = k.procs().get(drv).priv_id.unwrap();
    assert_eq!(k.privs().get(id).irqs(), &[9]);
}

// ── Capability graph ──

#[test]
fn test_capctl_derivation_and_corruption() {
    let (mut k, mut mem) = boot();
    let mgr = k.spawn_service("capmgr").unwrap();
    allow(&mut k, mgr, &[SYS_CAPCTL]);

    let rw = RightsMask::READ.union(RightsMask::WRITE).bits();
    let root = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::CREATE, 100, rw, 0]);
    assert_eq!(root.m_type, errno::OK);
    let r = RightsMask::READ.bits();
    let leaf = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::CREATE, 101, r, 3]);
    let (root, leaf) = (root.args[0], leaf.args[0]);

    let reply = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::DERIVE, root, leaf]);
    assert_eq!(reply.m_type, errno::OK);
    let reply = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::VALIDATE, root, leaf]);
    assert_eq!(reply.args[0], 1);

    // Widening the leaf after the fact breaks the derivation
    let leaf_ref = NodeRef::new(leaf as usize).unwrap();
    k.dag_mut().node_mut(leaf_ref).unwrap().rights_mask = RightsMask::ALL;
    let reply = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::VALIDATE, root, leaf]);
    assert_eq!(reply.args[0], 0);

    let wide = k
        .dag_mut()
        .node_create(CapId(102), RightsMask::ALL, SecurityLevel(4))
        .unwrap();
    let wide = wide.index() as u64;
    let reply = trap(&mut k, &mut mem, mgr, REQ, SYS_CAPCTL, &[capctl::DERIVE, root, wide]);
    assert_eq!(reply.m_type, KCAP_RIGHTS_VIOLATION);
}

// ── VM suspension ──

#[test]
fn test_suspended_call_completed_by_vm() {
    let (mut k, mut mem) = boot();
    let drv = k.spawn_service("drv").unwrap();
    allow(&mut k, drv, &[SUSPENDING]);

    mem.poke(REQ, &Message::call(SUSPENDING, &[]).to_bytes());
    assert_eq!(k.kernel_call(&mut mem, drv, REQ), Some(CallOutcome::Suspended));
    assert!(k.procs().get(drv).rts.contains(RtsFlags::VMREQUEST));
    let vm_priv = k.procs().get(VM_PROC_NR).priv_id.unwrap();
    assert!(k.privs().get(vm_priv).sig_pending.contains(SIGKMEM));
    assert_eq!(k.vm_requests().as_slice(), &[drv]);

    let target = ep(&k, drv);
    let reply = trap(&mut k, &mut mem, VM_PROC_NR, VM_REQ, SYS_VMCTL, &[target, VMCTL_KERN_DONE]);
    assert_eq!(reply.m_type, errno::OK);

    let done = read(&mem, REQ);
    assert_eq!(done.m_type, errno::OK);
    assert_eq!(done.args[0], FINISHED);
    let p = k.procs().get(drv);
    assert!(!p.rts.contains(RtsFlags::VMREQUEST));
    assert!(!p.misc.contains(MiscFlags::KCALL_RESUME));
    assert!(k.vm_requests().is_empty());
}

#[test]
fn test_exit_discards_suspended_call() {
    let (mut k, mut mem) = boot();
    let drv = k.spawn_service("drv").unwrap();
    allow(&mut k, drv, &[SUSPENDING]);

    mem.poke(REQ, &Message::call(SUSPENDING, &[]).to_bytes());
    assert_eq!(k.kernel_call(&mut mem, drv, REQ), Some(CallOutcome::Suspended));
    let target = ep(&k, drv);

    k.proc_exit(drv);
    assert!(k.vm_requests().is_empty());
    let reply = trap(&mut k, &mut mem, VM_PROC_NR, VM_REQ, SYS_VMCTL, &[target, VMCTL_KERN_DONE]);
    assert_eq!(reply.m_type, errno::EINVAL);
}

// ── Signals and scheduling ──

#[test]
fn test_signal_manager_round_trip() {
    let (mut k, mut mem) = boot();
    let pm = k.spawn_service("pm").unwrap();
    allow(&mut k, pm, &[SYS_KILL, SYS_GETKSIG]);
    let user = k.spawn_service("user").unwrap();
    let pm_e = k.procs().get(pm).endpoint;
    let id = k.procs().get(user).priv_id.unwrap();
    k.privs_mut().get_mut(id).sig_mgr = pm_e;

    let target = ep(&k, user);
    let reply = trap(&mut k, &mut mem, pm, REQ, SYS_KILL, &[target, SIGKILL as u64]);
    assert_eq!(reply.m_type, errno::OK);

    let reply = trap(&mut k, &mut mem, pm, REQ, SYS_GETKSIG, &[]);
    assert_eq!(reply.endpoint_arg(0).0 as u64, target);
    assert!(SigSet::from_bits(reply.args[1]).contains(SIGKILL));
}

#[test]
fn test_schedule_validates_priority() {
    let (mut k, mut mem) = boot();
    let sched = k.spawn_service("sched").unwrap();
    allow(&mut k, sched, &[SYS_SCHEDULE]);
    let user = k.spawn_service("user").unwrap();
    let target = ep(&k, user);

    let reply = trap(&mut k, &mut mem, sched, REQ, SYS_SCHEDULE, &[target, 99, 100, u64::MAX, 0]);
    assert_eq!(reply.m_type, errno::EINVAL);
    let reply = trap(&mut k, &mut mem, sched, REQ, SYS_SCHEDULE, &[target, 7, 100, u64::MAX, 0]);
    assert_eq!(reply.m_type, errno::OK);
    assert_eq!(k.procs().get(user).priority, 7);
    assert_eq!(k.procs().get(user).quantum_size_ms, 100);
}

// ── Privilege slots ──

#[test]
fn test_priv_slot_errors() {
    let (mut k, _) = boot();
    let nr = k.procs_mut().spawn("late").unwrap();
    assert_eq!(k.get_priv(nr, PrivRequest::Static(1)), Err(KernelError::Busy));
    assert_eq!(k.get_priv(nr, PrivRequest::Static(60)), Err(KernelError::InvalidArgument));

    let mut spawned = 0;
    loop {
        match k.spawn_service("svc") {
            Ok(_) => spawned += 1,
            Err(e) => {
                assert_eq!(e, KernelError::NoSpace);
                break;
            }
        }
    }
    assert!(spawned > 0);
    assert_eq!(k.privs().free_dynamic(), 0);
}
