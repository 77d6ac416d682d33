//! Shared fixtures for unit tests.

use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::syscall::user::regions;
use crate::syscall::CallTable;

/// User memory large enough for every test buffer.
pub type FlatMemory = crate::syscall::user::FlatMemory<8192>;

/// First usable user address.
pub const USER_BASE: u64 = regions::USER_START;

/// Booted uniprocessor kernel with the built-in calls.
pub fn booted() -> (Kernel, FlatMemory) {
    booted_with(CallTable::system())
}

/// Booted uniprocessor kernel with the calls of `calls`.
pub fn booted_with(calls: CallTable) -> (Kernel, FlatMemory) {
    let k = Kernel::boot_with(KernelConfig::uniprocessor(), calls).unwrap();
    (k, FlatMemory::new())
}
