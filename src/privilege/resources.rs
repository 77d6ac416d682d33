//! Hardware Resource Registration
//!
//! IRQ lines, I/O port ranges and physical memory ranges a driver may use.
//! Each table is bounded; registering a resource twice is a no-op.

use super::table::{PrivEntry, PrivFlags};
use crate::error::KernelError;

/// Inclusive I/O port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRange {
    pub base: u32,
    pub limit: u32,
}

impl IoRange {
    /// Size of the wire representation.
    pub const WIRE_SIZE: usize = 8;

    /// Decode from little-endian bytes.
    pub fn from_bytes(b: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            base: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            limit: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
        }
    }
}

/// Inclusive physical memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub base: u64,
    pub limit: u64,
}

impl MemRange {
    /// Size of the wire representation.
    pub const WIRE_SIZE: usize = 16;

    /// Decode from little-endian bytes.
    pub fn from_bytes(b: &[u8; Self::WIRE_SIZE]) -> Self {
        let mut base = [0u8; 8];
        let mut limit = [0u8; 8];
        base.copy_from_slice(&b[..8]);
        limit.copy_from_slice(&b[8..]);
        Self {
            base: u64::from_le_bytes(base),
            limit: u64::from_le_bytes(limit),
        }
    }
}

impl PrivEntry {
    /// Allow the process to use an IRQ line.
    ///
    /// The `CHECK_IRQ` flag is raised even when the table turns out to be
    /// full, so the process never silently falls back to unchecked access.
    pub fn add_irq(&mut self, irq: u32) -> Result<(), KernelError> {
        self.flags.insert(PrivFlags::CHECK_IRQ);
        if self.irq_tab.contains(&irq) {
            return Ok(());
        }
        self.irq_tab.push(irq).map_err(|_| {
            log::warn!("privctl: priv {} has {} IRQs", self.id().index(), self.irq_tab.len());
            KernelError::ResourceExhausted
        })
    }

    /// Allow the process to use an I/O port range.
    pub fn add_io(&mut self, range: IoRange) -> Result<(), KernelError> {
        self.flags.insert(PrivFlags::CHECK_IO_PORT);
        if self.io_tab.contains(&range) {
            return Ok(());
        }
        self.io_tab.push(range).map_err(|_| {
            log::warn!(
                "privctl: priv {} has {} I/O ranges",
                self.id().index(),
                self.io_tab.len()
            );
            KernelError::ResourceExhausted
        })
    }

    /// Allow the process to map a physical memory range.
    pub fn add_mem(&mut self, range: MemRange) -> Result<(), KernelError> {
        self.flags.insert(PrivFlags::CHECK_MEM);
        if self.mem_tab.contains(&range) {
            return Ok(());
        }
        self.mem_tab.push(range).map_err(|_| {
            log::warn!(
                "privctl: priv {} has {} mem ranges",
                self.id().index(),
                self.mem_tab.len()
            );
            KernelError::ResourceExhausted
        })
    }

    /// Check that `[addr, addr + len)` lies inside one registered memory range.
    pub fn query_mem(&self, addr: u64, len: u64) -> Result<(), KernelError> {
        let limit = addr
            .checked_add(len)
            .and_then(|end| end.checked_sub(1))
            .ok_or(KernelError::NotPermitted)?;
        if limit < addr {
            return Err(KernelError::NotPermitted);
        }
        if self
            .mem_tab
            .iter()
            .any(|r| addr >= r.base && limit <= r.limit)
        {
            Ok(())
        } else {
            Err(KernelError::NotPermitted)
        }
    }

    /// Registered IRQ lines.
    pub fn irqs(&self) -> &[u32] {
        &self.irq_tab
    }

    /// Registered I/O ranges.
    pub fn io_ranges(&self) -> &[IoRange] {
        &self.io_tab
    }

    /// Registered memory ranges.
    pub fn mem_ranges(&self) -> &[MemRange] {
        &self.mem_tab
    }
}
