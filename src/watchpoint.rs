//! Data watchpoints backed by the hardware debug registers.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::registers::Registers;
use crate::stoppoint::Stoppoint;
use crate::types::{StoppointMode, VAddr};
use crate::x86;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug)]
pub struct Watchpoint {
    id: u32,
    address: VAddr,
    mode: StoppointMode,
    size: usize,
    is_enabled: bool,
    hardware_slot: Option<usize>,
}

impl Watchpoint {
    /// The watched address must be aligned to the watch size; the debug
    /// registers cannot express a straddling watch.
    pub(crate) fn new(address: VAddr, mode: StoppointMode, size: usize) -> Result<Self> {
        if address.addr() & (size as u64 - 1) != 0 {
            return Err(Error::usage("Watchpoint must be aligned to size"));
        }

        Ok(Watchpoint {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            address,
            mode,
            size,
            is_enabled: false,
            hardware_slot: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> VAddr {
        self.address
    }

    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// The debug-register slot backing this watchpoint while enabled.
    pub fn hardware_slot(&self) -> Option<usize> {
        self.hardware_slot
    }

    pub fn at_address(&self, address: VAddr) -> bool {
        self.address == address
    }

    pub fn in_range(&self, low: VAddr, high: VAddr) -> bool {
        low <= self.address && self.address < high
    }

    /// Claims a debug-register slot. Enabling an enabled watchpoint is a
    /// no-op.
    pub(crate) fn enable(&mut self, regs: &mut Registers) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }

        let slot = x86::set_hardware_stoppoint(regs, self.address, self.mode, self.size)?;
        self.hardware_slot = Some(slot);
        self.is_enabled = true;

        debug!(id = self.id, address = %self.address, slot, "enabled watchpoint");
        Ok(())
    }

    /// Releases the slot. Disabling a disabled watchpoint is a no-op.
    pub(crate) fn disable(&mut self, regs: &mut Registers) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }

        if let Some(slot) = self.hardware_slot.take() {
            x86::clear_hardware_stoppoint(regs, slot)?;
        }
        self.is_enabled = false;

        debug!(id = self.id, address = %self.address, "disabled watchpoint");
        Ok(())
    }
}

impl Stoppoint for Watchpoint {
    fn id(&self) -> u32 {
        self.id
    }

    fn address(&self) -> VAddr {
        self.address
    }

    fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    fn disable(&mut self, regs: &mut Registers) -> Result<()> {
        Watchpoint::disable(self, regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_enforces_alignment() {
        assert!(Watchpoint::new(VAddr::new(0x1000), StoppointMode::Write, 8).is_ok());
        assert!(Watchpoint::new(VAddr::new(0x1004), StoppointMode::Write, 4).is_ok());
        assert!(Watchpoint::new(VAddr::new(0x1001), StoppointMode::Write, 1).is_ok());

        let err = Watchpoint::new(VAddr::new(0x1001), StoppointMode::Write, 8).unwrap_err();
        assert!(err.to_string().contains("aligned to size"));
        assert!(Watchpoint::new(VAddr::new(0x1002), StoppointMode::ReadWrite, 4).is_err());
    }

    #[test]
    fn ids_increase_per_construction() {
        let first = Watchpoint::new(VAddr::new(0x1000), StoppointMode::Write, 8).unwrap();
        let second = Watchpoint::new(VAddr::new(0x2000), StoppointMode::Write, 8).unwrap();
        assert!(second.id() > first.id());
    }
}
