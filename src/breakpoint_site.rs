//! Breakpoint sites: a trap installed at one address of the inferior.
//!
//! A software site patches the first byte of the instruction at its address
//! with `0xCC` (x86 `INT3`) and remembers the original byte; a hardware site
//! claims one of the four debug-register slots instead and leaves the code
//! stream untouched.

use std::sync::atomic::{AtomicU32, Ordering};

use nix::sys::ptrace;
use tracing::debug;

use crate::error::{ErrnoExt, Result};
use crate::registers::Registers;
use crate::stoppoint::Stoppoint;
use crate::types::{StoppointMode, VAddr};
use crate::x86;

/// The x86 `INT3` opcode.
const INT3: u8 = 0xcc;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

pub struct BreakpointSite {
    id: u32,
    address: VAddr,
    is_enabled: bool,
    /// Original low byte at `address`, valid while a software site is
    /// enabled.
    saved_byte: u8,
    is_hardware: bool,
    is_internal: bool,
    hardware_slot: Option<usize>,
}

impl BreakpointSite {
    pub(crate) fn new(address: VAddr, is_hardware: bool, is_internal: bool) -> Self {
        BreakpointSite {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            address,
            is_enabled: false,
            saved_byte: 0,
            is_hardware,
            is_internal,
            hardware_slot: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> VAddr {
        self.address
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    /// The byte the `INT3` patch displaced, while enabled.
    pub(crate) fn saved_byte(&self) -> u8 {
        self.saved_byte
    }

    pub fn at_address(&self, address: VAddr) -> bool {
        self.address == address
    }

    pub fn in_range(&self, low: VAddr, high: VAddr) -> bool {
        low <= self.address && self.address < high
    }

    /// Installs the trap. Enabling an enabled site is a no-op.
    pub(crate) fn enable(&mut self, regs: &mut Registers) -> Result<()> {
        if self.is_enabled {
            return Ok(());
        }

        if self.is_hardware {
            let slot =
                x86::set_hardware_stoppoint(regs, self.address, StoppointMode::Execute, 1)?;
            self.hardware_slot = Some(slot);
        } else {
            let pid = regs.pid();
            let addr = self.address.addr() as ptrace::AddressType;

            let word = ptrace::read(pid, addr)
                .os_context("Enabling the breakpoint site failed")? as u64;
            self.saved_byte = word as u8;

            let patched = (word & !0xff) | u64::from(INT3);
            ptrace::write(pid, addr, patched as libc::c_long)
                .os_context("Enabling the breakpoint site failed")?;
        }

        debug!(id = self.id, address = %self.address, hardware = self.is_hardware, "enabled breakpoint site");
        self.is_enabled = true;
        Ok(())
    }

    /// Removes the trap and restores the original state. Disabling a
    /// disabled site is a no-op.
    pub(crate) fn disable(&mut self, regs: &mut Registers) -> Result<()> {
        if !self.is_enabled {
            return Ok(());
        }

        if let Some(slot) = self.hardware_slot.take() {
            x86::clear_hardware_stoppoint(regs, slot)?;
        } else {
            let pid = regs.pid();
            let addr = self.address.addr() as ptrace::AddressType;

            let word = ptrace::read(pid, addr)
                .os_context("Disabling the breakpoint site failed")? as u64;
            let restored = (word & !0xff) | u64::from(self.saved_byte);
            ptrace::write(pid, addr, restored as libc::c_long)
                .os_context("Disabling the breakpoint site failed")?;
        }

        debug!(id = self.id, address = %self.address, "disabled breakpoint site");
        self.is_enabled = false;
        Ok(())
    }
}

impl Stoppoint for BreakpointSite {
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
        BreakpointSite::disable(self, regs)
    }
}
