//! x86-64 debug-register programming.
//!
//! Four address slots (`dr0`-`dr3`) are shared by hardware breakpoints and
//! watchpoints. `dr7` controls them: bit `2i` is slot `i`'s local enable,
//! bits `[16+4i, 17+4i]` select the trap condition, bits `[18+4i, 19+4i]`
//! the operand length. `dr6` reports which slot fired and whether the stop
//! was a single step.
//!
//! All programming goes through the cached register file, so allocation can
//! scan the current `dr7` image without extra PEEKUSER round trips and the
//! cache stays authoritative between stops.
//!
//! See: Intel SDM, Vol. 3, 17.2

use crate::error::{Error, Result};
use crate::register_info::RegisterId;
use crate::registers::{Registers, Value};
use crate::types::{StoppointMode, VAddr};

/// Number of hardware address slots.
pub(crate) const DEBUG_REGISTER_COUNT: usize = 4;

/// dr6 bits naming the slot(s) that triggered the last debug exception.
pub(crate) const DR6_HIT_MASK: u64 = 0b1111;

/// dr6 single-step bit.
pub(crate) const DR6_SINGLE_STEP: u64 = 1 << 14;

const DR_ADDRESS_IDS: [RegisterId; DEBUG_REGISTER_COUNT] =
    [RegisterId::Dr0, RegisterId::Dr1, RegisterId::Dr2, RegisterId::Dr3];

fn local_enable_bit(slot: usize) -> u64 {
    1 << (slot * 2)
}

/// The condition+length nibble for a slot, within dr7's control half.
fn control_mask(slot: usize) -> u64 {
    0b1111 << (slot * 4 + 16)
}

fn mode_bits(mode: StoppointMode) -> u64 {
    match mode {
        StoppointMode::Execute => 0b00,
        StoppointMode::Write => 0b01,
        StoppointMode::ReadWrite => 0b11,
    }
}

fn size_bits(size: usize) -> Result<u64> {
    match size {
        1 => Ok(0b00),
        2 => Ok(0b01),
        8 => Ok(0b10),
        4 => Ok(0b11),
        _ => Err(Error::usage("Invalid stoppoint size")),
    }
}

/// First slot whose local-enable bit is clear.
fn free_slot(dr7: u64) -> Result<usize> {
    (0..DEBUG_REGISTER_COUNT)
        .find(|&slot| dr7 & local_enable_bit(slot) == 0)
        .ok_or_else(|| Error::usage("No free debug registers"))
}

/// Programs a free slot to trap on `mode` accesses of `size` bytes at
/// `address` and returns the slot index. Execute mode always encodes length
/// `00`, as the architecture requires for instruction breakpoints.
pub(crate) fn set_hardware_stoppoint(
    regs: &mut Registers,
    address: VAddr,
    mode: StoppointMode,
    size: usize,
) -> Result<usize> {
    let dr7: u64 = regs.read_by_id(RegisterId::Dr7)?.try_into()?;
    let slot = free_slot(dr7)?;

    regs.write_by_id(DR_ADDRESS_IDS[slot], Value::U64(address.addr()))?;

    let length = match mode {
        StoppointMode::Execute => 0b00,
        _ => size_bits(size)?,
    };
    let control = (mode_bits(mode) | (length << 2)) << (slot * 4 + 16);

    let mut updated = dr7 & !control_mask(slot);
    updated |= local_enable_bit(slot) | control;
    regs.write_by_id(RegisterId::Dr7, Value::U64(updated))?;

    Ok(slot)
}

/// Releases a slot: zeroes its address register and clears its enable and
/// control bits in dr7.
pub(crate) fn clear_hardware_stoppoint(regs: &mut Registers, slot: usize) -> Result<()> {
    regs.write_by_id(DR_ADDRESS_IDS[slot], Value::U64(0))?;

    let dr7: u64 = regs.read_by_id(RegisterId::Dr7)?.try_into()?;
    let updated = dr7 & !(local_enable_bit(slot) | control_mask(slot));
    regs.write_by_id(RegisterId::Dr7, Value::U64(updated))?;

    Ok(())
}
