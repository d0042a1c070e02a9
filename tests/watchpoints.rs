use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use stopgap::{Process, RegisterId, StoppointMode, VAddr, Value};

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn unaligned_watchpoints_are_rejected() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;

    let error = process
        .create_watchpoint(VAddr::new(0x1001), StoppointMode::Write, 8)
        .err()
        .expect("unaligned must fail");

    assert_eq!(error.to_string(), "Watchpoint must be aligned to size");
    assert!(process.watchpoints().is_empty());
    Ok(())
}

#[test]
#[timeout(5000)]
fn duplicate_watchpoint_addresses_are_rejected() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;

    process.create_watchpoint(VAddr::new(0x1000), StoppointMode::Write, 8)?;
    assert!(process
        .create_watchpoint(VAddr::new(0x1000), StoppointMode::ReadWrite, 4)
        .is_err());
    Ok(())
}

#[test]
#[timeout(5000)]
fn enabling_programs_a_debug_register_slot() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;

    let id = process
        .create_watchpoint(VAddr::new(0x1000), StoppointMode::Write, 8)?
        .id();
    process.enable_watchpoint(id)?;

    let watchpoint = process.watchpoints().get_by_id(id)?;
    assert_eq!(watchpoint.hardware_slot(), Some(0));

    let dr7: u64 = process.registers().read_by_id(RegisterId::Dr7)?.try_into()?;
    assert_eq!(dr7 & 0b1, 0b1);
    // Condition `write`, length 8 bytes for slot 0.
    assert_eq!((dr7 >> 16) & 0b1111, 0b1001);

    let dr0 = process.registers().read_by_id(RegisterId::Dr0)?;
    assert_eq!(dr0, Value::U64(0x1000));

    process.disable_watchpoint(id)?;
    let watchpoint = process.watchpoints().get_by_id(id)?;
    assert_eq!(watchpoint.hardware_slot(), None);

    let dr7: u64 = process.registers().read_by_id(RegisterId::Dr7)?.try_into()?;
    assert_eq!(dr7 & 0b1, 0);
    Ok(())
}

#[test]
#[timeout(5000)]
fn watchpoints_and_hardware_breakpoints_share_the_slot_pool() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;

    for index in 0..3 {
        let address = VAddr::new(0x2000 + 8 * index);
        let id = process
            .create_watchpoint(address, StoppointMode::Write, 8)?
            .id();
        process.enable_watchpoint(id)?;
    }

    let site = process.create_breakpoint_site(VAddr::new(0x3000), true, false)?.id();
    process.enable_breakpoint_site(site)?;

    let overflow = process
        .create_watchpoint(VAddr::new(0x4000), StoppointMode::ReadWrite, 4)?
        .id();
    assert!(process.enable_watchpoint(overflow).is_err());

    process.disable_breakpoint_site(site)?;
    process.enable_watchpoint(overflow)?;
    Ok(())
}
