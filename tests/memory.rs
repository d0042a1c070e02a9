use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use stopgap::{Process, RegisterId, VAddr};

mod support;
use support::*;

/// An aligned scratch address on the inferior's stack, safely below the
/// live frame of a stopped process that will never be resumed.
fn scratch_address(process: &Process) -> Result<VAddr> {
    let rsp: u64 = process.registers().read_by_id(RegisterId::Rsp)?.try_into()?;
    Ok(VAddr::new((rsp - 256) & !7))
}

#[test]
#[timeout(5000)]
fn memory_writes_round_trip() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;
    let address = scratch_address(&process)?;

    let data: Vec<u8> = (0..32).collect();
    process.write_memory(address, &data)?;

    assert_eq!(process.read_memory(address, data.len())?, data);
    Ok(())
}

#[test]
#[timeout(5000)]
fn sub_word_writes_splice_over_existing_bytes() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;
    let address = scratch_address(&process)?;

    process.write_memory(address, &[0x55; 16])?;
    process.write_memory(address, &[0xaa; 11])?;

    let mut expected = vec![0xaa; 11];
    expected.extend_from_slice(&[0x55; 5]);
    assert_eq!(process.read_memory(address, 16)?, expected);
    Ok(())
}

#[test]
#[timeout(5000)]
fn reads_may_span_page_boundaries() -> Result<()> {
    let devnull = DevNull::open();
    let process = Process::launch("yes", true, Some(devnull.fd()))?;

    let pc = process.get_pc()?;
    let page = VAddr::new(pc.addr() & !0xfff);

    let data = process.read_memory(page, 0x1800)?;
    assert_eq!(data.len(), 0x1800);
    Ok(())
}

#[test]
#[timeout(5000)]
fn zero_length_reads_are_empty() -> Result<()> {
    let devnull = DevNull::open();
    let process = Process::launch("yes", true, Some(devnull.fd()))?;

    assert!(process.read_memory(process.get_pc()?, 0)?.is_empty());
    Ok(())
}

#[test]
#[timeout(5000)]
fn writes_preserve_overlapped_breakpoint_patches() -> Result<()> {
    let devnull = DevNull::open();
    let mut process = Process::launch("yes", true, Some(devnull.fd()))?;
    let address = scratch_address(&process)?;

    process.write_memory(address, &[0x90; 16])?;

    let site = address + 4;
    let id = process.create_breakpoint_site(site, false, false)?.id();
    process.enable_breakpoint_site(id)?;
    assert_eq!(process.read_memory(site, 1)?, vec![0xcc]);

    // Overwrite the whole range; the patch must survive and the saved byte
    // must track the new contents.
    let fresh: Vec<u8> = (0x40..0x50).collect();
    process.write_memory(address, &fresh)?;

    assert_eq!(process.read_memory(site, 1)?, vec![0xcc]);
    assert_eq!(process.read_memory_without_traps(site, 1)?, vec![0x44]);

    process.disable_breakpoint_site(id)?;
    assert_eq!(process.read_memory(address, fresh.len())?, fresh);
    Ok(())
}
