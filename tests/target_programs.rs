//! End-to-end scenarios against purpose-built inferiors.
//!
//! Build the targets first (`make -C test-programs`), then run with
//! `cargo test --features test-programs`.

#![cfg(feature = "test-programs")]

use std::os::fd::AsRawFd;

use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use stopgap::{
    parse, Pipe, Process, ProcessState, RegisterId, Signal, StoppointMode, TrapReason, VAddr,
    Value,
};

fn launch_with_stdout(program: &str) -> Result<(Process, Pipe)> {
    let mut channel = Pipe::new(false)?;
    let stdout = channel.write_fd().expect("fresh pipe").as_raw_fd();

    let process = Process::launch(program, true, Some(stdout))?;
    channel.close_write();

    Ok((process, channel))
}

fn read_line(channel: &mut Pipe) -> Result<String> {
    Ok(String::from_utf8(channel.read()?)?)
}

/// The inferior prints an address of interest on its stdout before its
/// first trap; parse it back into our address space model.
fn printed_address(channel: &mut Pipe) -> Result<VAddr> {
    let line = read_line(channel)?;
    let addr = parse::to_integral::<u64>(line.trim(), 16)
        .ok_or_else(|| anyhow::anyhow!("bad address line: {line:?}"))?;
    Ok(VAddr::new(addr))
}

#[test]
#[timeout(10000)]
fn register_writes_are_observed_by_the_inferior() -> Result<()> {
    let (mut process, mut channel) = launch_with_stdout("test-programs/bin/reg_write")?;

    // First trap: plant rsi before the inferior prints it.
    process.resume()?;
    process.wait_on_signal()?;
    process
        .registers_mut()
        .write_by_id(RegisterId::Rsi, Value::U64(0xcafe_cafe))?;

    process.resume()?;
    process.wait_on_signal()?;
    assert_eq!(read_line(&mut channel)?, "0xcafecafe");

    process
        .registers_mut()
        .write_by_id(RegisterId::Mm0, Value::U64(0xba5e_ba11))?;

    process.resume()?;
    process.wait_on_signal()?;
    assert_eq!(read_line(&mut channel)?, "0xba5eba11");

    process
        .registers_mut()
        .write_by_id(RegisterId::Xmm0, Value::F64(42.42))?;

    process.resume()?;
    process.wait_on_signal()?;
    assert_eq!(read_line(&mut channel)?, "42.42");

    // st0 needs the x87 stack marked valid: top-of-stack 7 in fsw, tag
    // words all `valid` in ftw.
    let regs = process.registers_mut();
    regs.write_by_id(RegisterId::St0, Value::F64(42.42))?;
    regs.write_by_id(RegisterId::Fsw, Value::U16(0b0011_1000_0000_0000))?;
    regs.write_by_id(RegisterId::Ftw, Value::U16(0b0011_1111_1111_1111))?;

    process.resume()?;
    process.wait_on_signal()?;
    assert_eq!(read_line(&mut channel)?, "42.42");

    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.state, ProcessState::Exited);
    Ok(())
}

#[test]
#[timeout(10000)]
fn a_write_watchpoint_traps_the_store() -> Result<()> {
    let (mut process, mut channel) = launch_with_stdout("test-programs/bin/watch_me")?;

    // The inferior prints the address of its watched global, then traps.
    process.resume()?;
    process.wait_on_signal()?;
    let watched = printed_address(&mut channel)?;

    let id = process.create_watchpoint(watched, StoppointMode::Write, 8)?.id();
    process.enable_watchpoint(id)?;

    process.resume()?;
    let reason = process.wait_on_signal()?;

    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.info, Signal::SIGTRAP as i32 as u8);
    assert_eq!(reason.trap_reason, Some(TrapReason::HardwareBreakOrWatch));

    // The store completed before the trap was delivered.
    let stored = process.read_memory(watched, 8)?;
    assert_eq!(u64::from_ne_bytes(stored.try_into().unwrap()), 42);

    process.disable_watchpoint(id)?;
    process.resume()?;
    process.wait_on_signal()?; // second raise(SIGTRAP)
    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.state, ProcessState::Exited);
    Ok(())
}

#[test]
#[timeout(10000)]
fn a_breakpoint_stops_at_a_known_function() -> Result<()> {
    let (mut process, mut channel) = launch_with_stdout("test-programs/bin/call_me")?;

    process.resume()?;
    process.wait_on_signal()?;
    let function = printed_address(&mut channel)?;

    let id = process.create_breakpoint_site(function, false, false)?.id();
    process.enable_breakpoint_site(id)?;

    process.resume()?;
    let reason = process.wait_on_signal()?;

    assert_eq!(reason.state, ProcessState::Stopped);
    assert_eq!(reason.trap_reason, Some(TrapReason::SoftwareBreak));
    assert_eq!(process.get_pc()?, function);

    process.resume()?;
    let reason = process.wait_on_signal()?;
    assert_eq!(reason.state, ProcessState::Exited);
    assert_eq!(read_line(&mut channel)?, "in target\n");
    Ok(())
}
