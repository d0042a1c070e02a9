use anyhow::Result;
use ntest::timeout;
use stopgap::{Pid, Process};

mod support;
use support::*;

#[test]
#[timeout(5000)]
fn attach_stops_the_target() -> Result<()> {
    let devnull = DevNull::open();
    let target = Process::launch("yes", false, Some(devnull.fd()))?;
    let _tracer = Process::attach(target.pid())?;

    assert_eq!(process_status(target.pid()), 't');
    Ok(())
}

#[test]
#[timeout(5000)]
fn attach_to_an_invalid_pid_fails() {
    let error = Process::attach(Pid::from_raw(0)).err().expect("attach must fail");
    assert_eq!(error.to_string(), "Invalid PID: 0");
}
