#![allow(dead_code)]

use std::fs;
use std::os::fd::{AsRawFd, RawFd};

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// True while `pid` names a live (possibly zombie-free) process.
pub fn process_exists(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

/// The state character from `/proc/<pid>/stat`: `t` for traced-stopped,
/// `R`/`S` for running/sleeping.
pub fn process_status(pid: Pid) -> char {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).expect("readable stat");
    let after_comm = stat.rfind(')').expect("comm field") + 2;
    stat[after_comm..].chars().next().expect("state field")
}

/// The program entry point recorded in the inferior's auxiliary vector.
pub fn entry_point(pid: Pid) -> u64 {
    let auxv = fs::read(format!("/proc/{}/auxv", pid)).expect("readable auxv");

    for pair in auxv.chunks_exact(16) {
        let key = u64::from_ne_bytes(pair[..8].try_into().unwrap());
        let value = u64::from_ne_bytes(pair[8..].try_into().unwrap());
        if key == libc::AT_ENTRY {
            return value;
        }
    }

    panic!("no AT_ENTRY in auxv");
}

/// A writable `/dev/null` fd to hand inferiors as replacement stdout.
pub struct DevNull(fs::File);

impl DevNull {
    pub fn open() -> Self {
        DevNull(fs::File::create("/dev/null").expect("open /dev/null"))
    }

    pub fn fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}
