//! The process-control core of a source-level debugger for Linux on x86-64.
//!
//! `stopgap` owns a traced inferior and mediates every low-level interaction
//! with it: launching or attaching, waiting on state transitions, resuming
//! and single-stepping, a typed view over the kernel user-area register
//! bank, software and hardware stoppoints, and target memory I/O.
//!
//! The interactive front-end, disassembly, and symbol resolution live
//! elsewhere; this crate exposes the primitives they consume. In particular,
//! [`Process::read_memory_without_traps`] hands any external decoder the
//! real instruction stream with software-breakpoint patches hidden.
//!
//! The library performs no concurrent work of its own. Operations run on
//! the caller's thread and block only in [`Process::wait_on_signal`] and in
//! the underlying trace syscalls; the register cache is authoritative
//! between a wait and the next resume.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("stopgap drives the Linux x86-64 ptrace interface and supports no other platform");

pub mod breakpoint_site;
pub mod error;
pub mod parse;
pub mod pipe;
pub mod process;
pub mod register_info;
pub mod registers;
pub mod stoppoint;
pub mod types;
pub mod watchpoint;

mod x86;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use process::{Process, ProcessState, StopReason, TrapReason};

#[doc(inline)]
pub use registers::{Registers, Value};

#[doc(inline)]
pub use register_info::{
    register_info_by_dwarf_id, register_info_by_id, register_info_by_name, RegisterFormat,
    RegisterId, RegisterInfo, RegisterKind,
};

#[doc(inline)]
pub use breakpoint_site::BreakpointSite;

#[doc(inline)]
pub use watchpoint::Watchpoint;

#[doc(inline)]
pub use stoppoint::{Stoppoint, StoppointCollection};

#[doc(inline)]
pub use types::{Byte128, Byte64, StoppointMode, VAddr};

#[doc(inline)]
pub use pipe::Pipe;

/// Process id of an inferior.
pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;
