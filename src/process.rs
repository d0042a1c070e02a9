//! Ownership and control of a traced inferior.
//!
//! `Process` is the single entry point of the crate: it launches or attaches
//! to a target, drives it with resume/step/wait, and hosts the register file
//! and the stoppoint collections. Every operation assumes the one legal
//! concurrency pattern of ptrace: a single outstanding resume/wait pair on
//! the thread that owns the tracee.

use std::ffi::CString;
use std::io::IoSliceMut;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, info};

use crate::breakpoint_site::BreakpointSite;
use crate::error::{ErrnoExt, Error, Result};
use crate::pipe::Pipe;
use crate::register_info::RegisterId;
use crate::registers::{self, Registers, Value};
use crate::stoppoint::StoppointCollection;
use crate::types::{StoppointMode, VAddr};
use crate::watchpoint::Watchpoint;
use crate::x86;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessState {
    Stopped,
    Running,
    Exited,
    Terminated,
}

/// Finer classification of a `SIGTRAP` stop, derived from `dr6`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrapReason {
    SoftwareBreak,
    SingleStep,
    HardwareBreakOrWatch,
    Unknown,
}

/// Why the last wait returned.
///
/// `info` carries the delivered signal when stopped, the exit status when
/// exited, and the terminating signal when terminated. `trap_reason` is
/// present only for stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StopReason {
    pub state: ProcessState,
    pub info: u8,
    pub trap_reason: Option<TrapReason>,
}

impl StopReason {
    fn from_wait_status(status: WaitStatus) -> Result<Self> {
        let (state, info) = match status {
            WaitStatus::Exited(_, code) => (ProcessState::Exited, code as u8),
            WaitStatus::Signaled(_, signal, _) => (ProcessState::Terminated, signal as u8),
            WaitStatus::Stopped(_, signal) => (ProcessState::Stopped, signal as u8),
            other => {
                return Err(Error::usage(format!(
                    "Got a wait status which doesn't represent a non-running child: {other:?}"
                )))
            }
        };

        Ok(StopReason { state, info, trap_reason: None })
    }
}

pub struct Process {
    pid: Pid,
    /// Kill and reap the inferior on drop; set when we forked it ourselves.
    terminate_on_end: bool,
    is_attached: bool,
    state: ProcessState,
    registers: Registers,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<Watchpoint>,
}

impl Process {
    fn new(pid: Pid, terminate_on_end: bool, is_attached: bool) -> Self {
        Process {
            pid,
            terminate_on_end,
            is_attached,
            state: ProcessState::Stopped,
            registers: Registers::new(pid),
            breakpoint_sites: StoppointCollection::default(),
            watchpoints: StoppointCollection::default(),
        }
    }

    /// Forks and execs `path` with no arguments. With `debug` the child
    /// requests tracing before exec and the returned process is stopped at
    /// its first instruction; without it the child runs free and is only
    /// reaped on drop. `stdout_replacement` is dup2'd over the child's
    /// stdout, which test harnesses use to capture inferior output.
    ///
    /// The child reports any pre-exec failure as a message through a
    /// close-on-exec pipe; a successful exec closes it and the parent reads
    /// end-of-file.
    pub fn launch(
        path: impl AsRef<Path>,
        debug: bool,
        stdout_replacement: Option<RawFd>,
    ) -> Result<Process> {
        let path = path.as_ref();
        let mut channel = Pipe::new(true)?;

        // The exec argument block must exist before the fork so the child
        // never touches the allocator: one NUL-terminated program string and
        // a null-terminated two-slot pointer array on the stack.
        let program = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::usage("Program path contains a NUL byte"))?;
        let argv: [*const libc::c_char; 2] = [program.as_ptr(), std::ptr::null()];

        let child = match unsafe { unistd::fork() }.os_context("fork failed")? {
            ForkResult::Child => {
                exec_child(channel, debug, &program, &argv, stdout_replacement)
            }
            ForkResult::Parent { child } => child,
        };

        let mut process = Process::new(child, true, debug);
        if debug {
            process.wait_on_signal()?;
        }

        channel.close_write();
        let data = channel.read()?;

        if !data.is_empty() {
            // The child died before exec; dropping `process` reaps it.
            return Err(Error::usage(String::from_utf8_lossy(&data).into_owned()));
        }

        let is_debug = debug;
        info!(pid = child.as_raw(), program = %path.display(), debug = is_debug, "launched inferior");
        Ok(process)
    }

    /// Attaches to a running process and waits for the attach stop.
    pub fn attach(pid: Pid) -> Result<Process> {
        if pid.as_raw() <= 0 {
            return Err(Error::usage(format!("Invalid PID: {pid}")));
        }

        ptrace::attach(pid).os_context("Could not attach")?;

        let mut process = Process::new(pid, false, true);
        process.wait_on_signal()?;

        info!(pid = pid.as_raw(), "attached to inferior");
        Ok(process)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    pub fn watchpoints(&self) -> &StoppointCollection<Watchpoint> {
        &self.watchpoints
    }

    /// The cached program counter.
    pub fn get_pc(&self) -> Result<VAddr> {
        let rip: u64 = self.registers.read_by_id(RegisterId::Rip)?.try_into()?;
        Ok(VAddr::new(rip))
    }

    pub fn set_pc(&mut self, address: VAddr) -> Result<()> {
        self.registers
            .write_by_id(RegisterId::Rip, Value::U64(address.addr()))
    }

    /// Resumes execution. An enabled software breakpoint under the program
    /// counter is transparently stepped over first: disable, single-step,
    /// re-enable, continue.
    pub fn resume(&mut self) -> Result<()> {
        let pc = self.get_pc()?;
        if self.software_site_enabled_at(pc) {
            self.step_over_site(pc)?;
        }

        ptrace::cont(self.pid, None).os_context("Could not resume")?;
        self.state = ProcessState::Running;

        debug!(pid = self.pid.as_raw(), "resumed inferior");
        Ok(())
    }

    /// Executes one instruction and returns the resulting stop. As with
    /// [`resume`](Self::resume), an enabled software breakpoint at the
    /// program counter is lifted for the duration of the step.
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        let pc = self.get_pc()?;
        let mut site_to_reenable = None;

        if self.software_site_enabled_at(pc) {
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .disable(&mut self.registers)?;
            site_to_reenable = Some(pc);
        }

        ptrace::step(self.pid, None).os_context("Could not single step")?;
        let reason = self.wait_on_signal()?;

        if let Some(address) = site_to_reenable {
            self.breakpoint_sites
                .get_by_address_mut(address)?
                .enable(&mut self.registers)?;
        }

        Ok(reason)
    }

    /// Blocks until the inferior stops or dies, updates the process state,
    /// and normalizes the wait status into a [`StopReason`].
    ///
    /// On a stop of a traced inferior the register cache is refreshed. A
    /// `SIGTRAP` whose preceding byte is an enabled software breakpoint site
    /// rewinds the program counter onto the site (`INT3` traps one past the
    /// patched byte), and the trap is classified from `dr6`.
    pub fn wait_on_signal(&mut self) -> Result<StopReason> {
        let status = waitpid(self.pid, None).os_context("waitpid failed")?;

        let mut reason = StopReason::from_wait_status(status)?;
        self.state = reason.state;

        if self.is_attached && self.state == ProcessState::Stopped {
            self.registers.refresh()?;

            if reason.info == Signal::SIGTRAP as i32 as u8 {
                let instruction_start = self.get_pc()? - 1;
                if self.software_site_enabled_at(instruction_start) {
                    self.set_pc(instruction_start)?;
                }
                reason.trap_reason = Some(self.classify_trap()?);
            } else {
                reason.trap_reason = Some(TrapReason::Unknown);
            }
        }

        debug!(
            pid = self.pid.as_raw(),
            state = ?reason.state,
            info = reason.info,
            trap = ?reason.trap_reason,
            "inferior state change"
        );
        Ok(reason)
    }

    fn classify_trap(&self) -> Result<TrapReason> {
        let dr6: u64 = self.registers.read_by_id(RegisterId::Dr6)?.try_into()?;

        Ok(if dr6 & x86::DR6_HIT_MASK != 0 {
            TrapReason::HardwareBreakOrWatch
        } else if dr6 & x86::DR6_SINGLE_STEP != 0 {
            TrapReason::SingleStep
        } else {
            TrapReason::SoftwareBreak
        })
    }

    /// Registers a breakpoint site at `address` without enabling it. At most
    /// one site may exist per address.
    pub fn create_breakpoint_site(
        &mut self,
        address: VAddr,
        hardware: bool,
        internal: bool,
    ) -> Result<&BreakpointSite> {
        if self.breakpoint_sites.contains_address(address) {
            return Err(Error::usage(format!(
                "Breakpoint site already created at address {address}"
            )));
        }

        debug!(address = %address, hardware, internal, "created breakpoint site");
        Ok(self
            .breakpoint_sites
            .push(BreakpointSite::new(address, hardware, internal)))
    }

    /// Registers a watchpoint without enabling it. At most one watchpoint
    /// may exist per address, and the address must be `size`-aligned.
    pub fn create_watchpoint(
        &mut self,
        address: VAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<&Watchpoint> {
        if self.watchpoints.contains_address(address) {
            return Err(Error::usage(format!(
                "Watchpoint already created at address {address}"
            )));
        }

        let watchpoint = Watchpoint::new(address, mode, size)?;
        debug!(address = %address, ?mode, size, "created watchpoint");
        Ok(self.watchpoints.push(watchpoint))
    }

    pub fn enable_breakpoint_site(&mut self, id: u32) -> Result<()> {
        self.breakpoint_sites
            .get_by_id_mut(id)?
            .enable(&mut self.registers)
    }

    pub fn disable_breakpoint_site(&mut self, id: u32) -> Result<()> {
        self.breakpoint_sites
            .get_by_id_mut(id)?
            .disable(&mut self.registers)
    }

    /// Disables and removes a breakpoint site.
    pub fn remove_breakpoint_site(&mut self, id: u32) -> Result<()> {
        self.breakpoint_sites.remove_by_id(id, &mut self.registers)
    }

    /// Disables and removes the breakpoint site at `address`.
    pub fn remove_breakpoint_site_by_address(&mut self, address: VAddr) -> Result<()> {
        self.breakpoint_sites
            .remove_by_address(address, &mut self.registers)
    }

    pub fn enable_watchpoint(&mut self, id: u32) -> Result<()> {
        self.watchpoints
            .get_by_id_mut(id)?
            .enable(&mut self.registers)
    }

    pub fn disable_watchpoint(&mut self, id: u32) -> Result<()> {
        self.watchpoints
            .get_by_id_mut(id)?
            .disable(&mut self.registers)
    }

    /// Disables and removes a watchpoint.
    pub fn remove_watchpoint(&mut self, id: u32) -> Result<()> {
        self.watchpoints.remove_by_id(id, &mut self.registers)
    }

    /// Disables and removes the watchpoint at `address`.
    pub fn remove_watchpoint_by_address(&mut self, address: VAddr) -> Result<()> {
        self.watchpoints
            .remove_by_address(address, &mut self.registers)
    }

    /// Reads `amount` bytes from the inferior in one vectored call, chunked
    /// so no remote iovec crosses a 4 KiB page boundary.
    pub fn read_memory(&self, address: VAddr, amount: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; amount];
        if amount == 0 {
            return Ok(buf);
        }

        let mut remote = Vec::new();
        let mut cursor = address;
        let mut remaining = amount;
        while remaining > 0 {
            let up_to_next_page = (0x1000 - (cursor.addr() & 0xfff)) as usize;
            let chunk = remaining.min(up_to_next_page);
            remote.push(RemoteIoVec { base: cursor.addr() as usize, len: chunk });
            remaining -= chunk;
            cursor += chunk as i64;
        }

        let mut local = [IoSliceMut::new(&mut buf)];
        process_vm_readv(self.pid, &mut local, &remote)
            .os_context("Could not read process memory")?;

        Ok(buf)
    }

    /// Like [`read_memory`](Self::read_memory), but with every enabled
    /// software breakpoint patch replaced by the original byte, so a
    /// disassembler sees real instructions instead of `INT3`.
    pub fn read_memory_without_traps(&self, address: VAddr, amount: usize) -> Result<Vec<u8>> {
        let mut data = self.read_memory(address, amount)?;
        let end = address + amount as i64;

        for site in &self.breakpoint_sites {
            if site.is_hardware() || !site.is_enabled() || !site.in_range(address, end) {
                continue;
            }
            let index = (site.address().addr() - address.addr()) as usize;
            data[index] = site.saved_byte();
        }

        Ok(data)
    }

    /// Writes `data` into the inferior in 8-byte `POKEDATA` quanta, splicing
    /// a sub-word tail over the existing bytes.
    ///
    /// Enabled software breakpoint sites inside the written range are
    /// disabled for the duration of the write and re-enabled over the new
    /// bytes, so their saved bytes track the fresh instruction stream and
    /// the `INT3` patches survive.
    pub fn write_memory(&mut self, address: VAddr, data: &[u8]) -> Result<()> {
        let end = address + data.len() as i64;
        let overlapping: Vec<u32> = self
            .breakpoint_sites
            .iter()
            .filter(|site| {
                !site.is_hardware() && site.is_enabled() && site.in_range(address, end)
            })
            .map(|site| site.id())
            .collect();

        for &id in &overlapping {
            self.breakpoint_sites
                .get_by_id_mut(id)?
                .disable(&mut self.registers)?;
        }

        let mut result = self.write_memory_words(address, data);

        for &id in &overlapping {
            if let Ok(site) = self.breakpoint_sites.get_by_id_mut(id) {
                let reenabled = site.enable(&mut self.registers);
                if result.is_ok() {
                    result = reenabled;
                }
            }
        }

        result
    }

    fn write_memory_words(&mut self, address: VAddr, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let remaining = data.len() - written;
            let cursor = address + written as i64;

            let word = if remaining >= 8 {
                u64::from_ne_bytes(data[written..written + 8].try_into().unwrap())
            } else {
                // Sub-word tail: keep the bytes past the write intact.
                let current = self.read_memory(cursor, 8)?;
                let mut bytes = [0u8; 8];
                bytes[..remaining].copy_from_slice(&data[written..]);
                bytes[remaining..].copy_from_slice(&current[remaining..8]);
                u64::from_ne_bytes(bytes)
            };

            ptrace::write(
                self.pid,
                cursor.addr() as ptrace::AddressType,
                word as libc::c_long,
            )
            .os_context("Failed to write memory")?;

            written += 8;
        }

        Ok(())
    }

    /// Writes one aligned 8-byte word into the user area.
    pub fn write_user_struct(&mut self, offset: usize, word: u64) -> Result<()> {
        registers::write_user_word(self.pid, offset, word)
    }

    /// Bulk-writes the general-purpose register bank.
    pub fn write_gprs(&mut self, gprs: &libc::user_regs_struct) -> Result<()> {
        registers::write_gprs(self.pid, gprs)
    }

    /// Bulk-writes the floating-point register bank.
    pub fn write_fprs(&mut self, fprs: &libc::user_fpregs_struct) -> Result<()> {
        registers::set_fpregs(self.pid, fprs)
    }

    fn software_site_enabled_at(&self, address: VAddr) -> bool {
        self.breakpoint_sites
            .iter()
            .any(|site| site.at_address(address) && site.is_enabled() && !site.is_hardware())
    }

    /// Lifts the software breakpoint at `pc`, executes the patched-over
    /// instruction, and re-installs the trap.
    fn step_over_site(&mut self, pc: VAddr) -> Result<()> {
        self.breakpoint_sites
            .get_by_address_mut(pc)?
            .disable(&mut self.registers)?;

        ptrace::step(self.pid, None).os_context("Failed a single step")?;
        self.wait_on_signal()?;

        self.breakpoint_sites
            .get_by_address_mut(pc)?
            .enable(&mut self.registers)?;

        Ok(())
    }
}

impl Drop for Process {
    /// Best-effort teardown: stop a running tracee so it can be detached,
    /// detach and let it continue, then kill and reap if we own it.
    fn drop(&mut self) {
        debug!(pid = self.pid.as_raw(), "tearing down inferior");

        if self.is_attached {
            if self.state == ProcessState::Running {
                let _ = signal::kill(self.pid, Signal::SIGSTOP);
                let _ = waitpid(self.pid, None);
            }

            let _ = ptrace::detach(self.pid, None);
            let _ = signal::kill(self.pid, Signal::SIGCONT);
        }

        if self.terminate_on_end {
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

/// Child half of [`Process::launch`]: never returns. Failures before exec
/// are reported as `"<prefix>: <strerror>"` through the pipe. `argv` is the
/// caller's pre-fork null-terminated pointer array; it stays valid because
/// the backing `CString` outlives the exec attempt.
fn exec_child(
    mut channel: Pipe,
    debug: bool,
    program: &CString,
    argv: &[*const libc::c_char],
    stdout_replacement: Option<RawFd>,
) -> ! {
    // ASLR off so breakpoint addresses are stable across runs.
    let _ = personality::set(Persona::ADDR_NO_RANDOMIZE);
    channel.close_read();

    if let Some(fd) = stdout_replacement {
        if let Err(errno) = unistd::dup2(fd, libc::STDOUT_FILENO) {
            exit_with_error(&mut channel, "stdout replacement failed", errno);
        }
    }

    if debug {
        if let Err(errno) = ptrace::traceme() {
            exit_with_error(&mut channel, "Tracing failed", errno);
        }
    }

    // The nix exec wrappers allocate an argument vector internally, which is
    // not async-signal-safe; use the raw call with the pre-fork array.
    unsafe { libc::execvp(program.as_ptr(), argv.as_ptr()) };
    exit_with_error(&mut channel, "exec failed", Errno::last());
}

fn exit_with_error(channel: &mut Pipe, prefix: &str, errno: Errno) -> ! {
    let message = format!("{prefix}: {}", errno.desc());
    let _ = channel.write(message.as_bytes());
    unsafe { libc::_exit(1) }
}
