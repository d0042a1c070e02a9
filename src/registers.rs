//! Typed access to the inferior's register file.
//!
//! `Registers` owns a cached copy of the kernel's per-task `user` struct.
//! The cache is refreshed on every stop; reads are served from it, writes
//! update it and immediately write through to the kernel. Floating-point
//! registers are written back as one block with `SETFPREGS`; everything else
//! goes through the word-granular `POKEUSER` request, sourcing the full word
//! from the cache so neighbouring bytes survive sub-word writes.

use std::mem;

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{ErrnoExt, Error, Result};
use crate::register_info::{
    register_info_by_id, RegisterFormat, RegisterId, RegisterInfo, RegisterKind,
};
use crate::types::{Byte128, Byte64};

/// A value read from or written to a register.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// An 80-bit extended-precision value in its 16-byte storage slot; the
    /// meaningful bits occupy the low 10 bytes.
    LongDouble(Byte128),
    Byte64(Byte64),
    Byte128(Byte128),
}

impl Value {
    fn byte_size(&self) -> usize {
        match self {
            Value::U8(_) | Value::I8(_) => 1,
            Value::U16(_) | Value::I16(_) => 2,
            Value::U32(_) | Value::I32(_) | Value::F32(_) => 4,
            Value::U64(_) | Value::I64(_) | Value::F64(_) | Value::Byte64(_) => 8,
            Value::LongDouble(_) | Value::Byte128(_) => 16,
        }
    }
}

macro_rules! impl_value_try_from {
    ($($variant:ident => $ty:ty),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = Error;

                fn try_from(value: Value) -> Result<$ty> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(Error::usage(format!(
                            "Unexpected register value type: {other:?}"
                        ))),
                    }
                }
            }
        )*
    };
}

impl_value_try_from! {
    U8 => u8, U16 => u16, U32 => u32, U64 => u64,
    I8 => i8, I16 => i16, I32 => i32, I64 => i64,
    F32 => f32, F64 => f64
}

impl TryFrom<Value> for Byte64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Byte64> {
        match value {
            Value::Byte64(v) => Ok(v),
            other => Err(Error::usage(format!(
                "Unexpected register value type: {other:?}"
            ))),
        }
    }
}

impl TryFrom<Value> for Byte128 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Byte128> {
        match value {
            Value::Byte128(v) | Value::LongDouble(v) => Ok(v),
            other => Err(Error::usage(format!(
                "Unexpected register value type: {other:?}"
            ))),
        }
    }
}

/// Cached user-area register bank for one inferior.
pub struct Registers {
    pid: Pid,
    data: libc::user,
}

impl Registers {
    pub(crate) fn new(pid: Pid) -> Self {
        // All-zeroes is a valid initial image; the cache is refreshed from
        // the kernel before anything observes it.
        let data = unsafe { mem::zeroed() };
        Registers { pid, data }
    }

    pub(crate) fn pid(&self) -> Pid {
        self.pid
    }

    /// Reinterprets the cached bytes at `info.offset` per the declared
    /// format and width.
    pub fn read(&self, info: &RegisterInfo) -> Result<Value> {
        let bytes = &self.as_bytes()[info.offset..info.offset + info.size];

        let value = match info.format {
            RegisterFormat::Uint => match info.size {
                1 => Value::U8(bytes[0]),
                2 => Value::U16(u16::from_ne_bytes(bytes.try_into().unwrap())),
                4 => Value::U32(u32::from_ne_bytes(bytes.try_into().unwrap())),
                8 => Value::U64(u64::from_ne_bytes(bytes.try_into().unwrap())),
                _ => return Err(Error::usage("Unexpected register size")),
            },
            RegisterFormat::Double => {
                Value::F64(f64::from_ne_bytes(bytes.try_into().unwrap()))
            }
            RegisterFormat::LongDouble => {
                let mut wide = [0u8; 16];
                wide[..info.size].copy_from_slice(bytes);
                Value::LongDouble(wide)
            }
            RegisterFormat::Vector if info.size == 8 => {
                Value::Byte64(bytes.try_into().unwrap())
            }
            RegisterFormat::Vector => {
                let mut wide = [0u8; 16];
                wide[..info.size].copy_from_slice(bytes);
                Value::Byte128(wide)
            }
        };

        Ok(value)
    }

    pub fn read_by_id(&self, id: RegisterId) -> Result<Value> {
        self.read(register_info_by_id(id)?)
    }

    /// Writes `value` into the register described by `info`: widen to the
    /// register's format, update the cache, write through to the kernel.
    pub fn write(&mut self, info: &RegisterInfo, value: Value) -> Result<()> {
        if value.byte_size() > info.size {
            return Err(Error::usage("mismatched register and value sizes"));
        }

        let wide = widen(info, value);
        let offset = info.offset;
        self.as_bytes_mut()[offset..offset + info.size].copy_from_slice(&wide[..info.size]);

        if info.kind == RegisterKind::Fpr {
            set_fpregs(self.pid, &self.data.i387)
        } else {
            // POKEUSER works in aligned 8-byte words; pick the word up from
            // the just-updated cache so surrounding bytes are preserved.
            let aligned = offset & !0b111;
            let word_bytes: [u8; 8] =
                self.as_bytes()[aligned..aligned + 8].try_into().unwrap();
            write_user_word(self.pid, aligned, u64::from_ne_bytes(word_bytes))
        }
    }

    pub fn write_by_id(&mut self, id: RegisterId, value: Value) -> Result<()> {
        self.write(register_info_by_id(id)?, value)
    }

    /// Repopulates the cache from the kernel: bulk GPRs, bulk FP state, and
    /// the eight debug registers word by word.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        self.data.regs =
            ptrace::getregs(self.pid).os_context("Could not read GPR registers")?;

        get_fpregs(self.pid, &mut self.data.i387)?;

        let dr0 = register_info_by_id(RegisterId::Dr0)?;
        for index in 0..8 {
            let offset = dr0.offset + 8 * index;
            let word = ptrace::read_user(self.pid, offset as ptrace::AddressType)
                .os_context("Could not read debug registers")?;
            self.data.u_debugreg[index] = word as u64;
        }

        Ok(())
    }

    fn as_bytes(&self) -> &[u8] {
        // The user area is plain-old-data; viewing it as bytes mirrors what
        // PEEKUSER/POKEUSER do on the kernel side.
        unsafe {
            std::slice::from_raw_parts(
                &self.data as *const libc::user as *const u8,
                mem::size_of::<libc::user>(),
            )
        }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(
                &mut self.data as *mut libc::user as *mut u8,
                mem::size_of::<libc::user>(),
            )
        }
    }
}

/// Spreads `value` into a 16-byte buffer per the target register's format:
/// floats are cast up to the register's precision, signed integers destined
/// for a `Uint` register are extended through the register's width, and
/// everything else contributes its raw bytes.
fn widen(info: &RegisterInfo, value: Value) -> Byte128 {
    match value {
        Value::F32(v) => widen_float(info, v as f64, |wide| put(wide, v.to_ne_bytes())),
        Value::F64(v) => widen_float(info, v, |wide| put(wide, v.to_ne_bytes())),
        Value::I8(v) => widen_signed(info, v as i64, |wide| put(wide, v.to_ne_bytes())),
        Value::I16(v) => widen_signed(info, v as i64, |wide| put(wide, v.to_ne_bytes())),
        Value::I32(v) => widen_signed(info, v as i64, |wide| put(wide, v.to_ne_bytes())),
        Value::I64(v) => widen_signed(info, v, |wide| put(wide, v.to_ne_bytes())),
        Value::U8(v) => raw(v.to_ne_bytes()),
        Value::U16(v) => raw(v.to_ne_bytes()),
        Value::U32(v) => raw(v.to_ne_bytes()),
        Value::U64(v) => raw(v.to_ne_bytes()),
        Value::Byte64(v) => raw(v),
        Value::LongDouble(v) | Value::Byte128(v) => v,
    }
}

fn widen_float(info: &RegisterInfo, value: f64, fallback: impl FnOnce(&mut Byte128)) -> Byte128 {
    match info.format {
        RegisterFormat::Double => raw(value.to_ne_bytes()),
        RegisterFormat::LongDouble => f80_bytes(value),
        _ => {
            let mut wide = [0u8; 16];
            fallback(&mut wide);
            wide
        }
    }
}

fn widen_signed(info: &RegisterInfo, value: i64, fallback: impl FnOnce(&mut Byte128)) -> Byte128 {
    if info.format == RegisterFormat::Uint {
        match info.size {
            2 => return raw((value as u16).to_ne_bytes()),
            4 => return raw((value as u32).to_ne_bytes()),
            8 => return raw((value as u64).to_ne_bytes()),
            _ => {}
        }
    }

    let mut wide = [0u8; 16];
    fallback(&mut wide);
    wide
}

fn put<const N: usize>(wide: &mut Byte128, bytes: [u8; N]) {
    wide[..N].copy_from_slice(&bytes);
}

fn raw<const N: usize>(bytes: [u8; N]) -> Byte128 {
    let mut wide = [0u8; 16];
    wide[..N].copy_from_slice(&bytes);
    wide
}

/// Encodes an f64 as the 8087 80-bit extended format: 15-bit biased
/// exponent, explicit integer bit, 63-bit fraction, in a 16-byte slot.
fn f80_bytes(value: f64) -> Byte128 {
    const FRAC_BITS: u64 = (1 << 52) - 1;

    let bits = value.to_bits();
    let sign = ((bits >> 63) as u16) << 15;
    let exponent = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & FRAC_BITS;

    let (biased, mantissa): (u16, u64) = if exponent == 0x7ff {
        // Infinities and NaNs keep the all-ones exponent.
        (0x7fff, (1 << 63) | (fraction << 11))
    } else if exponent != 0 {
        ((exponent + 15360) as u16, (1 << 63) | (fraction << 11))
    } else if fraction == 0 {
        (0, 0)
    } else {
        // Subnormal double: shift the leading one up to the integer bit.
        let msb = 63 - fraction.leading_zeros() as i32;
        ((msb + 15309) as u16, fraction << (63 - msb))
    };

    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&mantissa.to_le_bytes());
    out[8..10].copy_from_slice(&(sign | biased).to_le_bytes());
    out
}

pub(crate) fn write_user_word(pid: Pid, offset: usize, word: u64) -> Result<()> {
    ptrace::write_user(pid, offset as ptrace::AddressType, word as libc::c_long)
        .os_context("Could not write to user struct")
}

pub(crate) fn write_gprs(pid: Pid, gprs: &libc::user_regs_struct) -> Result<()> {
    ptrace::setregs(pid, *gprs).os_context("Could not set GPR registers")
}

pub(crate) fn set_fpregs(pid: Pid, fprs: &libc::user_fpregs_struct) -> Result<()> {
    // nix has no GETFPREGS/SETFPREGS wrappers; issue the requests raw.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_SETFPREGS,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            fprs as *const libc::user_fpregs_struct,
        )
    };

    Errno::result(ret).os_context("Could not set FPR registers")?;
    Ok(())
}

pub(crate) fn get_fpregs(pid: Pid, fprs: &mut libc::user_fpregs_struct) -> Result<()> {
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETFPREGS,
            pid.as_raw(),
            std::ptr::null_mut::<libc::c_void>(),
            fprs as *mut libc::user_fpregs_struct,
        )
    };

    Errno::result(ret).os_context("Could not read FPR registers")?;
    Ok(())
}
