//! Small value types shared across the crate.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// An 8-byte register value viewed as raw bytes (MMX registers).
pub type Byte64 = [u8; 8];

/// A 16-byte register value viewed as raw bytes (SSE and x87 storage).
pub type Byte128 = [u8; 16];

/// A virtual address in the inferior's address space.
///
/// Deliberately not interchangeable with plain integers: construction and
/// extraction are explicit, while ordering and signed-offset arithmetic work
/// directly on the wrapper.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VAddr(u64);

impl VAddr {
    pub const fn new(addr: u64) -> Self {
        VAddr(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }
}

impl Add<i64> for VAddr {
    type Output = VAddr;

    fn add(self, offset: i64) -> VAddr {
        VAddr(self.0.wrapping_add_signed(offset))
    }
}

impl Sub<i64> for VAddr {
    type Output = VAddr;

    fn sub(self, offset: i64) -> VAddr {
        VAddr(self.0.wrapping_add_signed(offset.wrapping_neg()))
    }
}

impl AddAssign<i64> for VAddr {
    fn add_assign(&mut self, offset: i64) {
        *self = *self + offset;
    }
}

impl SubAssign<i64> for VAddr {
    fn sub_assign(&mut self, offset: i64) {
        *self = *self - offset;
    }
}

impl fmt::LowerHex for VAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for VAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Access kind a hardware stoppoint traps on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoppointMode {
    /// Instruction fetch at the address.
    Execute,

    /// Data write to the address.
    Write,

    /// Data read or write to the address.
    ReadWrite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vaddr_signed_arithmetic() {
        let base = VAddr::new(0x1000);
        assert_eq!(base + 8, VAddr::new(0x1008));
        assert_eq!(base - 8, VAddr::new(0xff8));
        assert_eq!(base + (-16), VAddr::new(0xff0));

        let mut cursor = base;
        cursor += 0x1000;
        assert_eq!(cursor.addr(), 0x2000);
    }

    #[test]
    fn vaddr_ordering() {
        assert!(VAddr::new(0x1000) < VAddr::new(0x1001));
        assert!(VAddr::new(0x1000) <= VAddr::new(0x1000));
    }

    #[test]
    fn vaddr_formats_as_hex() {
        assert_eq!(format!("{}", VAddr::new(0xdeadbeef)), "0xdeadbeef");
        assert_eq!(format!("{:#x}", VAddr::new(0x10)), "0x10");
    }
}
