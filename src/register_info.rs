//! Static catalog of the x86-64 register bank.
//!
//! One entry per architectural register and sub-register, carrying the DWARF
//! number, storage width, and byte offset inside the kernel's `user` struct.
//! Offsets are derived from the real `libc` layout with `offset_of!` so the
//! table can never drift from the ABI the ptrace user-area requests speak.

use std::sync::OnceLock;

use memoffset::offset_of;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegisterId {
    // 64-bit general-purpose bank, plus rip/rflags/segments.
    Rax, Rdx, Rcx, Rbx, Rsi, Rdi, Rbp, Rsp,
    R8, R9, R10, R11, R12, R13, R14, R15,
    Rip, Rflags, Cs, Fs, Gs, Ss, Ds, Es, OrigRax,

    // 32-bit aliases.
    Eax, Edx, Ecx, Ebx, Esi, Edi, Ebp, Esp,
    R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,

    // 16-bit aliases.
    Ax, Dx, Cx, Bx, Si, Di, Bp, Sp,
    R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w,

    // Low-byte aliases.
    Al, Dl, Cl, Bl, Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,

    // High-byte aliases.
    Ah, Dh, Ch, Bh,

    // x87 control/status words and SSE control.
    Fcw, Fsw, Ftw, Fop, Frip, Frdp, Mxcsr, Mxcsrmask,

    // x87 stack and MMX aliases.
    St0, St1, St2, St3, St4, St5, St6, St7,
    Mm0, Mm1, Mm2, Mm3, Mm4, Mm5, Mm6, Mm7,

    // SSE vector bank.
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7,
    Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15,

    // Debug registers.
    Dr0, Dr1, Dr2, Dr3, Dr4, Dr5, Dr6, Dr7,
}

/// Which sub-bank of the user area a register lives in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterKind {
    Gpr,
    SubGpr,
    Fpr,
    Dr,
}

/// How the stored bytes are interpreted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterFormat {
    Uint,
    Double,
    LongDouble,
    Vector,
}

#[derive(Clone, Copy, Debug)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    /// DWARF register number, or -1 where DWARF defines none.
    pub dwarf_id: i32,
    /// Storage width in bytes.
    pub size: usize,
    /// Byte offset inside the kernel `user` struct.
    pub offset: usize,
    pub kind: RegisterKind,
    pub format: RegisterFormat,
}

fn gpr_offset(field: usize) -> usize {
    offset_of!(libc::user, regs) + field
}

fn fpr_offset(field: usize) -> usize {
    offset_of!(libc::user, i387) + field
}

fn dr_offset(index: usize) -> usize {
    offset_of!(libc::user, u_debugreg) + 8 * index
}

macro_rules! gpr64 {
    ($id:ident, $name:literal, $dwarf:expr, $field:ident) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: $dwarf,
            size: 8,
            offset: gpr_offset(offset_of!(libc::user_regs_struct, $field)),
            kind: RegisterKind::Gpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! sub_gpr {
    ($id:ident, $name:literal, $size:expr, $field:ident) => {
        sub_gpr!($id, $name, $size, $field, 0)
    };
    ($id:ident, $name:literal, $size:expr, $field:ident, $byte:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: -1,
            size: $size,
            offset: gpr_offset(offset_of!(libc::user_regs_struct, $field)) + $byte,
            kind: RegisterKind::SubGpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! fpr {
    ($id:ident, $name:literal, $dwarf:expr, $size:expr, $field:ident) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: $dwarf,
            size: $size,
            offset: fpr_offset(offset_of!(libc::user_fpregs_struct, $field)),
            kind: RegisterKind::Fpr,
            format: RegisterFormat::Uint,
        }
    };
}

macro_rules! fp_st {
    ($id:ident, $name:literal, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: 33 + $n,
            size: 16,
            offset: fpr_offset(offset_of!(libc::user_fpregs_struct, st_space)) + 16 * $n,
            kind: RegisterKind::Fpr,
            format: RegisterFormat::LongDouble,
        }
    };
}

macro_rules! fp_mm {
    ($id:ident, $name:literal, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: 41 + $n,
            size: 8,
            offset: fpr_offset(offset_of!(libc::user_fpregs_struct, st_space)) + 16 * $n,
            kind: RegisterKind::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! fp_xmm {
    ($id:ident, $name:literal, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: 17 + $n,
            size: 16,
            offset: fpr_offset(offset_of!(libc::user_fpregs_struct, xmm_space)) + 16 * $n,
            kind: RegisterKind::Fpr,
            format: RegisterFormat::Vector,
        }
    };
}

macro_rules! dr {
    ($id:ident, $name:literal, $n:expr) => {
        RegisterInfo {
            id: RegisterId::$id,
            name: $name,
            dwarf_id: -1,
            size: 8,
            offset: dr_offset($n),
            kind: RegisterKind::Dr,
            format: RegisterFormat::Uint,
        }
    };
}

/// The full register catalog, in catalog order.
pub fn register_infos() -> &'static [RegisterInfo] {
    static INFOS: OnceLock<Vec<RegisterInfo>> = OnceLock::new();

    INFOS.get_or_init(|| {
        vec![
            gpr64!(Rax, "rax", 0, rax),
            gpr64!(Rdx, "rdx", 1, rdx),
            gpr64!(Rcx, "rcx", 2, rcx),
            gpr64!(Rbx, "rbx", 3, rbx),
            gpr64!(Rsi, "rsi", 4, rsi),
            gpr64!(Rdi, "rdi", 5, rdi),
            gpr64!(Rbp, "rbp", 6, rbp),
            gpr64!(Rsp, "rsp", 7, rsp),
            gpr64!(R8, "r8", 8, r8),
            gpr64!(R9, "r9", 9, r9),
            gpr64!(R10, "r10", 10, r10),
            gpr64!(R11, "r11", 11, r11),
            gpr64!(R12, "r12", 12, r12),
            gpr64!(R13, "r13", 13, r13),
            gpr64!(R14, "r14", 14, r14),
            gpr64!(R15, "r15", 15, r15),
            gpr64!(Rip, "rip", 16, rip),
            gpr64!(Rflags, "rflags", 49, eflags),
            gpr64!(Cs, "cs", 51, cs),
            gpr64!(Fs, "fs", 54, fs),
            gpr64!(Gs, "gs", 55, gs),
            gpr64!(Ss, "ss", 52, ss),
            gpr64!(Ds, "ds", 53, ds),
            gpr64!(Es, "es", 50, es),
            gpr64!(OrigRax, "orig_rax", -1, orig_rax),
            //
            sub_gpr!(Eax, "eax", 4, rax),
            sub_gpr!(Edx, "edx", 4, rdx),
            sub_gpr!(Ecx, "ecx", 4, rcx),
            sub_gpr!(Ebx, "ebx", 4, rbx),
            sub_gpr!(Esi, "esi", 4, rsi),
            sub_gpr!(Edi, "edi", 4, rdi),
            sub_gpr!(Ebp, "ebp", 4, rbp),
            sub_gpr!(Esp, "esp", 4, rsp),
            sub_gpr!(R8d, "r8d", 4, r8),
            sub_gpr!(R9d, "r9d", 4, r9),
            sub_gpr!(R10d, "r10d", 4, r10),
            sub_gpr!(R11d, "r11d", 4, r11),
            sub_gpr!(R12d, "r12d", 4, r12),
            sub_gpr!(R13d, "r13d", 4, r13),
            sub_gpr!(R14d, "r14d", 4, r14),
            sub_gpr!(R15d, "r15d", 4, r15),
            //
            sub_gpr!(Ax, "ax", 2, rax),
            sub_gpr!(Dx, "dx", 2, rdx),
            sub_gpr!(Cx, "cx", 2, rcx),
            sub_gpr!(Bx, "bx", 2, rbx),
            sub_gpr!(Si, "si", 2, rsi),
            sub_gpr!(Di, "di", 2, rdi),
            sub_gpr!(Bp, "bp", 2, rbp),
            sub_gpr!(Sp, "sp", 2, rsp),
            sub_gpr!(R8w, "r8w", 2, r8),
            sub_gpr!(R9w, "r9w", 2, r9),
            sub_gpr!(R10w, "r10w", 2, r10),
            sub_gpr!(R11w, "r11w", 2, r11),
            sub_gpr!(R12w, "r12w", 2, r12),
            sub_gpr!(R13w, "r13w", 2, r13),
            sub_gpr!(R14w, "r14w", 2, r14),
            sub_gpr!(R15w, "r15w", 2, r15),
            //
            sub_gpr!(Al, "al", 1, rax),
            sub_gpr!(Dl, "dl", 1, rdx),
            sub_gpr!(Cl, "cl", 1, rcx),
            sub_gpr!(Bl, "bl", 1, rbx),
            sub_gpr!(Sil, "sil", 1, rsi),
            sub_gpr!(Dil, "dil", 1, rdi),
            sub_gpr!(Bpl, "bpl", 1, rbp),
            sub_gpr!(Spl, "spl", 1, rsp),
            sub_gpr!(R8b, "r8b", 1, r8),
            sub_gpr!(R9b, "r9b", 1, r9),
            sub_gpr!(R10b, "r10b", 1, r10),
            sub_gpr!(R11b, "r11b", 1, r11),
            sub_gpr!(R12b, "r12b", 1, r12),
            sub_gpr!(R13b, "r13b", 1, r13),
            sub_gpr!(R14b, "r14b", 1, r14),
            sub_gpr!(R15b, "r15b", 1, r15),
            //
            sub_gpr!(Ah, "ah", 1, rax, 1),
            sub_gpr!(Dh, "dh", 1, rdx, 1),
            sub_gpr!(Ch, "ch", 1, rcx, 1),
            sub_gpr!(Bh, "bh", 1, rbx, 1),
            //
            fpr!(Fcw, "fcw", 65, 2, cwd),
            fpr!(Fsw, "fsw", 66, 2, swd),
            fpr!(Ftw, "ftw", -1, 2, ftw),
            fpr!(Fop, "fop", -1, 2, fop),
            fpr!(Frip, "frip", -1, 8, rip),
            fpr!(Frdp, "frdp", -1, 8, rdp),
            fpr!(Mxcsr, "mxcsr", 64, 4, mxcsr),
            fpr!(Mxcsrmask, "mxcsrmask", -1, 4, mxcr_mask),
            //
            fp_st!(St0, "st0", 0),
            fp_st!(St1, "st1", 1),
            fp_st!(St2, "st2", 2),
            fp_st!(St3, "st3", 3),
            fp_st!(St4, "st4", 4),
            fp_st!(St5, "st5", 5),
            fp_st!(St6, "st6", 6),
            fp_st!(St7, "st7", 7),
            //
            fp_mm!(Mm0, "mm0", 0),
            fp_mm!(Mm1, "mm1", 1),
            fp_mm!(Mm2, "mm2", 2),
            fp_mm!(Mm3, "mm3", 3),
            fp_mm!(Mm4, "mm4", 4),
            fp_mm!(Mm5, "mm5", 5),
            fp_mm!(Mm6, "mm6", 6),
            fp_mm!(Mm7, "mm7", 7),
            //
            fp_xmm!(Xmm0, "xmm0", 0),
            fp_xmm!(Xmm1, "xmm1", 1),
            fp_xmm!(Xmm2, "xmm2", 2),
            fp_xmm!(Xmm3, "xmm3", 3),
            fp_xmm!(Xmm4, "xmm4", 4),
            fp_xmm!(Xmm5, "xmm5", 5),
            fp_xmm!(Xmm6, "xmm6", 6),
            fp_xmm!(Xmm7, "xmm7", 7),
            fp_xmm!(Xmm8, "xmm8", 8),
            fp_xmm!(Xmm9, "xmm9", 9),
            fp_xmm!(Xmm10, "xmm10", 10),
            fp_xmm!(Xmm11, "xmm11", 11),
            fp_xmm!(Xmm12, "xmm12", 12),
            fp_xmm!(Xmm13, "xmm13", 13),
            fp_xmm!(Xmm14, "xmm14", 14),
            fp_xmm!(Xmm15, "xmm15", 15),
            //
            dr!(Dr0, "dr0", 0),
            dr!(Dr1, "dr1", 1),
            dr!(Dr2, "dr2", 2),
            dr!(Dr3, "dr3", 3),
            dr!(Dr4, "dr4", 4),
            dr!(Dr5, "dr5", 5),
            dr!(Dr6, "dr6", 6),
            dr!(Dr7, "dr7", 7),
        ]
    })
}

fn register_info_by(pred: impl Fn(&RegisterInfo) -> bool) -> Result<&'static RegisterInfo> {
    register_infos()
        .iter()
        .find(|info| pred(info))
        .ok_or_else(|| Error::usage("Can't find register info"))
}

pub fn register_info_by_id(id: RegisterId) -> Result<&'static RegisterInfo> {
    register_info_by(|info| info.id == id)
}

pub fn register_info_by_name(name: &str) -> Result<&'static RegisterInfo> {
    register_info_by(|info| info.name == name)
}

pub fn register_info_by_dwarf_id(dwarf_id: i32) -> Result<&'static RegisterInfo> {
    register_info_by(|info| info.dwarf_id == dwarf_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_complete() {
        assert_eq!(register_infos().len(), 125);
    }

    #[test]
    fn offsets_match_the_kernel_user_area() {
        // Known sys/user.h positions on x86-64.
        assert_eq!(register_info_by_name("orig_rax").unwrap().offset, 120);
        assert_eq!(register_info_by_name("rip").unwrap().offset, 128);
        assert_eq!(register_info_by_id(RegisterId::Dr0).unwrap().offset, 848);

        let rax = register_info_by_id(RegisterId::Rax).unwrap();
        let ah = register_info_by_id(RegisterId::Ah).unwrap();
        assert_eq!(ah.offset, rax.offset + 1);

        let st0 = register_info_by_id(RegisterId::St0).unwrap();
        let mm0 = register_info_by_id(RegisterId::Mm0).unwrap();
        assert_eq!(st0.offset, mm0.offset);
        assert_eq!(st0.size, 16);
        assert_eq!(mm0.size, 8);
    }

    #[test]
    fn lookups_agree() {
        let by_name = register_info_by_name("xmm3").unwrap();
        let by_dwarf = register_info_by_dwarf_id(20).unwrap();
        assert_eq!(by_name.id, RegisterId::Xmm3);
        assert_eq!(by_dwarf.id, RegisterId::Xmm3);
        assert_eq!(by_name.format, RegisterFormat::Vector);
    }

    #[test]
    fn unknown_register_is_an_error() {
        assert!(register_info_by_name("zmm0").is_err());
        assert!(register_info_by_dwarf_id(9000).is_err());
    }
}
