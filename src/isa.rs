//! Primitive instruction tables for the GR32 ISA.
//!
//! Every instruction is 4 bytes. The encoder groups mnemonics into the
//! ALU immediate format (`code_i`), the floating-point format (`code_f`)
//! and the memory/branch format (`code_m`); the tables below carry the
//! opcode or tag packed into those formats.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// 3-operand ALU (register compare family), immediate forced to zero.
    Alu3,
    /// 4-operand ALU with an 8-bit signed immediate.
    Alu4,
    /// 2-operand floating point (unary).
    Fpu2,
    /// 3-operand floating point (binary).
    Fpu3,
    /// Memory/branch format with no operands.
    Misc0,
    /// Memory/branch format with register + displacement.
    Misc2,
    /// Memory/branch format with two registers + displacement.
    Misc3,
    /// Debug primitives, encoded with the tag in the x-register field.
    Debug,
}

#[derive(Debug, Clone, Copy)]
pub struct OpDesc {
    pub mnemonic: &'static str,
    pub class: OpClass,
    pub code: u8,
}

use OpClass::*;

pub const TABLE: &[OpDesc] = &[
    OpDesc { mnemonic: "fcmplt", class: Alu3, code: 30 },
    OpDesc { mnemonic: "fcmple", class: Alu3, code: 31 },
    OpDesc { mnemonic: "add", class: Alu4, code: 0 },
    OpDesc { mnemonic: "sub", class: Alu4, code: 1 },
    OpDesc { mnemonic: "shl", class: Alu4, code: 2 },
    OpDesc { mnemonic: "shr", class: Alu4, code: 3 },
    OpDesc { mnemonic: "sar", class: Alu4, code: 4 },
    OpDesc { mnemonic: "and", class: Alu4, code: 5 },
    OpDesc { mnemonic: "or", class: Alu4, code: 6 },
    OpDesc { mnemonic: "xor", class: Alu4, code: 7 },
    OpDesc { mnemonic: "adda", class: Alu4, code: 8 },
    OpDesc { mnemonic: "cmpult", class: Alu4, code: 22 },
    OpDesc { mnemonic: "cmpule", class: Alu4, code: 23 },
    OpDesc { mnemonic: "cmpne", class: Alu4, code: 24 },
    OpDesc { mnemonic: "cmpeq", class: Alu4, code: 25 },
    OpDesc { mnemonic: "cmplt", class: Alu4, code: 26 },
    OpDesc { mnemonic: "cmple", class: Alu4, code: 27 },
    OpDesc { mnemonic: "finv", class: Fpu2, code: 4 },
    OpDesc { mnemonic: "fsqrt", class: Fpu2, code: 5 },
    OpDesc { mnemonic: "ftoi", class: Fpu2, code: 6 },
    OpDesc { mnemonic: "itof", class: Fpu2, code: 7 },
    OpDesc { mnemonic: "floor", class: Fpu2, code: 8 },
    OpDesc { mnemonic: "fadd", class: Fpu3, code: 0 },
    OpDesc { mnemonic: "fsub", class: Fpu3, code: 1 },
    OpDesc { mnemonic: "fmul", class: Fpu3, code: 2 },
    OpDesc { mnemonic: "sysenter", class: Misc0, code: 12 },
    OpDesc { mnemonic: "sysexit", class: Misc0, code: 13 },
    OpDesc { mnemonic: "ldl", class: Misc2, code: 2 },
    OpDesc { mnemonic: "jl", class: Misc2, code: 4 },
    OpDesc { mnemonic: "ldh", class: Misc3, code: 3 },
    OpDesc { mnemonic: "ld", class: Misc3, code: 6 },
    OpDesc { mnemonic: "ldb", class: Misc3, code: 7 },
    OpDesc { mnemonic: "st", class: Misc3, code: 8 },
    OpDesc { mnemonic: "stb", class: Misc3, code: 9 },
    OpDesc { mnemonic: "bne", class: Misc3, code: 14 },
    OpDesc { mnemonic: "beq", class: Misc3, code: 15 },
    OpDesc { mnemonic: "break", class: Debug, code: 1 },
    OpDesc { mnemonic: "penv", class: Debug, code: 2 },
    OpDesc { mnemonic: "ptrace", class: Debug, code: 3 },
];

pub fn lookup(mnemonic: &str) -> Option<&'static OpDesc> {
    TABLE.iter().find(|d| d.mnemonic == mnemonic)
}

/// Opcode of the register-indirect jump-and-link, encoded in `code_m`.
pub const OP_JR: u8 = 5;
/// Opcode carrying the debug primitives.
pub const OP_DEBUG: u8 = 10;
/// Opcode family tag for the floating-point format.
pub const OP_FPU: u8 = 1;

/// 2-bit sign/negate/abs modifier carried by FPU mnemonic suffixes.
pub fn sign_suffix(suffix: &str) -> Option<u8> {
    match suffix {
        "" => Some(0),
        "neg" => Some(1),
        "abs" => Some(2),
        "abs.neg" => Some(3),
        _ => None,
    }
}

/// Displacement interpretation in the `code_m` format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispMode {
    /// Unscaled half-word field, `-0x8000..=0xffff` (`ldl`, `ldh`).
    Half,
    /// Signed 16-bit byte displacement (`ldb`, `stb`).
    Byte,
    /// Word-aligned signed 18-bit displacement, stored divided by 4.
    Word,
}

pub fn disp_mode(mnemonic: &str) -> DispMode {
    match mnemonic {
        "ldl" | "ldh" => DispMode::Half,
        "ldb" | "stb" => DispMode::Byte,
        _ => DispMode::Word,
    }
}

/// 2-bit prediction field: taken for `jl`, predicted-taken branches and
/// register-indirect jumps.
pub fn predicate(mnemonic: &str) -> u8 {
    match mnemonic {
        "jl" | "bne+" | "beq+" => 3,
        _ => 0,
    }
}
