//! Instruction records flowing between expansion, relaxation and encoding.

use crate::error::Loc;

/// Variable-length pseudo-op class whose final size depends on a resolved
/// address. Starts wide (two instructions) and may be narrowed by the
/// relaxation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendKind {
    /// Literal/symbolic load into a register; narrows once the value fits
    /// a signed 16-bit half-word.
    Mov,
    /// Word load at a symbolic address; narrows at signed 18 bits.
    Ld,
    /// Byte load at a symbolic address; narrows at signed 16 bits.
    Ldb,
    /// Word store at a symbolic address; narrows at signed 18 bits.
    St,
    /// Byte store at a symbolic address; narrows at signed 16 bits.
    Stb,
}

impl PendKind {
    /// Field width of the single-instruction form.
    pub fn narrow_bits(self) -> u32 {
        match self {
            PendKind::Mov | PendKind::Ldb | PendKind::Stb => 16,
            PendKind::Ld | PendKind::St => 18,
        }
    }

    /// Primitive mnemonic of the memory-access kinds.
    pub fn base_mnemonic(self) -> &'static str {
        match self {
            PendKind::Mov => "ldl",
            PendKind::Ld => "ld",
            PendKind::Ldb => "ldb",
            PendKind::St => "st",
            PendKind::Stb => "stb",
        }
    }
}

/// Call-to-label encodings, largest to smallest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallForm {
    /// 32-bit absolute target materialized in two halves, indirect jump.
    Full,
    /// Absolute target known to fit signed 16 bits, single load.
    Near,
    /// Relative jump-and-link with an 18-bit word-scaled displacement.
    Rel,
}

impl CallForm {
    pub fn size(self) -> i64 {
        match self {
            CallForm::Full => 32,
            CallForm::Near => 28,
            CallForm::Rel => 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `name:` declaration.
    Label(String),
    /// Directive or primitive instruction, dispatched by mnemonic.
    Stmt {
        mnemonic: String,
        operands: Vec<String>,
    },
    /// Relaxable two-instruction form. Only the relaxation engine flips
    /// `narrow`; operands are never rewritten.
    Pending {
        kind: PendKind,
        narrow: bool,
        operands: Vec<String>,
    },
    /// Relaxable call to a label.
    Call { form: CallForm, target: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub payload: Payload,
    pub loc: Loc,
}

impl Item {
    pub fn new(payload: Payload, loc: Loc) -> Self {
        Self { payload, loc }
    }

    /// Operand strings, for the scratch-register diagnostic scan.
    pub fn operands(&self) -> &[String] {
        match &self.payload {
            Payload::Label(_) => &[],
            Payload::Stmt { operands, .. } | Payload::Pending { operands, .. } => operands,
            Payload::Call { target, .. } => std::slice::from_ref(target),
        }
    }
}

pub fn stmt(mnemonic: &str, operands: &[&str]) -> Payload {
    Payload::Stmt {
        mnemonic: mnemonic.to_string(),
        operands: operands.iter().map(|s| s.to_string()).collect(),
    }
}
