//! Register name table: `r0`..`r31` plus the conventional aliases.
//!
//! `r28` holds the return address around calls and `r29` is the scratch
//! register that macro expansion is free to clobber.

/// Scratch register clobbered by expanded pseudo-instructions.
pub const SCRATCH: &str = "r29";
/// Link register written by `jl`/`jr` and the call idiom.
pub const LINK: &str = "r28";

const ALIASES: &[(&str, u8)] = &[("rsp", 30), ("rbp", 31), ("rk0", 26), ("rk1", 27)];

/// Resolve a register name to its number. Only the canonical spellings are
/// accepted (`r07` is not a register).
pub fn num(name: &str) -> Option<u8> {
    if let Some(&(_, n)) = ALIASES.iter().find(|(a, _)| *a == name) {
        return Some(n);
    }
    let digits = name.strip_prefix('r')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    let n: u8 = digits.parse().ok()?;
    (n <= 31).then_some(n)
}

pub fn is_reg(name: &str) -> bool {
    num(name).is_some()
}
