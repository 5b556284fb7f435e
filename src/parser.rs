//! Line-level parsing: mnemonic/operand split, literals, memory operands.

use crate::error::SyntaxError;
use crate::reg;

/// Parse an integer literal the way the source grammar defines it:
/// optional sign, then decimal, `0x` hex, `0b` binary, `0o` or legacy
/// leading-zero octal.
pub fn parse_int(s: &str) -> Option<i64> {
    let t = s.trim();
    let (neg, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    if t.is_empty() {
        return None;
    }
    let v = if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(h, 16).ok()?
    } else if let Some(b) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        i64::from_str_radix(b, 2).ok()?
    } else if let Some(o) = t.strip_prefix("0o").or_else(|| t.strip_prefix("0O")) {
        i64::from_str_radix(o, 8).ok()?
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8).ok()?
    } else {
        t.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}

pub fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// IEEE-754 single-precision bit pattern of a float literal.
pub fn float_to_bits(f: f64) -> Result<u32, SyntaxError> {
    let narrowed = f as f32;
    if f.is_finite() && !narrowed.is_finite() {
        return Err(SyntaxError::new("floating point value is too large"));
    }
    Ok(narrowed.to_bits())
}

/// Signed range check: `-2^(bits-1) <= v < 2^(bits-1)`.
pub fn fits_signed(v: i64, bits: u32) -> bool {
    let x = 1i64 << (bits - 1);
    -x <= v && v < x
}

/// Hex rendering that round-trips through `parse_int` for negatives.
pub fn fmt_hex(v: i64) -> String {
    if v < 0 {
        format!("-{:#x}", -(v as i128))
    } else {
        format!("{:#x}", v)
    }
}

/// Split an operand string at commas, honoring double-quoted string
/// literals (with backslash escapes) and truncating at an unquoted `#`.
pub fn split_comma(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut lit = false;
    let mut esc = false;
    for c in s.chars() {
        if esc {
            esc = false;
            cur.push(c);
            continue;
        }
        match c {
            '"' => {
                lit = !lit;
                cur.push(c);
            }
            '\\' if lit => {
                esc = true;
                cur.push(c);
            }
            ',' if !lit => {
                parts.push(std::mem::take(&mut cur));
                continue;
            }
            '#' if !lit => {
                parts.push(cur);
                return parts;
            }
            _ => cur.push(c),
        }
    }
    parts.push(cur);
    parts
}

/// Split one non-empty trimmed line into `(mnemonic, operands)`.
pub fn parse_line(line: &str) -> (String, Vec<String>) {
    let (mnemonic, rest) = match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    };
    if let Some(i) = mnemonic.find('#') {
        return (mnemonic[..i].to_string(), Vec::new());
    }
    if rest.is_empty() || rest.starts_with('#') {
        return (mnemonic.to_string(), Vec::new());
    }
    let operands = split_comma(rest)
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();
    (mnemonic.to_string(), operands)
}

/// Parse a memory operand with a literal displacement: `[reg]`,
/// `[reg+imm]`, `[reg-imm]` or `[imm]` (base `r0`). Returns `None` when the
/// operand is not of this shape (e.g. a symbolic address).
pub fn parse_memaccess(operand: &str) -> Option<(String, i64)> {
    let s = operand.trim();
    let inner = s.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return None;
    }
    let is_word = |t: &str| !t.is_empty() && t.chars().all(|c| c.is_alphanumeric() || c == '_');

    // [reg +/- imm]
    if inner.starts_with('r') {
        let base_end = inner
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(inner.len());
        let base = &inner[..base_end];
        let rest = inner[base_end..].trim_start();
        if rest.is_empty() {
            if reg::is_reg(base) {
                return Some((base.to_string(), 0));
            }
        } else if let Some(sign) = rest.strip_prefix(['+', '-']).map(|_| &rest[..1]) {
            let imm_text = rest[1..].trim();
            if reg::is_reg(base) && is_word(imm_text) {
                if let Some(imm) = parse_int(&format!("{sign}{imm_text}")) {
                    return Some((base.to_string(), imm));
                }
            }
            return None;
        }
    }

    // [imm] with optional sign
    let (sign, body) = match inner.strip_prefix(['+', '-']) {
        Some(rest) => (&inner[..1], rest),
        None => ("", inner),
    };
    if is_word(body) {
        if let Some(imm) = parse_int(&format!("{sign}{body}")) {
            return Some(("r0".to_string(), imm));
        }
    }
    None
}

pub fn is_bracketed(operand: &str) -> bool {
    operand.starts_with('[') && operand.ends_with(']')
}

/// Decode a double-quoted string literal with backslash escapes.
pub fn parse_string(operand: &str) -> Result<String, SyntaxError> {
    let s = operand.trim();
    let inner = s
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| SyntaxError::new(format!("expected string literal: {operand}")))?;
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(SyntaxError::new(format!(
                        "invalid string literal: {operand}"
                    )));
                };
                let v = u8::from_str_radix(&format!("{hi}{lo}"), 16).map_err(|_| {
                    SyntaxError::new(format!("invalid string literal: {operand}"))
                })?;
                out.push(v as char);
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => {
                return Err(SyntaxError::new(format!(
                    "invalid string literal: {operand}"
                )))
            }
        }
    }
    Ok(out)
}

/// Operand-count check shared by the expander and the encoder.
pub fn check_operands(operands: &[String], min: usize, max: usize) -> Result<(), SyntaxError> {
    let l = operands.len();
    if l < min {
        return Err(SyntaxError::new(format!(
            "expected {min} operands, but {l} given"
        )));
    }
    if l > max {
        return Err(SyntaxError::new(format!(
            "expected {max} operands, but {l} given"
        )));
    }
    Ok(())
}
