//! Final statement encoding into little-endian 4-byte words (and the raw
//! data directives). Operands here are fully resolved strings; anything
//! symbolic was substituted by the layout passes.

use crate::error::SyntaxError;
use crate::isa::{self, DispMode, OpClass};
use crate::parser::{check_operands, fits_signed, parse_int};
use crate::reg;

fn regnum(name: &str) -> Result<u8, SyntaxError> {
    reg::num(name).ok_or_else(|| SyntaxError::new(format!("expected register: {name}")))
}

fn int_literal(text: &str) -> Result<i64, SyntaxError> {
    parse_int(text).ok_or_else(|| SyntaxError::new(format!("expected integer literal: {text}")))
}

/// ALU format: opcode, three registers, signed 8-bit immediate, 5-bit tag.
fn code_i(op: u8, rx: &str, ra: &str, rb: &str, imm: &str, tag: u8) -> Result<[u8; 4], SyntaxError> {
    let x = regnum(rx)?;
    let a = regnum(ra)?;
    let b = regnum(rb)?;
    let i = int_literal(imm)?;
    if !fits_signed(i, 8) {
        return Err(SyntaxError::new(format!("immediate value too large: {imm}")));
    }
    let i = i as u8 as u32;
    Ok([
        (((i & 7) << 5) as u8) | tag,
        ((b & 7) << 5) | (((i >> 3) & 31) as u8),
        ((x & 1) << 7) | (a << 2) | (b >> 3),
        (op << 4) | (x >> 1),
    ])
}

/// Floating-point format: three registers, 2-bit sign modifier, 5-bit tag.
fn code_f(rx: &str, ra: &str, rb: &str, sign: u8, tag: u8) -> Result<[u8; 4], SyntaxError> {
    let x = regnum(rx)?;
    let a = regnum(ra)?;
    let b = regnum(rb)?;
    Ok([
        (sign << 5) | tag,
        (b & 7) << 5,
        ((x & 1) << 7) | (a << 2) | (b >> 3),
        (isa::OP_FPU << 4) | (x >> 1),
    ])
}

/// Memory/branch format: opcode, two registers, 2-bit prediction and a
/// 16-bit displacement field whose interpretation depends on the mnemonic.
fn code_m(
    op: u8,
    rx: &str,
    ra: &str,
    pred: u8,
    disp: &str,
    mode: DispMode,
) -> Result<[u8; 4], SyntaxError> {
    let x = regnum(rx)?;
    let a = regnum(ra)?;
    let Some(mut d) = parse_int(disp) else {
        return Err(SyntaxError::new(format!("expected displacement: {disp}")));
    };
    match mode {
        DispMode::Half => {
            if !(-0x8000..=0xffff).contains(&d) {
                return Err(SyntaxError::new(format!("immediate value too large: {disp}")));
            }
        }
        DispMode::Byte => {
            if !fits_signed(d, 16) {
                return Err(SyntaxError::new(format!("displacement too large: {disp}")));
            }
        }
        DispMode::Word => {
            if d & 3 != 0 {
                return Err(SyntaxError::new("displacement must be a multiple of 4"));
            }
            if !fits_signed(d, 18) {
                return Err(SyntaxError::new(format!("displacement too large: {disp}")));
            }
            d >>= 2;
        }
    }
    Ok([
        (d & 255) as u8,
        ((d >> 8) & 255) as u8,
        ((x & 1) << 7) | (a << 2) | pred,
        (op << 4) | (x >> 1),
    ])
}

fn dot_int(operand: &str) -> Result<[u8; 4], SyntaxError> {
    let imm = int_literal(operand)?;
    if !(-0x8000_0000..=0xffff_ffff).contains(&imm) {
        return Err(SyntaxError::new(format!(
            "immediate value too large: {operand}"
        )));
    }
    Ok((imm as u32).to_le_bytes())
}

fn dot_byte(operand: &str) -> Result<u8, SyntaxError> {
    let imm = int_literal(operand)?;
    if !(-128..=255).contains(&imm) {
        return Err(SyntaxError::new(format!(
            "immediate value too large: {operand}"
        )));
    }
    Ok(imm as u8)
}

fn dot_short(operand: &str) -> Result<[u8; 2], SyntaxError> {
    let imm = int_literal(operand)?;
    if !(-0x8000..=0xffff).contains(&imm) {
        return Err(SyntaxError::new(format!(
            "immediate value too large: {operand}"
        )));
    }
    Ok((imm as u16).to_le_bytes())
}

fn dot_space(operands: &[String]) -> Result<Vec<u8>, SyntaxError> {
    check_operands(operands, 2, 2)?;
    let fill = int_literal(&operands[1])?;
    if !(-128..=255).contains(&fill) {
        return Err(SyntaxError::new(format!(
            "immediate value too large: {}",
            operands[1]
        )));
    }
    let size = int_literal(&operands[0])?;
    Ok(vec![fill as u8; size.max(0) as usize])
}

/// Encode one resolved statement. Instructions yield exactly 4 bytes;
/// data directives yield their natural size.
pub fn encode_stmt(mnemonic: &str, operands: &[String]) -> Result<Vec<u8>, SyntaxError> {
    if let Some(desc) = isa::lookup(mnemonic) {
        match desc.class {
            OpClass::Alu3 => {
                check_operands(operands, 3, 3)?;
                return Ok(code_i(0, &operands[0], &operands[1], &operands[2], "0", desc.code)?
                    .to_vec());
            }
            OpClass::Alu4 => {
                check_operands(operands, 4, 4)?;
                return Ok(code_i(
                    0,
                    &operands[0],
                    &operands[1],
                    &operands[2],
                    &operands[3],
                    desc.code,
                )?
                .to_vec());
            }
            _ => {}
        }
    }
    let (fpu_base, fpu_suffix) = match mnemonic.split_once('.') {
        Some((base, suffix)) => (base, suffix),
        None => (mnemonic, ""),
    };
    if let Some(desc) = isa::lookup(fpu_base) {
        if let Some(sign) = isa::sign_suffix(fpu_suffix) {
            match desc.class {
                OpClass::Fpu2 => {
                    check_operands(operands, 2, 2)?;
                    return Ok(code_f(&operands[0], &operands[1], "r0", sign, desc.code)?.to_vec());
                }
                OpClass::Fpu3 => {
                    check_operands(operands, 3, 3)?;
                    return Ok(
                        code_f(&operands[0], &operands[1], &operands[2], sign, desc.code)?.to_vec(),
                    );
                }
                _ => {}
            }
        }
    }
    let pred = isa::predicate(mnemonic);
    let mode = isa::disp_mode(mnemonic);
    let base = match mnemonic {
        "bne-" | "bne+" => "bne",
        "beq-" | "beq+" => "beq",
        other => other,
    };
    if let Some(desc) = isa::lookup(base) {
        match desc.class {
            OpClass::Misc0 => {
                check_operands(operands, 0, 0)?;
                return Ok(code_m(desc.code, "r0", "r0", pred, "0", mode)?.to_vec());
            }
            OpClass::Misc2 => {
                check_operands(operands, 2, 2)?;
                return Ok(code_m(desc.code, &operands[0], "r0", pred, &operands[1], mode)?
                    .to_vec());
            }
            OpClass::Misc3 => {
                check_operands(operands, 3, 3)?;
                return Ok(code_m(
                    desc.code,
                    &operands[0],
                    &operands[1],
                    pred,
                    &operands[2],
                    mode,
                )?
                .to_vec());
            }
            OpClass::Debug => {
                check_operands(operands, 1, 1)?;
                let tag = format!("r{}", desc.code);
                return Ok(
                    code_m(isa::OP_DEBUG, &tag, "r0", 0, &operands[0], DispMode::Half)?.to_vec(),
                );
            }
            _ => {}
        }
    }
    match base {
        "jr" => {
            check_operands(operands, 2, 2)?;
            Ok(code_m(isa::OP_JR, &operands[0], &operands[1], 3, "0", DispMode::Half)?.to_vec())
        }
        ".int" => {
            let mut out = Vec::with_capacity(4 * operands.len());
            for op in operands {
                out.extend_from_slice(&dot_int(op)?);
            }
            Ok(out)
        }
        ".byte" => operands.iter().map(|op| dot_byte(op)).collect(),
        ".short" => {
            let mut out = Vec::with_capacity(2 * operands.len());
            for op in operands {
                out.extend_from_slice(&dot_short(op)?);
            }
            Ok(out)
        }
        ".space" => dot_space(operands),
        _ => Err(SyntaxError::new(format!("unknown mnemonic '{mnemonic}'"))),
    }
}
