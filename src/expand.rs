//! Macro expansion: rewrites each source line into primitive instructions,
//! deferring anything that needs a resolved address to the relaxation
//! engine. Expansion never fails on an undefined label; it fails only for
//! syntax errors, wrong operand counts and statically invalid operands.

use crate::error::SyntaxError;
use crate::item::{stmt, CallForm, Payload, PendKind};
use crate::parser::{
    check_operands, float_to_bits, fmt_hex, fits_signed, is_bracketed, parse_float, parse_int,
    parse_line, parse_memaccess, parse_string,
};
use crate::reg::{self, LINK, SCRATCH};

const ALU: &[&str] = &[
    "add", "sub", "shl", "shr", "sar", "and", "or", "xor", "adda", "cmpne", "cmpeq", "cmplt",
    "cmple", "cmpult", "cmpule",
];

/// Expand one trimmed, non-empty source line.
pub fn expand_line(line: &str) -> Result<Vec<Payload>, SyntaxError> {
    let (mnemonic, operands) = parse_line(line);
    if mnemonic.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(name) = mnemonic.strip_suffix(':') {
        if !operands.is_empty() {
            return Err(SyntaxError::new(
                "label declaration must be followed by new line",
            ));
        }
        return Ok(vec![Payload::Label(name.to_string())]);
    }
    expand(&mnemonic, &operands)
}

fn expand(mnemonic: &str, ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    match mnemonic {
        "nop" => {
            check_operands(ops, 0, 0)?;
            return Ok(vec![stmt("add", &["r0", "r0", "r0", "0"])]);
        }
        "mov" => return expand_mov(ops),
        "movb" => return expand_movb(ops),
        "neg" => {
            check_operands(ops, 2, 2)?;
            return Ok(vec![stmt("sub", &[&ops[0], "r0", &ops[1], "0"])]);
        }
        "not" => {
            check_operands(ops, 2, 2)?;
            return Ok(vec![stmt("xor", &[&ops[0], &ops[1], "r0", "-1"])]);
        }
        "sextb" => return expand_ext(ops, "sar", 24),
        "sextw" => return expand_ext(ops, "sar", 16),
        "zextb" => return expand_ext(ops, "shr", 24),
        "zextw" => {
            check_operands(ops, 2, 2)?;
            return Ok(vec![stmt("ldh", &[&ops[0], &ops[1], "0"])]);
        }
        "fcmpgt" => {
            check_operands(ops, 3, 3)?;
            return Ok(vec![stmt("fcmplt", &[&ops[0], &ops[2], &ops[1]])]);
        }
        "fcmpge" => {
            check_operands(ops, 3, 3)?;
            return Ok(vec![stmt("fcmple", &[&ops[0], &ops[2], &ops[1]])]);
        }
        "read" => return expand_read(ops),
        "write" => return expand_write(ops),
        "jr" => {
            check_operands(ops, 1, 2)?;
            if ops.len() == 1 {
                return Ok(vec![stmt("jr", &[SCRATCH, &ops[0]])]);
            }
            return Ok(vec![stmt("jr", &[&ops[0], &ops[1]])]);
        }
        "br" => {
            check_operands(ops, 1, 1)?;
            return Ok(vec![stmt("jl", &[SCRATCH, &ops[0]])]);
        }
        "push" => return expand_push(ops),
        "pop" => {
            check_operands(ops, 1, 1)?;
            return Ok(vec![
                stmt("ld", &[&ops[0], "rsp", "0"]),
                stmt("add", &["rsp", "rsp", "r0", "4"]),
            ]);
        }
        "call" => return expand_call(ops),
        "ret" => {
            check_operands(ops, 0, 0)?;
            return Ok(vec![stmt("jr", &[SCRATCH, LINK])]);
        }
        "enter" => return expand_enter(ops),
        "leave" => {
            check_operands(ops, 0, 0)?;
            return Ok(vec![stmt("ld", &[LINK, "rsp", "0"])]);
        }
        "halt" => {
            check_operands(ops, 0, 0)?;
            return Ok(vec![stmt("beq+", &["r31", "r31", "-4"])]);
        }
        ".float" => return expand_dot_float(ops),
        ".space" => {
            check_operands(ops, 1, 2)?;
            if ops.len() == 1 {
                return Ok(vec![stmt(".space", &[&ops[0], "0"])]);
            }
            return Ok(vec![stmt(".space", &[&ops[0], &ops[1]])]);
        }
        ".string" => return expand_dot_string(ops),
        _ => {}
    }
    if ALU.contains(&mnemonic) {
        return expand_alu(mnemonic, ops);
    }
    if matches!(mnemonic, "cmpgt" | "cmpge" | "cmpugt" | "cmpuge") {
        return expand_cmpgt(mnemonic, ops);
    }
    if let Some((base, pred)) = split_predicate(mnemonic) {
        match base {
            "bz" => {
                check_operands(ops, 2, 2)?;
                return Ok(vec![stmt(&format!("beq{pred}"), &[&ops[0], "r0", &ops[1]])]);
            }
            "bnz" => {
                check_operands(ops, 2, 2)?;
                return Ok(vec![stmt(&format!("bne{pred}"), &[&ops[0], "r0", &ops[1]])]);
            }
            "bne" | "beq" => return expand_branch(base, ops, pred),
            "blt" | "ble" | "bgt" | "bge" => return expand_cmp_branch(base, ops, pred),
            "bflt" | "bfle" | "bfgt" | "bfge" => return expand_fcmp_branch(base, ops, pred),
            _ => {}
        }
    }
    Ok(vec![Payload::Stmt {
        mnemonic: mnemonic.to_string(),
        operands: ops.to_vec(),
    }])
}

/// Strip an optional `+`/`-` prediction suffix from a branch mnemonic.
fn split_predicate(mnemonic: &str) -> Option<(&str, &str)> {
    let (base, pred) = if let Some(b) = mnemonic.strip_suffix('+') {
        (b, "+")
    } else if let Some(b) = mnemonic.strip_suffix('-') {
        (b, "-")
    } else {
        (mnemonic, "")
    };
    if base.is_empty() || !base.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((base, pred))
}

/// Load a 32-bit literal: one half-word load when it fits, a low/high pair
/// otherwise.
fn mov_imm(dest: &str, imm: i64) -> Result<Vec<Payload>, SyntaxError> {
    if fits_signed(imm, 16) {
        return Ok(vec![stmt("ldl", &[dest, &imm.to_string()])]);
    }
    if !(-0x8000_0000..=0xffff_ffff).contains(&imm) {
        return Err(SyntaxError::new(format!(
            "immediate value too large: {}",
            fmt_hex(imm)
        )));
    }
    if imm & 0xffff == 0 {
        return Ok(vec![stmt(
            "ldh",
            &[dest, "r0", &fmt_hex((imm >> 16) & 0xffff)],
        )]);
    }
    Ok(vec![
        stmt("ldl", &[dest, &fmt_hex(imm & 0xffff)]),
        stmt("ldh", &[dest, dest, &fmt_hex((imm >> 16) & 0xffff)]),
    ])
}

fn inner_expr(operand: &str) -> String {
    operand[1..operand.len() - 1].trim().to_string()
}

fn expand_mov(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 2, 2)?;
    if reg::is_reg(&ops[0]) && reg::is_reg(&ops[1]) {
        return Ok(vec![stmt("add", &[&ops[0], &ops[1], "r0", "0"])]);
    }
    if is_bracketed(&ops[1]) {
        let Some((base, disp)) = parse_memaccess(&ops[1]) else {
            return Ok(vec![Payload::Pending {
                kind: PendKind::Ld,
                narrow: false,
                operands: vec![ops[0].clone(), inner_expr(&ops[1])],
            }]);
        };
        if fits_signed(disp, 18) {
            return Ok(vec![stmt("ld", &[&ops[0], &base, &disp.to_string()])]);
        }
        let mut out = vec![stmt("ldh", &[SCRATCH, "r0", &fmt_hex((disp >> 16) & 0xffff)])];
        if base != "r0" {
            out.push(stmt("add", &[SCRATCH, &base, SCRATCH, "0"]));
        }
        out.push(stmt("ld", &[&ops[0], SCRATCH, &fmt_hex(disp & 0xffff)]));
        return Ok(out);
    }
    if is_bracketed(&ops[0]) {
        let Some((base, disp)) = parse_memaccess(&ops[0]) else {
            return Ok(vec![Payload::Pending {
                kind: PendKind::St,
                narrow: false,
                operands: vec![ops[1].clone(), inner_expr(&ops[0])],
            }]);
        };
        if fits_signed(disp, 18) {
            let (src, mut out) = if reg::is_reg(&ops[1]) {
                (ops[1].clone(), Vec::new())
            } else {
                (
                    SCRATCH.to_string(),
                    expand_mov(&[SCRATCH.to_string(), ops[1].clone()])?,
                )
            };
            out.push(stmt("st", &[&src, &base, &disp.to_string()]));
            return Ok(out);
        }
        let mut out = vec![stmt("ldh", &[SCRATCH, "r0", &fmt_hex((disp >> 16) & 0xffff)])];
        if base != "r0" {
            out.push(stmt("add", &[SCRATCH, &base, SCRATCH, "0"]));
        }
        out.push(stmt("st", &[&ops[1], SCRATCH, &fmt_hex(disp & 0xffff)]));
        return Ok(out);
    }
    if let Some(imm) = parse_int(&ops[1]) {
        return mov_imm(&ops[0], imm);
    }
    if let Some(f) = parse_float(&ops[1]) {
        return mov_imm(&ops[0], float_to_bits(f)? as i64);
    }
    if reg::is_reg(&ops[0]) {
        return Ok(vec![Payload::Pending {
            kind: PendKind::Mov,
            narrow: false,
            operands: vec![ops[0].clone(), ops[1].clone()],
        }]);
    }
    Err(SyntaxError::new("invalid syntax"))
}

// Byte accesses carry a signed 16-bit field, so the wide form rounds the
// high half with +0x8000 and uses a signed residual.
fn byte_halves(disp: i64) -> (String, String) {
    let hi = ((disp + 0x8000) >> 16) & 0xffff;
    let lo = ((disp + 0x8000) & 0xffff) - 0x8000;
    (fmt_hex(hi), fmt_hex(lo))
}

fn expand_movb(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 2, 2)?;
    if is_bracketed(&ops[1]) {
        let Some((base, disp)) = parse_memaccess(&ops[1]) else {
            return Ok(vec![Payload::Pending {
                kind: PendKind::Ldb,
                narrow: false,
                operands: vec![ops[0].clone(), inner_expr(&ops[1])],
            }]);
        };
        if fits_signed(disp, 16) {
            return Ok(vec![stmt("ldb", &[&ops[0], &base, &disp.to_string()])]);
        }
        let (hi, lo) = byte_halves(disp);
        let mut out = vec![stmt("ldh", &[SCRATCH, "r0", &hi])];
        if base != "r0" {
            out.push(stmt("add", &[SCRATCH, &base, SCRATCH, "0"]));
        }
        out.push(stmt("ldb", &[&ops[0], SCRATCH, &lo]));
        return Ok(out);
    }
    if is_bracketed(&ops[0]) {
        let Some((base, disp)) = parse_memaccess(&ops[0]) else {
            return Ok(vec![Payload::Pending {
                kind: PendKind::Stb,
                narrow: false,
                operands: vec![ops[1].clone(), inner_expr(&ops[0])],
            }]);
        };
        if fits_signed(disp, 16) {
            let (src, mut out) = if reg::is_reg(&ops[1]) {
                (ops[1].clone(), Vec::new())
            } else {
                (
                    SCRATCH.to_string(),
                    expand_mov(&[SCRATCH.to_string(), ops[1].clone()])?,
                )
            };
            out.push(stmt("stb", &[&src, &base, &disp.to_string()]));
            return Ok(out);
        }
        let (hi, lo) = byte_halves(disp);
        let mut out = vec![stmt("ldh", &[SCRATCH, "r0", &hi])];
        if base != "r0" {
            out.push(stmt("add", &[SCRATCH, &base, SCRATCH, "0"]));
        }
        out.push(stmt("stb", &[&ops[1], SCRATCH, &lo]));
        return Ok(out);
    }
    Err(SyntaxError::new(
        "movb only supports move between register and memory",
    ))
}

fn expand_ext(ops: &[String], shift_back: &str, count: u32) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 2, 2)?;
    let n = count.to_string();
    Ok(vec![
        stmt("shl", &[SCRATCH, &ops[1], "r0", &n]),
        stmt(shift_back, &[&ops[0], SCRATCH, "r0", &n]),
    ])
}

fn expand_alu(op: &str, ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 3, 4)?;
    if ops.len() == 4 {
        return Ok(vec![Payload::Stmt {
            mnemonic: op.to_string(),
            operands: ops.to_vec(),
        }]);
    }
    if reg::is_reg(&ops[2]) {
        return Ok(vec![stmt(op, &[&ops[0], &ops[1], &ops[2], "0"])]);
    }
    if let Some(imm) = parse_int(&ops[2]) {
        if fits_signed(imm, 8) {
            return Ok(vec![stmt(op, &[&ops[0], &ops[1], "r0", &ops[2]])]);
        }
        let mut out = mov_imm(SCRATCH, imm)?;
        out.push(stmt(op, &[&ops[0], &ops[1], SCRATCH, "0"]));
        return Ok(out);
    }
    Err(SyntaxError::new(format!(
        "expected register or immediate value: {}",
        ops[2]
    )))
}

// cmpgt/cmpge and the unsigned variants become the complementary
// cmplt/cmple with the compared operands swapped.
fn expand_cmpgt(mnemonic: &str, ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 3, 3)?;
    let m = mnemonic.replace('g', "l");
    if reg::is_reg(&ops[2]) {
        return Ok(vec![stmt(&m, &[&ops[0], &ops[2], &ops[1], "0"])]);
    }
    if let Some(imm) = parse_int(&ops[2]) {
        let mut out = mov_imm(SCRATCH, imm)?;
        out.push(stmt(&m, &[&ops[0], SCRATCH, &ops[1], "0"]));
        return Ok(out);
    }
    Err(SyntaxError::new(format!(
        "expected register or immediate value: {}",
        ops[2]
    )))
}

// Poll the serial status word until a byte arrives.
fn expand_read(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 1, 1)?;
    Ok(vec![
        stmt("ldh", &[SCRATCH, "r0", "0x8000"]),
        stmt("ld", &[&ops[0], SCRATCH, "0x1000"]),
        stmt("cmplt", &[SCRATCH, &ops[0], "r0", "0"]),
        stmt("bne", &[SCRATCH, "r0", "-16"]),
    ])
}

fn expand_write(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 1, 2)?;
    if ops.len() == 1 {
        return Ok(vec![
            stmt("ldh", &[SCRATCH, "r0", "0x8000"]),
            stmt("ld", &[SCRATCH, SCRATCH, "0x1004"]),
            stmt("beq", &[SCRATCH, "r0", "-12"]),
            stmt("ldh", &[SCRATCH, "r0", "0x8000"]),
            stmt("st", &[&ops[0], SCRATCH, "0x1000"]),
        ]);
    }
    let s = parse_string(&ops[1])?;
    let mut out = vec![stmt("ldh", &[SCRATCH, "r0", "0x8000"])];
    for c in s.chars() {
        out.extend(mov_imm(&ops[0], c as i64)?);
        out.push(stmt("st", &[&ops[0], SCRATCH, "0x1000"]));
    }
    Ok(out)
}

fn expand_branch(op: &str, ops: &[String], pred: &str) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 3, 3)?;
    let mnemonic = format!("{op}{pred}");
    if let Some(imm) = parse_int(&ops[1]) {
        let mut out = mov_imm(SCRATCH, imm)?;
        out.push(stmt(&mnemonic, &[&ops[0], SCRATCH, &ops[2]]));
        return Ok(out);
    }
    Ok(vec![Payload::Stmt {
        mnemonic,
        operands: ops.to_vec(),
    }])
}

// Ordered branches have no primitive; compare into the scratch register
// and branch on the flag.
fn expand_cmp_branch(op: &str, ops: &[String], pred: &str) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 3, 3)?;
    let (b, c) = match op {
        "bgt" => ("beq", "cmple".to_string()),
        "bge" => ("beq", "cmplt".to_string()),
        _ => ("bne", format!("cmp{}", &op[1..])),
    };
    let mut out = expand_alu(&c, &[SCRATCH.to_string(), ops[0].clone(), ops[1].clone()])?;
    out.push(stmt(&format!("{b}{pred}"), &[SCRATCH, "r0", &ops[2]]));
    Ok(out)
}

fn expand_fcmp_branch(op: &str, ops: &[String], pred: &str) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 3, 3)?;
    let (b, c) = match op {
        "bfgt" => ("beq", "fcmple".to_string()),
        "bfge" => ("beq", "fcmplt".to_string()),
        _ => ("bne", format!("fcmp{}", &op[2..])),
    };
    Ok(vec![
        stmt(&c, &[SCRATCH, &ops[0], &ops[1]]),
        stmt(&format!("{b}{pred}"), &[SCRATCH, "r0", &ops[2]]),
    ])
}

fn expand_push(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 1, 1)?;
    let pre = stmt("sub", &["rsp", "rsp", "r0", "4"]);
    if let Some(imm) = parse_int(&ops[0]) {
        let mut out = mov_imm(SCRATCH, imm)?;
        out.push(pre);
        out.push(stmt("st", &[SCRATCH, "rsp", "0"]));
        return Ok(out);
    }
    Ok(vec![pre, stmt("st", &[&ops[0], "rsp", "0"])])
}

fn expand_call(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 1, 1)?;
    if reg::is_reg(&ops[0]) {
        return Ok(vec![
            stmt("st", &["rbp", "rsp", "-4"]),
            stmt("sub", &["rsp", "rsp", "r0", "4"]),
            stmt("add", &["rbp", "rsp", "r0", "0"]),
            stmt("jr", &[LINK, &ops[0]]),
            stmt("add", &["rsp", "rbp", "r0", "4"]),
            stmt("ld", &["rbp", "rsp", "-4"]),
        ]);
    }
    Ok(vec![Payload::Call {
        form: CallForm::Full,
        target: ops[0].clone(),
    }])
}

fn expand_enter(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 0, 1)?;
    let text = ops.first().map(String::as_str).unwrap_or("0");
    let Some(imm) = parse_int(text) else {
        return Err(SyntaxError::new(format!("expected integer literal: {text}")));
    };
    if imm & 3 != 0 {
        return Err(SyntaxError::new("immediate value must be a multiple of 4"));
    }
    let mut out = expand_alu(
        "sub",
        &["rsp".to_string(), "rsp".to_string(), (imm + 4).to_string()],
    )?;
    out.push(stmt("st", &[LINK, "rsp", "0"]));
    Ok(out)
}

fn expand_dot_float(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    let mut ints = Vec::new();
    for op in ops {
        let Some(f) = parse_float(op) else {
            return Err(SyntaxError::new(format!(
                "expected floating point literal: {op}"
            )));
        };
        ints.push(fmt_hex(float_to_bits(f)? as i64));
    }
    Ok(vec![Payload::Stmt {
        mnemonic: ".int".to_string(),
        operands: ints,
    }])
}

fn expand_dot_string(ops: &[String]) -> Result<Vec<Payload>, SyntaxError> {
    check_operands(ops, 1, 1)?;
    let s = parse_string(&ops[0])?;
    let mut bytes: Vec<String> = s.chars().map(|c| (c as u32).to_string()).collect();
    bytes.push("0".to_string());
    Ok(vec![Payload::Stmt {
        mnemonic: ".byte".to_string(),
        operands: bytes,
    }])
}
