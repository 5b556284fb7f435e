use pretty_assertions::assert_eq;

use gr32_asm::expand::expand_line;
use gr32_asm::item::{stmt, CallForm, Payload, PendKind};

fn expand(line: &str) -> Vec<Payload> {
    expand_line(line).unwrap()
}

fn expand_err(line: &str) -> String {
    expand_line(line).unwrap_err().0
}

#[test]
fn nop_is_add_zero() {
    assert_eq!(expand("nop"), vec![stmt("add", &["r0", "r0", "r0", "0"])]);
}

#[test]
fn mov_between_registers() {
    assert_eq!(
        expand("mov r3, rsp"),
        vec![stmt("add", &["r3", "rsp", "r0", "0"])]
    );
}

#[test]
fn mov_small_immediate_is_one_load() {
    assert_eq!(expand("mov r1, 42"), vec![stmt("ldl", &["r1", "42"])]);
    assert_eq!(expand("mov r1, -0x8000"), vec![stmt("ldl", &["r1", "-32768"])]);
}

#[test]
fn mov_wide_immediate_is_two_loads() {
    assert_eq!(
        expand("mov r1, 0x12345678"),
        vec![
            stmt("ldl", &["r1", "0x5678"]),
            stmt("ldh", &["r1", "r1", "0x1234"]),
        ]
    );
    // A zero low half needs only the high load.
    assert_eq!(
        expand("mov r1, 0x10000"),
        vec![stmt("ldh", &["r1", "r0", "0x1"])]
    );
}

#[test]
fn mov_float_uses_bit_pattern() {
    // 1.0f32 == 0x3f800000
    assert_eq!(
        expand("mov r1, 1.0"),
        vec![stmt("ldh", &["r1", "r0", "0x3f80"])]
    );
}

#[test]
fn mov_memory_with_literal_displacement() {
    assert_eq!(
        expand("mov r1, [rsp + 8]"),
        vec![stmt("ld", &["r1", "rsp", "8"])]
    );
    assert_eq!(
        expand("mov [rsp - 4], r2"),
        vec![stmt("st", &["r2", "rsp", "-4"])]
    );
}

#[test]
fn mov_store_materializes_immediate_source() {
    assert_eq!(
        expand("mov [rsp], 7"),
        vec![stmt("ldl", &["r29", "7"]), stmt("st", &["r29", "rsp", "0"])]
    );
}

#[test]
fn mov_symbolic_address_stays_pending() {
    assert_eq!(
        expand("mov r1, [buf + 4]"),
        vec![Payload::Pending {
            kind: PendKind::Ld,
            narrow: false,
            operands: vec!["r1".into(), "buf + 4".into()],
        }]
    );
    assert_eq!(
        expand("mov r1, buf"),
        vec![Payload::Pending {
            kind: PendKind::Mov,
            narrow: false,
            operands: vec!["r1".into(), "buf".into()],
        }]
    );
    assert_eq!(
        expand("movb [buf], r1"),
        vec![Payload::Pending {
            kind: PendKind::Stb,
            narrow: false,
            operands: vec!["r1".into(), "buf".into()],
        }]
    );
}

#[test]
fn movb_requires_memory_operand() {
    assert_eq!(
        expand_err("movb r1, r2"),
        "movb only supports move between register and memory"
    );
}

#[test]
fn alu_immediate_forms() {
    assert_eq!(
        expand("add r1, r2, r3"),
        vec![stmt("add", &["r1", "r2", "r3", "0"])]
    );
    assert_eq!(
        expand("add r1, r2, 5"),
        vec![stmt("add", &["r1", "r2", "r0", "5"])]
    );
    // Out of the signed 8-bit range, through the scratch register.
    assert_eq!(
        expand("add r1, r2, 1000"),
        vec![
            stmt("ldl", &["r29", "1000"]),
            stmt("add", &["r1", "r2", "r29", "0"]),
        ]
    );
    assert_eq!(
        expand_err("sub r1, r2, foo"),
        "expected register or immediate value: foo"
    );
}

#[test]
fn greater_compares_swap_operands() {
    assert_eq!(
        expand("cmpgt r1, r2, r3"),
        vec![stmt("cmplt", &["r1", "r3", "r2", "0"])]
    );
    assert_eq!(
        expand("cmpuge r1, r2, 9"),
        vec![
            stmt("ldl", &["r29", "9"]),
            stmt("cmpule", &["r1", "r29", "r2", "0"]),
        ]
    );
    assert_eq!(
        expand("fcmpgt r1, r2, r3"),
        vec![stmt("fcmplt", &["r1", "r3", "r2"])]
    );
}

#[test]
fn ordered_branches_compare_then_branch() {
    assert_eq!(
        expand("bgt r1, r2, loop"),
        vec![
            stmt("cmple", &["r29", "r1", "r2", "0"]),
            stmt("beq", &["r29", "r0", "loop"]),
        ]
    );
    assert_eq!(
        expand("blt+ r1, r2, loop"),
        vec![
            stmt("cmplt", &["r29", "r1", "r2", "0"]),
            stmt("beq+", &["r29", "r0", "loop"]),
        ]
    );
    assert_eq!(
        expand("bz r4, done"),
        vec![stmt("beq", &["r4", "r0", "done"])]
    );
    assert_eq!(
        expand("bne r1, 3, loop"),
        vec![
            stmt("ldl", &["r29", "3"]),
            stmt("bne", &["r1", "r29", "loop"]),
        ]
    );
    assert_eq!(
        expand("bflt r1, r2, out"),
        vec![
            stmt("fcmplt", &["r29", "r1", "r2"]),
            stmt("bne", &["r29", "r0", "out"]),
        ]
    );
}

#[test]
fn stack_and_call_idioms() {
    assert_eq!(
        expand("push r5"),
        vec![
            stmt("sub", &["rsp", "rsp", "r0", "4"]),
            stmt("st", &["r5", "rsp", "0"]),
        ]
    );
    assert_eq!(
        expand("pop r5"),
        vec![
            stmt("ld", &["r5", "rsp", "0"]),
            stmt("add", &["rsp", "rsp", "r0", "4"]),
        ]
    );
    assert_eq!(
        expand("call f"),
        vec![Payload::Call {
            form: CallForm::Full,
            target: "f".into(),
        }]
    );
    assert_eq!(
        expand("call r4"),
        vec![
            stmt("st", &["rbp", "rsp", "-4"]),
            stmt("sub", &["rsp", "rsp", "r0", "4"]),
            stmt("add", &["rbp", "rsp", "r0", "0"]),
            stmt("jr", &["r28", "r4"]),
            stmt("add", &["rsp", "rbp", "r0", "4"]),
            stmt("ld", &["rbp", "rsp", "-4"]),
        ]
    );
    assert_eq!(expand("ret"), vec![stmt("jr", &["r29", "r28"])]);
    assert_eq!(
        expand("enter 8"),
        vec![
            stmt("sub", &["rsp", "rsp", "r0", "12"]),
            stmt("st", &["r28", "rsp", "0"]),
        ]
    );
    assert_eq!(expand("leave"), vec![stmt("ld", &["r28", "rsp", "0"])]);
    assert_eq!(
        expand_err("enter 6"),
        "immediate value must be a multiple of 4"
    );
}

#[test]
fn halt_spins_on_itself() {
    assert_eq!(expand("halt"), vec![stmt("beq+", &["r31", "r31", "-4"])]);
}

#[test]
fn serial_io_sequences() {
    assert_eq!(
        expand("read r2"),
        vec![
            stmt("ldh", &["r29", "r0", "0x8000"]),
            stmt("ld", &["r2", "r29", "0x1000"]),
            stmt("cmplt", &["r29", "r2", "r0", "0"]),
            stmt("bne", &["r29", "r0", "-16"]),
        ]
    );
    assert_eq!(
        expand("write r2, \"Hi\""),
        vec![
            stmt("ldh", &["r29", "r0", "0x8000"]),
            stmt("ldl", &["r2", "72"]),
            stmt("st", &["r2", "r29", "0x1000"]),
            stmt("ldl", &["r2", "105"]),
            stmt("st", &["r2", "r29", "0x1000"]),
        ]
    );
}

#[test]
fn data_directives() {
    assert_eq!(
        expand(".string \"AB\\n\""),
        vec![Payload::Stmt {
            mnemonic: ".byte".into(),
            operands: vec!["65".into(), "66".into(), "10".into(), "0".into()],
        }]
    );
    assert_eq!(
        expand(".float 1.0"),
        vec![Payload::Stmt {
            mnemonic: ".int".into(),
            operands: vec!["0x3f800000".into()],
        }]
    );
    assert_eq!(expand(".space 16"), vec![stmt(".space", &["16", "0"])]);
}

#[test]
fn sign_extension_pairs() {
    assert_eq!(
        expand("sextb r1, r2"),
        vec![
            stmt("shl", &["r29", "r2", "r0", "24"]),
            stmt("sar", &["r1", "r29", "r0", "24"]),
        ]
    );
    assert_eq!(
        expand("zextw r1, r2"),
        vec![stmt("ldh", &["r1", "r2", "0"])]
    );
    assert_eq!(
        expand("neg r1, r2"),
        vec![stmt("sub", &["r1", "r0", "r2", "0"])]
    );
    assert_eq!(
        expand("not r1, r2"),
        vec![stmt("xor", &["r1", "r2", "r0", "-1"])]
    );
}

#[test]
fn labels_and_comments() {
    assert_eq!(expand("loop:"), vec![Payload::Label("loop".into())]);
    assert_eq!(
        expand_err("loop: nop"),
        "label declaration must be followed by new line"
    );
    assert_eq!(expand("nop # comment"), vec![stmt("add", &["r0", "r0", "r0", "0"])]);
}

#[test]
fn unknown_mnemonics_pass_through() {
    assert_eq!(
        expand("frobnicate r1, r2"),
        vec![Payload::Stmt {
            mnemonic: "frobnicate".into(),
            operands: vec!["r1".into(), "r2".into()],
        }]
    );
}
