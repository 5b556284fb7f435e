use pretty_assertions::assert_eq;

use gr32_asm::{assemble, Options, SourceFile};

fn file(text: &str) -> Vec<SourceFile> {
    vec![SourceFile {
        name: "test.s".to_string(),
        text: text.to_string(),
        library: false,
    }]
}

fn opts(entry: i64, opt_level: u32) -> Options {
    Options {
        entry,
        opt_level,
        start_jump: false,
        warn_unused_label: false,
        ..Options::default()
    }
}

fn word(image: &[u8], index: usize) -> [u8; 4] {
    image[index * 4..index * 4 + 4].try_into().unwrap()
}

#[test]
fn symbolic_mov_narrows_when_address_fits() {
    let src = "main:\n    mov r1, main\n    halt\n";
    let out = assemble(&file(src), &opts(0x2000, 2)).unwrap();
    // ldl r1, 0x2000 / beq+ r31, r31, -4
    assert_eq!(out.image.len(), 8);
    assert_eq!(word(&out.image, 0), [0x00, 0x20, 0x80, 0x20]);
    assert_eq!(word(&out.image, 1), [0xff, 0xff, 0xff, 0xff]);
}

#[test]
fn symbolic_mov_stays_wide_without_optimization() {
    let src = "main:\n    mov r1, main\n    halt\n";
    let out = assemble(&file(src), &opts(0x2000, 0)).unwrap();
    // ldl r1, 0x2000 / ldh r1, r1, 0x0 / beq+
    assert_eq!(out.image.len(), 12);
    assert_eq!(word(&out.image, 0), [0x00, 0x20, 0x80, 0x20]);
    assert_eq!(word(&out.image, 1), [0x00, 0x00, 0x84, 0x30]);
}

#[test]
fn symbolic_load_narrows_to_absolute() {
    let src = "main:\n    mov r1, [buf]\n    halt\nbuf:\n    .int 0\n";
    let out = assemble(&file(src), &opts(0x2000, 2)).unwrap();
    // ld r1, r0, 0x2008 / halt / .int
    assert_eq!(out.image.len(), 12);
    assert_eq!(word(&out.image, 0), [0x02, 0x08, 0x80, 0x60]);
}

#[test]
fn near_call_relaxes_to_relative_jump() {
    let src = "main:\n    call f\n    halt\nf:\n    ret\n";
    let out = assemble(&file(src), &opts(0, 2)).unwrap();
    // 24-byte call sequence + halt + ret.
    assert_eq!(out.image.len(), 32);
    // st rbp, rsp, -4 opens the frame.
    assert_eq!(word(&out.image, 0), [0xff, 0xff, 0xf8, 0x8f]);
    // jl r28, 12 reaches f relative to the end of the sequence.
    assert_eq!(word(&out.image, 3), [0x03, 0x00, 0x03, 0x4e]);
}

#[test]
fn distant_call_keeps_absolute_form() {
    let src = "main:\n    call f\n    halt\n    .space 0x40000\nf:\n    ret\n";
    let out = assemble(&file(src), &opts(0, 2)).unwrap();
    // 32-byte call + halt + gap + ret.
    assert_eq!(out.image.len(), 32 + 4 + 0x40000 + 4);
    // ldl r29, low / ldh r29, r29, high materialize the target.
    let target = 32 + 4 + 0x40000u32;
    assert_eq!(
        word(&out.image, 3),
        [(target & 0xff) as u8, ((target >> 8) & 0xff) as u8, 0x80, 0x2e]
    );
}

#[test]
fn backward_call_with_small_target_uses_single_load() {
    let src = "f:\n    ret\n    .space 0x40000\nmain:\n    call f\n    halt\n";
    let out = assemble(&file(src), &opts(0, 2)).unwrap();
    // ret + gap + 28-byte call + halt.
    assert_eq!(out.image.len(), 4 + 0x40000 + 28 + 4);
}

#[test]
fn unoptimized_call_is_widest() {
    let src = "main:\n    call f\n    halt\nf:\n    ret\n";
    let out = assemble(&file(src), &opts(0, 0)).unwrap();
    assert_eq!(out.image.len(), 32 + 4 + 4);
}

#[test]
fn alignment_emits_padding() {
    let src = "main:\n    .byte 1, 2\n    .align 4\n    halt\n";
    let out = assemble(&file(src), &opts(0, 2)).unwrap();
    assert_eq!(out.image.len(), 8);
    assert_eq!(&out.image[0..4], &[1, 2, 0, 0]);
}
