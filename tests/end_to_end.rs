use pretty_assertions::assert_eq;

use gr32_asm::{assemble, AsmError, ListingStyle, Options, SourceFile};

fn file(name: &str, text: &str, library: bool) -> SourceFile {
    SourceFile {
        name: name.to_string(),
        text: text.to_string(),
        library,
    }
}

#[test]
fn start_jump_and_immediate_load() {
    let src = "    .global main\nmain:\n    mov r1, 0x12345678\n    halt\n";
    let out = assemble(&[file("a.s", src, false)], &Options::default()).unwrap();
    // The entry sequence narrows to a single load of main's address.
    assert_eq!(
        out.image,
        vec![
            0x08, 0x20, 0x80, 0x2e, // ldl r29, 0x2008
            0x00, 0x00, 0xf7, 0x5e, // jr r29, r29
            0x78, 0x56, 0x80, 0x20, // ldl r1, 0x5678
            0x34, 0x12, 0x84, 0x30, // ldh r1, r1, 0x1234
            0xff, 0xff, 0xff, 0xff, // beq+ r31, r31, -4
        ]
    );
}

#[test]
fn global_labels_resolve_across_files() {
    let lib = "    .global f\nf:\n    ret\n";
    let app = "main:\n    call f\n    halt\n";
    let opts = Options {
        entry: 0,
        start_jump: false,
        warn_unused_label: false,
        ..Options::default()
    };
    let out = assemble(&[file("lib.s", lib, true), file("app.s", app, false)], &opts).unwrap();
    // ret + relaxed 24-byte call + halt.
    assert_eq!(out.image.len(), 4 + 24 + 4);
}

#[test]
fn same_name_prefers_local_declaration() {
    let a = "    .global f\nf:\n    nop\n";
    let b = "f:\n    nop\nmain:\n    mov r1, f\n    halt\n";
    let opts = Options {
        entry: 0,
        start_jump: false,
        warn_unused_label: false,
        ..Options::default()
    };
    let out = assemble(&[file("a.s", a, false), file("b.s", b, false)], &opts).unwrap();
    // f in b.s sits at 4; the other declaration never shadows it.
    assert_eq!(&out.image[8..12], &[0x04, 0x00, 0x80, 0x20]);
}

#[test]
fn ambiguous_global_label_is_an_error() {
    let a = "    .global f\nf:\n    nop\n";
    let b = "    .global f\nf:\n    nop\n";
    let c = "main:\n    call f\n";
    let opts = Options {
        start_jump: false,
        ..Options::default()
    };
    let err = assemble(
        &[file("a.s", a, false), file("b.s", b, false), file("c.s", c, false)],
        &opts,
    )
    .unwrap_err();
    assert!(err
        .to_string()
        .contains("label 'f' is declared in multiple files (a.s, b.s)"));
}

#[test]
fn missing_start_label_is_fatal() {
    let err = assemble(&[file("a.s", "nop\n", false)], &Options::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "fatal error: global label 'main' is required"
    );
    assert!(matches!(err, AsmError::Fatal { .. }));
}

#[test]
fn duplicate_label_is_an_error() {
    let src = "x:\n    nop\nx:\n    nop\n";
    let opts = Options {
        start_jump: false,
        ..Options::default()
    };
    let err = assemble(&[file("a.s", src, false)], &opts).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("a.s:3: error: duplicate declaration of label 'x'"));
    assert!(msg.contains("x:"));
}

#[test]
fn undefined_global_is_an_error() {
    let src = "    .global main\nmain:\n    .global ghost\n    halt\n";
    let err = assemble(&[file("a.s", src, false)], &Options::default()).unwrap_err();
    assert!(err.to_string().contains("label 'ghost' is not declared"));
}

#[test]
fn unknown_mnemonic_is_reported_with_position() {
    let src = "    .global main\nmain:\n    frobnicate r1\n";
    let err = assemble(&[file("a.s", src, false)], &Options::default()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("a.s:3: error: unknown mnemonic 'frobnicate'"));
    assert!(msg.contains("frobnicate r1"));
}

#[test]
fn unused_label_warning() {
    let src = "    .global main\nmain:\n    halt\nforgotten:\n    nop\n";
    let out = assemble(&[file("a.s", src, false)], &Options::default()).unwrap();
    let msgs: Vec<String> = out.warnings.iter().map(|w| w.to_string()).collect();
    assert!(msgs.contains(&"a.s:4: warning: unused label 'forgotten'".to_string()));
    // The start label itself is referenced by the entry sequence.
    assert!(!msgs.iter().any(|m| m.contains("'main'")));
}

#[test]
fn scratch_register_warning_dedupes_per_line() {
    let src = "    .global main\nmain:\n    add r29, r29, 1\n    halt\n";
    let opts = Options {
        warn_scratch: true,
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    let hits: Vec<_> = out
        .warnings
        .iter()
        .filter(|w| w.msg == "r29 is used")
        .collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].loc.line, 3);
    assert!(hits[0].show_text);
}

#[test]
fn set_and_int_expressions() {
    let src = "main:\n    .set SIZE, 4*8\n    .int SIZE, SIZE+1, main\n";
    let opts = Options {
        entry: 0x2000,
        start_jump: false,
        warn_unused_label: false,
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    assert_eq!(&out.image[0..4], &[32, 0, 0, 0]);
    assert_eq!(&out.image[4..8], &[33, 0, 0, 0]);
    assert_eq!(&out.image[8..12], &[0x00, 0x20, 0x00, 0x00]);
}

#[test]
fn end_label_is_defined_past_the_image() {
    let src = "    .global main\nmain:\n    halt\n";
    let opts = Options {
        end_label: Some("heap".to_string()),
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    let heap = out.symbols.iter().find(|s| s.name == "heap").unwrap();
    assert_eq!(heap.addr, 0x2000 + out.image.len() as i64);
    assert!(heap.global);
    assert_eq!(heap.file, "_end");
}

#[test]
fn symbols_are_sorted_by_address() {
    let src = "    .global main\nmain:\n    halt\nlater:\n    nop\n";
    let opts = Options {
        warn_unused_label: false,
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    let names: Vec<&str> = out.symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["main", "later"]);
    assert_eq!(out.symbols[0].addr, 0x2008);
}

#[test]
fn plain_listing_shows_addresses_and_labels() {
    let src = "    .global main\nmain:\n    halt\n";
    let opts = Options {
        listing: Some(ListingStyle::Plain),
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    let listing = out.listing.unwrap();
    assert!(listing.contains("# file: a.s"));
    assert!(listing.contains("0x002008  beq+    r31, r31, -4"));
    assert!(listing.contains("# main"));
}

#[test]
fn verbose_listing_shows_words_and_source() {
    let src = "    .global main\nmain:\n    halt\n";
    let opts = Options {
        listing: Some(ListingStyle::Verbose),
        ..Options::default()
    };
    let out = assemble(&[file("a.s", src, false)], &opts).unwrap();
    let listing = out.listing.unwrap();
    assert!(listing.contains("# [ffffffff]  (main)  halt"));
}

#[test]
fn oversized_program_is_fatal() {
    let src = "main:\n    .space 0x400004\n";
    let opts = Options {
        start_jump: false,
        warn_unused_label: false,
        ..Options::default()
    };
    let err = assemble(&[file("a.s", src, false)], &opts).unwrap_err();
    assert_eq!(
        err.to_string(),
        "fatal error: program size exceeds 4MB limit (4,194,308 bytes)"
    );
}

#[test]
fn misaligned_instruction_is_an_error() {
    let src = "main:\n    .byte 1\n    nop\n";
    let opts = Options {
        start_jump: false,
        ..Options::default()
    };
    let err = assemble(&[file("a.s", src, false)], &opts).unwrap_err();
    assert!(err
        .to_string()
        .contains("instruction must be aligned on 4-byte boundaries"));
}
