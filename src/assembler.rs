//! Assembly pipeline: preprocessing, macro expansion, layout/relaxation
//! and final encoding, driven from a single options struct.

use serde::Serialize;
use std::collections::HashSet;

use crate::encode::encode_stmt;
use crate::error::{AsmError, Loc, Sources, Warning};
use crate::expand::expand_line;
use crate::item::{stmt, Item, Payload, PendKind};
use crate::layout::{item_size, LabelFlags, Layout};
use crate::reg::SCRATCH;

/// Listing output style, when one is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    /// Address, mnemonic and operands.
    Plain,
    /// Adds the encoded word, label names and the originating source text.
    Verbose,
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Address of the first instruction. Must be a multiple of 4.
    pub entry: i64,
    /// Label where execution starts.
    pub start_label: String,
    /// Maximum number of narrowing passes.
    pub opt_level: u32,
    /// Extra label defined past the last byte of the program.
    pub end_label: Option<String>,
    /// Emit a jump to the start label ahead of all code.
    pub start_jump: bool,
    pub listing: Option<ListingStyle>,
    pub warn_unused_label: bool,
    /// Warn on explicit use of the assembler scratch register.
    pub warn_scratch: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            entry: 0x2000,
            start_label: "main".to_string(),
            opt_level: 2,
            end_label: None,
            start_jump: true,
            listing: None,
            warn_unused_label: true,
            warn_scratch: false,
        }
    }
}

/// One input file. Library files lose label-shadowing conflicts and skip
/// unused-label warnings for their globals.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
    pub library: bool,
}

/// A defined label, for symbol export.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub file: String,
    pub addr: i64,
    pub global: bool,
}

#[derive(Debug)]
pub struct Output {
    /// Raw image, without the size header.
    pub image: Vec<u8>,
    pub listing: Option<String>,
    pub symbols: Vec<Symbol>,
    pub warnings: Vec<Warning>,
}

/// Run the whole pipeline over the given sources.
pub fn assemble(files: &[SourceFile], opts: &Options) -> Result<Output, AsmError> {
    let mut sources = Sources::default();
    let mut raw: Vec<(String, Loc)> = Vec::new();
    for file in files {
        for (i, line) in file.text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let loc = Loc::new(file.name.clone(), i as u32 + 1);
            sources.record(&loc, line);
            raw.push((line.to_string(), loc));
        }
    }
    if let Some(last) = raw.last().cloned() {
        raw.push((".align 4".to_string(), last.1));
    }
    if let Some(end) = &opts.end_label {
        let loc = Loc::new("_end", 0);
        raw.push((format!(".global {end}"), loc.clone()));
        raw.push((format!("{end}:"), loc));
    }

    let mut items: Vec<Item> = Vec::new();
    if opts.start_jump {
        items.push(Item::new(
            Payload::Pending {
                kind: PendKind::Mov,
                narrow: false,
                operands: vec![SCRATCH.to_string(), opts.start_label.clone()],
            },
            Loc::synthetic(),
        ));
        items.push(Item::new(stmt("jr", &[SCRATCH, SCRATCH]), Loc::synthetic()));
    }
    for (line, loc) in &raw {
        let expanded = expand_line(line).map_err(|e| sources.err(loc, e.0))?;
        items.extend(expanded.into_iter().map(|p| Item::new(p, loc.clone())));
    }
    tracing::debug!(statements = items.len(), "macro expansion done");

    let mut warnings = Vec::new();
    if opts.warn_scratch {
        let mut prev: Option<&Loc> = None;
        for item in &items {
            if item.loc.file.is_empty() {
                continue;
            }
            if item.operands().iter().any(|op| op == SCRATCH) && prev != Some(&item.loc) {
                warnings.push(sources.warning(&item.loc, format!("{SCRATCH} is used"), true));
                prev = Some(&item.loc);
            }
        }
    }

    let library: HashSet<String> = files
        .iter()
        .filter(|f| f.library)
        .map(|f| f.name.clone())
        .collect();
    let mut layout = Layout::new(opts.entry, opts.start_label.clone(), library);
    layout.first_pass(&items, &sources)?;
    let mut budget = opts.opt_level;
    while budget > 0 && layout.optimize(&mut items, &sources)? {
        budget -= 1;
        layout.repeat_pass(&items, &sources)?;
    }
    let resolved = layout.resolve(&items, &sources)?;
    layout.check_labels(&items, &sources, opts.warn_unused_label, &mut warnings)?;

    let mut image = Vec::new();
    for item in &resolved {
        let Payload::Stmt { mnemonic, operands } = &item.payload else {
            continue;
        };
        let bytes = encode_stmt(mnemonic, operands).map_err(|e| sources.err(&item.loc, e.0))?;
        image.extend_from_slice(&bytes);
    }

    let listing = match opts.listing {
        Some(style) => Some(render_listing(&resolved, &layout, &sources, opts.entry, style)?),
        None => None,
    };
    let symbols = collect_symbols(&layout);
    tracing::info!(bytes = image.len(), symbols = symbols.len(), "assembled");
    Ok(Output {
        image,
        listing,
        symbols,
        warnings,
    })
}

fn collect_symbols(layout: &Layout) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (name, files) in &layout.labels {
        for (file, def) in files {
            if let Some(addr) = def.addr {
                symbols.push(Symbol {
                    name: name.clone(),
                    file: file.clone(),
                    addr,
                    global: def.flags.contains(LabelFlags::GLOBAL),
                });
            }
        }
    }
    symbols.sort_by(|a, b| (a.addr, &a.name).cmp(&(b.addr, &b.name)));
    symbols
}

fn render_listing(
    resolved: &[Item],
    layout: &Layout,
    sources: &Sources,
    entry: i64,
    style: ListingStyle,
) -> Result<String, AsmError> {
    use std::fmt::Write;

    let mut out = String::new();
    let mut addr = entry;
    let mut prev_file = String::new();
    let mut prev_line = None;
    for item in resolved {
        let Payload::Stmt { mnemonic, operands } = &item.payload else {
            continue;
        };
        if prev_file != item.loc.file {
            let _ = writeln!(out, "\n# file: {}", item.loc.file);
            prev_file = item.loc.file.clone();
        }
        let head = format!("{:#08x}  {:7} {}", addr, mnemonic, operands.join(", "));
        let labels = layout.labels_at(addr);
        let comment = match style {
            ListingStyle::Verbose => {
                let bytes = encode_stmt(mnemonic, operands)
                    .map_err(|e| sources.err(&item.loc, e.0))?;
                let mut word = [0u8; 4];
                for (i, b) in bytes.iter().take(4).enumerate() {
                    word[i] = *b;
                }
                let mut c = format!("# [{:08x}]  ", u32::from_le_bytes(word));
                if !labels.is_empty() {
                    let _ = write!(c, "({labels})  ");
                }
                if prev_line != Some(&item.loc) && !item.loc.file.is_empty() {
                    c.push_str(sources.text(&item.loc));
                    prev_line = Some(&item.loc);
                }
                c
            }
            ListingStyle::Plain if !labels.is_empty() => format!("# {labels}"),
            ListingStyle::Plain => String::new(),
        };
        let _ = writeln!(out, "{}", format!("{head:39} {comment}").trim_end());
        addr += item_size(&item.payload, addr).map_err(|e| sources.err(&item.loc, e.0))?;
    }
    Ok(out)
}
