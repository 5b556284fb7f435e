//! Address layout and relaxation.
//!
//! Addresses are assigned in repeated passes: every relaxable statement
//! starts in its widest form, and each optimization pass narrows the ones
//! whose operands are proven to fit, until a pass changes nothing (or the
//! optimization budget runs out). A final pass rewrites the surviving
//! relaxable statements into primitive instructions.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{AsmError, Loc, Sources, SyntaxError, Warning};
use crate::expr;
use crate::item::{stmt, CallForm, Item, Payload, PendKind};
use crate::parser::{check_operands, fits_signed, fmt_hex, parse_int};
use crate::reg::{self, LINK, SCRATCH};

/// Total image size limit, in bytes.
const SIZE_LIMIT: i64 = 0x40_0000;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct LabelFlags: u8 {
        /// Declared `.global`, visible from other files.
        const GLOBAL = 1;
        /// Looked up at least once.
        const REFERENCED = 2;
    }
}

/// One declaration of a label within one file.
#[derive(Debug, Clone, Serialize)]
pub struct LabelDef {
    /// `None` for a `.global` declaration whose definition never appeared.
    pub addr: Option<i64>,
    pub flags: LabelFlags,
}

impl LabelDef {
    fn undefined() -> Self {
        Self {
            addr: None,
            flags: LabelFlags::empty(),
        }
    }
}

/// Layout error, before source context is attached. Fatal errors abort
/// without a source position; syntax errors blame the current statement.
#[derive(Debug)]
pub enum LayoutError {
    Fatal(String),
    Syntax(SyntaxError),
}

impl From<SyntaxError> for LayoutError {
    fn from(e: SyntaxError) -> Self {
        LayoutError::Syntax(e)
    }
}

impl LayoutError {
    /// Attach the offending statement's position and text.
    pub fn at(self, sources: &Sources, loc: &Loc) -> AsmError {
        match self {
            LayoutError::Fatal(msg) => AsmError::fatal(msg),
            LayoutError::Syntax(e) => sources.err(loc, e.0),
        }
    }
}

/// Label table plus the address layout state shared by all passes.
#[derive(Debug)]
pub struct Layout {
    /// label name -> declaring file -> definition.
    pub labels: HashMap<String, HashMap<String, LabelDef>>,
    /// address -> labels defined there, for listings.
    pub rev_labels: BTreeMap<i64, Vec<String>>,
    /// Files whose global labels yield to non-library declarations.
    pub library: HashSet<String>,
    pub entry: i64,
    pub start_label: String,
}

impl Layout {
    pub fn new(entry: i64, start_label: impl Into<String>, library: HashSet<String>) -> Self {
        Self {
            labels: HashMap::new(),
            rev_labels: BTreeMap::new(),
            library,
            entry,
            start_label: start_label.into(),
        }
    }

    fn add_label(&mut self, label: &str, file: &str, addr: i64) -> Result<(), SyntaxError> {
        if reg::is_reg(label) {
            return Err(SyntaxError::new(format!("'{label}' is register name")));
        }
        if parse_int(label).is_some() {
            return Err(SyntaxError::new(format!(
                "'{label}' can be parsed as integer"
            )));
        }
        if let Some(c) = label
            .chars()
            .find(|&c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '!' | '?')))
        {
            return Err(SyntaxError::new(format!(
                "label name cannot contain '{c}' character"
            )));
        }
        let def = self
            .labels
            .entry(label.to_string())
            .or_default()
            .entry(file.to_string())
            .or_insert_with(LabelDef::undefined);
        if def.addr.is_some() {
            return Err(SyntaxError::new(format!(
                "duplicate declaration of label '{label}'"
            )));
        }
        def.addr = Some(addr);
        self.rev_labels.entry(addr).or_default().push(label.to_string());
        Ok(())
    }

    fn add_global(&mut self, label: &str, file: &str) {
        let def = self
            .labels
            .entry(label.to_string())
            .or_default()
            .entry(file.to_string())
            .or_insert_with(LabelDef::undefined);
        def.flags |= LabelFlags::GLOBAL;
    }

    /// Resolve a label as seen from `file`: a declaration in the same file
    /// wins, then a unique global one, with library files yielding to
    /// non-library declarations.
    pub fn label_addr(&mut self, label: &str, file: &str) -> Result<i64, LayoutError> {
        let dic = self.labels.get(label);
        let mut decl: Vec<String> = match dic {
            Some(dic) if dic.contains_key(file) => vec![file.to_string()],
            Some(dic) => {
                let mut v: Vec<String> = dic
                    .iter()
                    .filter(|(_, d)| d.flags.contains(LabelFlags::GLOBAL))
                    .map(|(f, _)| f.clone())
                    .collect();
                v.sort();
                v
            }
            None => Vec::new(),
        };
        if decl.is_empty() {
            if label == self.start_label {
                return Err(LayoutError::Fatal(format!(
                    "global label '{label}' is required"
                )));
            }
            return Err(SyntaxError::new(format!("label '{label}' is not declared")).into());
        }
        if decl.len() > 1 && !decl.iter().all(|f| self.library.contains(f)) {
            decl.retain(|f| !self.library.contains(f));
        }
        if decl.len() > 1 {
            let msg = format!(
                "label '{}' is declared in multiple files ({})",
                label,
                decl.join(", ")
            );
            if label == self.start_label {
                return Err(LayoutError::Fatal(msg));
            }
            return Err(SyntaxError::new(msg).into());
        }
        let def = self
            .labels
            .get_mut(label)
            .and_then(|d| d.get_mut(&decl[0]))
            .ok_or_else(|| SyntaxError::new(format!("label '{label}' is not declared")))?;
        def.flags |= LabelFlags::REFERENCED;
        def.addr
            .ok_or_else(|| SyntaxError::new(format!("label '{label}' is not declared")).into())
    }

    /// Evaluate an operand expression, substituting label addresses.
    pub fn eval_expr(&mut self, text: &str, file: &str) -> Result<i64, LayoutError> {
        let mut fatal: Option<String> = None;
        let result = {
            let mut resolver = |name: &str| match self.label_addr(name, file) {
                Ok(v) => Ok(v),
                Err(LayoutError::Fatal(msg)) => {
                    fatal = Some(msg);
                    Err(SyntaxError::new(String::new()))
                }
                Err(LayoutError::Syntax(e)) => Err(e),
            };
            expr::eval(text, &mut resolver)
        };
        match result {
            Ok(v) => Ok(v),
            Err(e) => match fatal {
                Some(msg) => Err(LayoutError::Fatal(msg)),
                None => Err(e.into()),
            },
        }
    }

    /// Labels defined at `addr`, comma-joined. Empty when there are none.
    pub fn labels_at(&self, addr: i64) -> String {
        match self.rev_labels.get(&addr) {
            Some(v) => v.join(", "),
            None => String::new(),
        }
    }

    fn reset(&mut self) {
        self.labels.clear();
        self.rev_labels.clear();
    }

    /// First pass: validate directives, assign addresses with every
    /// relaxable statement at its widest size.
    pub fn first_pass(&mut self, items: &[Item], sources: &Sources) -> Result<(), AsmError> {
        self.reset();
        let mut addr = self.entry;
        for item in items {
            let ctx = |e: LayoutError| e.at(sources, &item.loc);
            match &item.payload {
                Payload::Label(name) => {
                    self.add_label(name, &item.loc.file, addr)
                        .map_err(|e| ctx(e.into()))?;
                }
                Payload::Stmt { mnemonic, operands } => match mnemonic.as_str() {
                    ".align" => {
                        check_operands(operands, 1, 1).map_err(|e| ctx(e.into()))?;
                        let Some(align) = parse_int(&operands[0]) else {
                            return Err(sources.err(
                                &item.loc,
                                format!("expected integer literal: {}", operands[0]),
                            ));
                        };
                        if align < 4 || align & (align - 1) != 0 {
                            return Err(sources.err(
                                &item.loc,
                                "alignment must be a power of 2 which is not less than 4",
                            ));
                        }
                        addr = (addr + align - 1) & !(align - 1);
                    }
                    ".byte" => addr += operands.len() as i64,
                    ".global" => {
                        check_operands(operands, 1, 1).map_err(|e| ctx(e.into()))?;
                        self.add_global(&operands[0], &item.loc.file);
                    }
                    ".int" => addr += 4 * operands.len() as i64,
                    ".set" => {
                        check_operands(operands, 2, 2).map_err(|e| ctx(e.into()))?;
                        let val = self
                            .eval_expr(&operands[1], &item.loc.file)
                            .map_err(ctx)?;
                        self.add_label(&operands[0], &item.loc.file, val)
                            .map_err(|e| ctx(e.into()))?;
                    }
                    ".short" => addr += 2 * operands.len() as i64,
                    ".space" => {
                        check_operands(operands, 2, 2).map_err(|e| ctx(e.into()))?;
                        let Some(size) = parse_int(&operands[0]) else {
                            return Err(sources.err(
                                &item.loc,
                                format!("expected integer literal: {}", operands[0]),
                            ));
                        };
                        addr += size;
                    }
                    _ => {
                        if addr & 3 != 0 {
                            return Err(sources.err(
                                &item.loc,
                                "instruction must be aligned on 4-byte boundaries",
                            ));
                        }
                        addr += 4;
                    }
                },
                _ => {
                    if addr & 3 != 0 {
                        return Err(sources.err(
                            &item.loc,
                            "instruction must be aligned on 4-byte boundaries",
                        ));
                    }
                    addr += item_size(&item.payload, addr).map_err(|e| ctx(e.into()))?;
                }
            }
        }
        tracing::debug!(end = format_args!("{:#x}", addr), "first layout pass");
        Ok(())
    }

    /// Re-derive the label table after an optimization pass moved
    /// addresses.
    pub fn repeat_pass(&mut self, items: &[Item], sources: &Sources) -> Result<(), AsmError> {
        self.reset();
        let mut addr = self.entry;
        for item in items {
            let ctx = |e: LayoutError| e.at(sources, &item.loc);
            match &item.payload {
                Payload::Label(name) => {
                    self.add_label(name, &item.loc.file, addr)
                        .map_err(|e| ctx(e.into()))?;
                }
                Payload::Stmt { mnemonic, operands } if mnemonic == ".global" => {
                    self.add_global(&operands[0], &item.loc.file);
                }
                Payload::Stmt { mnemonic, operands } if mnemonic == ".set" => {
                    let val = self
                        .eval_expr(&operands[1], &item.loc.file)
                        .map_err(ctx)?;
                    self.add_label(&operands[0], &item.loc.file, val)
                        .map_err(|e| ctx(e.into()))?;
                }
                payload => addr += item_size(payload, addr).map_err(|e| ctx(e.into()))?,
            }
        }
        Ok(())
    }

    /// One narrowing pass. Returns whether anything shrank; addresses seen
    /// by fit checks are the ones from the previous layout, corrected by
    /// the bytes already saved in this pass for backward references.
    pub fn optimize(&mut self, items: &mut [Item], sources: &Sources) -> Result<bool, AsmError> {
        let mut eff = 0i64;
        let mut addr = self.entry;
        for item in items.iter_mut() {
            let loc = item.loc.clone();
            match &mut item.payload {
                Payload::Pending {
                    kind,
                    narrow: narrow @ false,
                    operands,
                } => {
                    addr += 8;
                    let val = self
                        .eval_expr(&operands[1], &loc.file)
                        .map_err(|e| e.at(sources, &loc))?;
                    if fits_signed(val, kind.narrow_bits()) {
                        eff += 4;
                        *narrow = true;
                    }
                }
                Payload::Call {
                    form: form @ (CallForm::Full | CallForm::Near),
                    target,
                } => {
                    let old = form.size();
                    let val = self
                        .label_addr(target, &loc.file)
                        .map_err(|e| e.at(sources, &loc))?;
                    let corr = if val > addr { eff } else { -eff };
                    if fits_signed(val - addr - 16 + corr, 18) {
                        eff += old - 24;
                        *form = CallForm::Rel;
                    } else if *form == CallForm::Full && fits_signed(val, 16) {
                        eff += 4;
                        *form = CallForm::Near;
                    }
                    addr += old;
                }
                payload => {
                    addr += item_size(payload, addr).map_err(|e| {
                        LayoutError::from(e).at(sources, &loc)
                    })?;
                }
            }
        }
        tracing::debug!(saved = eff, "optimization pass");
        Ok(eff > 0)
    }

    /// Final pass: rewrite every relaxable statement into primitive
    /// instructions with all label references substituted.
    pub fn resolve(&mut self, items: &[Item], sources: &Sources) -> Result<Vec<Item>, AsmError> {
        let mut out = Vec::new();
        let mut addr = self.entry;
        for item in items {
            let loc = &item.loc;
            let ctx = |e: LayoutError| e.at(sources, loc);
            match &item.payload {
                Payload::Label(_) => {}
                Payload::Pending {
                    kind: PendKind::Mov,
                    narrow,
                    operands,
                } => {
                    if *narrow {
                        addr += 4;
                        let val = self.eval_expr(&operands[1], &loc.file).map_err(ctx)?;
                        out.push(Item::new(
                            stmt("ldl", &[&operands[0], &fmt_hex(val)]),
                            loc.clone(),
                        ));
                    } else {
                        addr += 8;
                        let val = self.eval_expr(&operands[1], &loc.file).map_err(ctx)?;
                        if !(-0x8000_0000..=0xffff_ffff).contains(&val) {
                            if loc.file.is_empty() {
                                return Err(AsmError::fatal(format!(
                                    "address of start label is too large: {}",
                                    fmt_hex(val)
                                )));
                            }
                            return Err(sources.err(
                                loc,
                                format!("expression value too large: {}", fmt_hex(val)),
                            ));
                        }
                        out.push(Item::new(
                            stmt("ldl", &[&operands[0], &fmt_hex(val & 0xffff)]),
                            loc.clone(),
                        ));
                        out.push(Item::new(
                            stmt(
                                "ldh",
                                &[&operands[0], &operands[0], &fmt_hex((val >> 16) & 0xffff)],
                            ),
                            loc.clone(),
                        ));
                    }
                }
                Payload::Pending {
                    kind,
                    narrow,
                    operands,
                } => {
                    let base = kind.base_mnemonic();
                    if *narrow {
                        addr += 4;
                        let val = self.eval_expr(&operands[1], &loc.file).map_err(ctx)?;
                        out.push(Item::new(
                            stmt(base, &[&operands[0], "r0", &fmt_hex(val)]),
                            loc.clone(),
                        ));
                    } else {
                        addr += 8;
                        let val = self.eval_expr(&operands[1], &loc.file).map_err(ctx)?;
                        if !(-0x8000_0000..=0xffff_ffff).contains(&val) {
                            return Err(sources.err(
                                loc,
                                format!("expression value too large: {}", fmt_hex(val)),
                            ));
                        }
                        let hi = ((val + 0x8000) >> 16) & 0xffff;
                        let lo = ((val + 0x8000) & 0xffff) - 0x8000;
                        out.push(Item::new(
                            stmt("ldh", &[SCRATCH, "r0", &fmt_hex(hi)]),
                            loc.clone(),
                        ));
                        out.push(Item::new(
                            stmt(base, &[&operands[0], SCRATCH, &fmt_hex(lo)]),
                            loc.clone(),
                        ));
                    }
                }
                Payload::Call { form, target } => {
                    addr += form.size();
                    let val = self.label_addr(target, &loc.file).map_err(ctx)?;
                    if !(-0x8000_0000..=0xffff_ffff).contains(&val) {
                        return Err(sources.err(
                            loc,
                            format!("expression value too large: {}", fmt_hex(val)),
                        ));
                    }
                    let mut seq = vec![
                        stmt("st", &["rbp", "rsp", "-4"]),
                        stmt("sub", &["rsp", "rsp", "r0", "4"]),
                        stmt("add", &["rbp", "rsp", "r0", "0"]),
                    ];
                    match form {
                        CallForm::Rel => {
                            seq.push(stmt("jl", &[LINK, &fmt_hex(val - addr + 8)]));
                        }
                        CallForm::Near => {
                            seq.push(stmt("ldl", &[SCRATCH, &fmt_hex(val)]));
                            seq.push(stmt("jr", &[LINK, SCRATCH]));
                        }
                        CallForm::Full => {
                            seq.push(stmt("ldl", &[SCRATCH, &fmt_hex(val & 0xffff)]));
                            seq.push(stmt(
                                "ldh",
                                &[SCRATCH, SCRATCH, &fmt_hex((val >> 16) & 0xffff)],
                            ));
                            seq.push(stmt("jr", &[LINK, SCRATCH]));
                        }
                    }
                    seq.push(stmt("add", &["rsp", "rbp", "r0", "4"]));
                    seq.push(stmt("ld", &["rbp", "rsp", "-4"]));
                    out.extend(seq.into_iter().map(|p| Item::new(p, loc.clone())));
                }
                Payload::Stmt { mnemonic, operands } => match mnemonic.as_str() {
                    ".global" | ".set" => {}
                    ".align" => {
                        let align = int_operand(operands, 0).map_err(|e| ctx(e.into()))?;
                        let padding = ((addr + align - 1) & !(align - 1)) - addr;
                        if padding > 0 {
                            addr += padding;
                            out.push(Item::new(
                                stmt(".space", &[&padding.to_string(), "0"]),
                                loc.clone(),
                            ));
                        }
                    }
                    ".int" => {
                        let mut resolved = Vec::new();
                        for op in operands {
                            let val = self.eval_expr(op, &loc.file).map_err(ctx)?;
                            if !(-0x8000_0000..=0xffff_ffff).contains(&val) {
                                return Err(sources.err(
                                    loc,
                                    format!("expression value too large: {}", fmt_hex(val)),
                                ));
                            }
                            resolved.push(if fits_signed(val, 8) {
                                val.to_string()
                            } else {
                                fmt_hex(val)
                            });
                        }
                        addr += 4 * resolved.len() as i64;
                        out.push(Item::new(
                            Payload::Stmt {
                                mnemonic: ".int".to_string(),
                                operands: resolved,
                            },
                            loc.clone(),
                        ));
                    }
                    m @ ("jl" | "bne" | "bne-" | "bne+" | "beq" | "beq-" | "beq+") => {
                        check_operands(operands, 2, 3).map_err(|e| ctx(e.into()))?;
                        let mut operands = operands.clone();
                        let last = operands.len() - 1;
                        if parse_int(&operands[last]).is_none() {
                            let val = self
                                .label_addr(&operands[last], &loc.file)
                                .map_err(ctx)?;
                            operands[last] = fmt_hex(val - addr - 4);
                        }
                        addr += 4;
                        out.push(Item::new(
                            Payload::Stmt {
                                mnemonic: m.to_string(),
                                operands,
                            },
                            loc.clone(),
                        ));
                    }
                    _ => {
                        addr += item_size(&item.payload, addr).map_err(|e| ctx(e.into()))?;
                        out.push(item.clone());
                    }
                },
            }
        }
        let size = addr - self.entry;
        if size > SIZE_LIMIT {
            return Err(AsmError::fatal(format!(
                "program size exceeds 4MB limit ({} bytes)",
                group_digits(size)
            )));
        }
        tracing::debug!(bytes = size, "resolved layout");
        Ok(out)
    }

    /// Post-resolution checks: `.global` declarations without a definition
    /// are errors, labels never referenced get a warning.
    pub fn check_labels(
        &self,
        items: &[Item],
        sources: &Sources,
        warn_unused: bool,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), AsmError> {
        for item in items {
            match &item.payload {
                Payload::Stmt { mnemonic, operands } if mnemonic == ".global" => {
                    let defined = self
                        .labels
                        .get(&operands[0])
                        .and_then(|d| d.get(&item.loc.file))
                        .map(|d| d.addr.is_some())
                        .unwrap_or(false);
                    if !defined {
                        return Err(sources.err(
                            &item.loc,
                            format!("label '{}' is not declared", operands[0]),
                        ));
                    }
                }
                Payload::Label(name) if warn_unused => {
                    let Some(def) = self.labels.get(name).and_then(|d| d.get(&item.loc.file))
                    else {
                        continue;
                    };
                    let exported = self.library.contains(&item.loc.file)
                        && def.flags.contains(LabelFlags::GLOBAL);
                    if !def.flags.contains(LabelFlags::REFERENCED) && !exported {
                        warnings.push(sources.warning(
                            &item.loc,
                            format!("unused label '{name}'"),
                            false,
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Byte size of a statement at `addr`. Labels, `.global` and `.set`
/// occupy nothing.
pub fn item_size(payload: &Payload, addr: i64) -> Result<i64, SyntaxError> {
    match payload {
        Payload::Label(_) => Ok(0),
        Payload::Pending { narrow, .. } => Ok(if *narrow { 4 } else { 8 }),
        Payload::Call { form, .. } => Ok(form.size()),
        Payload::Stmt { mnemonic, operands } => match mnemonic.as_str() {
            ".global" | ".set" => Ok(0),
            ".align" => {
                let align = int_operand(operands, 0)?;
                Ok(((addr + align - 1) & !(align - 1)) - addr)
            }
            ".byte" => Ok(operands.len() as i64),
            ".int" => Ok(4 * operands.len() as i64),
            ".short" => Ok(2 * operands.len() as i64),
            ".space" => int_operand(operands, 0),
            _ => Ok(4),
        },
    }
}

fn int_operand(operands: &[String], idx: usize) -> Result<i64, SyntaxError> {
    let text = operands.get(idx).map(String::as_str).unwrap_or("");
    parse_int(text).ok_or_else(|| SyntaxError::new(format!("expected integer literal: {text}")))
}

fn group_digits(v: i64) -> String {
    let digits = v.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(payload: Payload, file: &str, line: u32) -> Item {
        Item::new(payload, Loc::new(file, line))
    }

    #[test]
    fn same_file_declaration_wins() {
        let mut layout = Layout::new(0x2000, "main", HashSet::new());
        let items = vec![
            item(Payload::Label("x".into()), "a.s", 1),
            item(stmt("nop", &[]), "a.s", 2),
            item(stmt(".global", &["x"]), "b.s", 1),
            item(Payload::Label("x".into()), "b.s", 2),
        ];
        let sources = Sources::default();
        layout.first_pass(&items, &sources).unwrap();
        assert_eq!(layout.label_addr("x", "a.s").unwrap(), 0x2000);
        assert_eq!(layout.label_addr("x", "b.s").unwrap(), 0x2004);
        // Only the global declaration is visible elsewhere.
        assert_eq!(layout.label_addr("x", "c.s").unwrap(), 0x2004);
    }

    #[test]
    fn library_yields_to_user_code() {
        let mut library = HashSet::new();
        library.insert("lib.s".to_string());
        let mut layout = Layout::new(0, "main", library);
        let items = vec![
            item(stmt(".global", &["f"]), "lib.s", 1),
            item(Payload::Label("f".into()), "lib.s", 2),
            item(stmt("nop", &[]), "lib.s", 3),
            item(stmt(".global", &["f"]), "app.s", 1),
            item(Payload::Label("f".into()), "app.s", 2),
        ];
        let sources = Sources::default();
        layout.first_pass(&items, &sources).unwrap();
        assert_eq!(layout.label_addr("f", "other.s").unwrap(), 4);
    }

    #[test]
    fn missing_start_label_is_fatal() {
        let mut layout = Layout::new(0, "main", HashSet::new());
        match layout.label_addr("main", "") {
            Err(LayoutError::Fatal(msg)) => {
                assert_eq!(msg, "global label 'main' is required");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_digits(4_194_305), "4,194,305");
        assert_eq!(group_digits(999), "999");
    }
}
