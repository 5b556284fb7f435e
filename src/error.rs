use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Source position attached to every statement for diagnostics.
/// The synthetic entry sequence carries an empty file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Loc {
    pub file: String,
    pub line: u32,
}

impl Loc {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    pub fn synthetic() -> Self {
        Self {
            file: String::new(),
            line: 0,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A diagnostic raised by a helper that has no source context of its own.
/// The driving pass attaches file, line and source text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SyntaxError(pub String);

impl SyntaxError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    /// No output can be produced at all (bad configuration, unresolved
    /// start label, image over the size limit).
    #[error("fatal error: {msg}")]
    Fatal { msg: String },
    /// A specific source line is invalid. Processing stops at the first one.
    #[error("{loc}: error: {msg}\n  {text}")]
    Line { loc: Loc, msg: String, text: String },
}

impl AsmError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal { msg: msg.into() }
    }
}

/// Non-stopping diagnostic (unused label, scratch register use).
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub loc: Loc,
    pub msg: String,
    /// Whether renderers should repeat the offending source text.
    pub show_text: bool,
    pub text: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: warning: {}", self.loc, self.msg)?;
        if self.show_text {
            write!(f, "\n  {}", self.text)?;
        }
        Ok(())
    }
}

/// Retained source lines, used to echo the offending text in diagnostics.
#[derive(Debug, Default)]
pub struct Sources {
    lines: HashMap<String, HashMap<u32, String>>,
}

impl Sources {
    pub fn record(&mut self, loc: &Loc, text: &str) {
        self.lines
            .entry(loc.file.clone())
            .or_default()
            .insert(loc.line, text.to_string());
    }

    pub fn text(&self, loc: &Loc) -> &str {
        self.lines
            .get(&loc.file)
            .and_then(|f| f.get(&loc.line))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn err(&self, loc: &Loc, msg: impl Into<String>) -> AsmError {
        AsmError::Line {
            loc: loc.clone(),
            msg: msg.into(),
            text: self.text(loc).to_string(),
        }
    }

    pub fn warning(&self, loc: &Loc, msg: impl Into<String>, show_text: bool) -> Warning {
        Warning {
            loc: loc.clone(),
            msg: msg.into(),
            show_text,
            text: self.text(loc).to_string(),
        }
    }
}
