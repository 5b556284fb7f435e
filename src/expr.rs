//! Arithmetic expression evaluation for `.set`, `.int` and symbolic
//! operands. Label references are substituted through a resolver callback
//! before arithmetic, so forward references work once addresses are known.

use crate::error::SyntaxError;
use crate::parser::parse_int;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(char),
    Shl,
    Shr,
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '!' | '?')
}

fn tokenize(expr: &str) -> Result<Vec<Tok>, SyntaxError> {
    let mut toks = Vec::new();
    let mut it = expr.chars().peekable();
    while let Some(&c) = it.peek() {
        if c.is_whitespace() {
            it.next();
        } else if is_ident_char(c) {
            let mut word = String::new();
            while let Some(&c) = it.peek() {
                if !is_ident_char(c) {
                    break;
                }
                word.push(c);
                it.next();
            }
            match parse_int(&word) {
                Some(v) => toks.push(Tok::Num(v)),
                None => toks.push(Tok::Ident(word)),
            }
        } else {
            it.next();
            match c {
                '<' if it.peek() == Some(&'<') => {
                    it.next();
                    toks.push(Tok::Shl);
                }
                '>' if it.peek() == Some(&'>') => {
                    it.next();
                    toks.push(Tok::Shr);
                }
                '(' => toks.push(Tok::LParen),
                ')' => toks.push(Tok::RParen),
                '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '~' => toks.push(Tok::Op(c)),
                _ => return Err(eval_error(expr)),
            }
        }
    }
    Ok(toks)
}

fn eval_error(expr: &str) -> SyntaxError {
    SyntaxError::new(format!("eval error: {expr}"))
}

/// Label resolver: maps an identifier to its address.
pub trait Resolve {
    fn resolve(&mut self, name: &str) -> Result<i64, SyntaxError>;
}

impl<F> Resolve for F
where
    F: FnMut(&str) -> Result<i64, SyntaxError>,
{
    fn resolve(&mut self, name: &str) -> Result<i64, SyntaxError> {
        self(name)
    }
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
    expr: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn unary(&mut self, r: &mut dyn Resolve) -> Result<i64, SyntaxError> {
        match self.next().cloned() {
            Some(Tok::Num(v)) => Ok(v),
            Some(Tok::Ident(name)) => r.resolve(&name),
            Some(Tok::Op('-')) => Ok(self.unary(r)?.wrapping_neg()),
            Some(Tok::Op('+')) => self.unary(r),
            Some(Tok::Op('~')) => Ok(!self.unary(r)?),
            Some(Tok::LParen) => {
                let v = self.binary(0, r)?;
                match self.next() {
                    Some(Tok::RParen) => Ok(v),
                    _ => Err(eval_error(self.expr)),
                }
            }
            _ => Err(eval_error(self.expr)),
        }
    }

    fn binary(&mut self, min_prec: u8, r: &mut dyn Resolve) -> Result<i64, SyntaxError> {
        let mut lhs = self.unary(r)?;
        while let Some(tok) = self.peek().cloned() {
            let prec = match tok {
                Tok::Op('|') => 1,
                Tok::Op('^') => 2,
                Tok::Op('&') => 3,
                Tok::Shl | Tok::Shr => 4,
                Tok::Op('+') | Tok::Op('-') => 5,
                Tok::Op('*') | Tok::Op('/') | Tok::Op('%') => 6,
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.next();
            let rhs = self.binary(prec + 1, r)?;
            lhs = apply(&tok, lhs, rhs).ok_or_else(|| eval_error(self.expr))?;
        }
        Ok(lhs)
    }
}

// Division and remainder floor toward negative infinity, matching the
// reference evaluator.
fn apply(op: &Tok, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        Tok::Op('|') => a | b,
        Tok::Op('^') => a ^ b,
        Tok::Op('&') => a & b,
        Tok::Shl => {
            if !(0..64).contains(&b) {
                return None;
            }
            a.wrapping_shl(b as u32)
        }
        Tok::Shr => {
            if !(0..64).contains(&b) {
                return None;
            }
            a.wrapping_shr(b as u32)
        }
        Tok::Op('+') => a.wrapping_add(b),
        Tok::Op('-') => a.wrapping_sub(b),
        Tok::Op('*') => a.wrapping_mul(b),
        Tok::Op('/') => floor_div(a, b)?,
        Tok::Op('%') => {
            let q = floor_div(a, b)?;
            a - q * b
        }
        _ => return None,
    })
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Evaluate `expr` to an integer, resolving label references through `r`.
pub fn eval(expr: &str, r: &mut dyn Resolve) -> Result<i64, SyntaxError> {
    let toks = tokenize(expr)?;
    let mut p = Parser {
        toks: &toks,
        pos: 0,
        expr,
    };
    let v = p.binary(0, r)?;
    if p.pos != toks.len() {
        return Err(eval_error(expr));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_labels(name: &str) -> Result<i64, SyntaxError> {
        Err(SyntaxError::new(format!("label '{name}' is not declared")))
    }

    #[test]
    fn precedence_and_literals() {
        let mut r = no_labels;
        assert_eq!(eval("2+3*4", &mut r).unwrap(), 14);
        assert_eq!(eval("(2+3)*4", &mut r).unwrap(), 20);
        assert_eq!(eval("1 << 4 | 3", &mut r).unwrap(), 19);
        assert_eq!(eval("0x10 - -2", &mut r).unwrap(), 18);
        assert_eq!(eval("~0", &mut r).unwrap(), -1);
        assert_eq!(eval("-7 / 2", &mut r).unwrap(), -4);
        assert_eq!(eval("-7 % 2", &mut r).unwrap(), 1);
    }

    #[test]
    fn label_substitution() {
        let mut r = |name: &str| {
            if name == "base" {
                Ok(0x2000)
            } else {
                no_labels(name)
            }
        };
        assert_eq!(eval("base + 8", &mut r).unwrap(), 0x2008);
        assert!(eval("other + 8", &mut r).is_err());
    }

    #[test]
    fn malformed() {
        let mut r = no_labels;
        assert!(eval("2 +", &mut r).is_err());
        assert!(eval("(1", &mut r).is_err());
        assert!(eval("1 / 0", &mut r).is_err());
    }
}
