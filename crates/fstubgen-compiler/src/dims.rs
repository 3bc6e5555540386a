//! Dimension expression compiler.
//!
//! Array bounds are written as foreign-language expressions that may name
//! scalars, possibly scalars owned by other generated modules. This module
//! turns them into:
//!
//! - a **host form**, where every identifier becomes a dereference of a
//!   scalar descriptor slot (`*(long *)mod_fscalars[3].data`);
//! - a **foreign form** of the shape text, where each assumed `:` extent
//!   becomes a positional reference into the `dims__` vector passed to a
//!   binder (`(1:n,dims__(2))`).
//!
//! Identifiers resolve against the local scalar dictionary first, then against
//! each external [`ScalarIndex`] in the order supplied; the first hit wins.
//! Matching is case-insensitive. An identifier found nowhere is fatal.

use std::sync::OnceLock;

use fstubgen_core::{DimBound, GenerationError, GenerationResult, ScalarIndex, Variable};
use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;

// ============================================================================
// Tokens
// ============================================================================

/// A lexical piece of a bound expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'s> {
    Number(&'s str),
    Ident(&'s str),
    /// Operators, parentheses, commas and whitespace, passed through as is.
    Other(&'s str),
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eEdD][+-]?\d+)?)|(?P<id>[A-Za-z_][A-Za-z0-9_]*)")
            .expect("static pattern is valid")
    })
}

/// Split a bound expression into tokens. Concatenating the token texts gives
/// back the input.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in token_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Other(&text[last..whole.start()]));
        }
        if caps.name("num").is_some() {
            tokens.push(Token::Number(whole.as_str()));
        } else {
            tokens.push(Token::Ident(whole.as_str()));
        }
        last = whole.end();
    }
    if last < text.len() {
        tokens.push(Token::Other(&text[last..]));
    }
    tokens
}

/// Check whether a bound is a plain literal (no identifiers).
pub fn is_literal(text: &str) -> bool {
    !tokenize(text).iter().any(|t| matches!(t, Token::Ident(_)))
}

// ============================================================================
// Resolution
// ============================================================================

/// Where an identifier lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    /// Index into this module's scalar table.
    Local(usize),
    /// Index into another module's scalar table.
    External { index: &'a ScalarIndex, slot: usize },
}

impl Resolved<'_> {
    /// Group owning the resolved scalar.
    pub fn group<'v>(&'v self, locals: &'v [Variable]) -> Option<&'v str> {
        match self {
            Resolved::Local(i) => locals.get(*i).map(|v| v.group.as_str()),
            Resolved::External { index, slot } => index.scalar(*slot).map(|v| v.group.as_str()),
        }
    }
}

/// Compiles bound expressions of one module.
#[derive(Debug, Clone, Copy)]
pub struct DimensionCompiler<'a> {
    module: &'a str,
    dict: &'a FxHashMap<String, usize>,
    scalars: &'a [Variable],
    externals: &'a [ScalarIndex],
}

impl<'a> DimensionCompiler<'a> {
    pub fn new(
        module: &'a str,
        dict: &'a FxHashMap<String, usize>,
        scalars: &'a [Variable],
        externals: &'a [ScalarIndex],
    ) -> Self {
        Self {
            module,
            dict,
            scalars,
            externals,
        }
    }

    /// Resolve an identifier: local dictionary, then externals in order.
    pub fn resolve(&self, name: &str) -> GenerationResult<Resolved<'a>> {
        let key = name.to_ascii_lowercase();
        if let Some(&i) = self.dict.get(&key) {
            return Ok(Resolved::Local(i));
        }
        for index in self.externals {
            if let Some(slot) = index.lookup(&key) {
                log::trace!("{name} resolved in external module {}", index.module);
                return Ok(Resolved::External { index, slot });
            }
        }
        Err(GenerationError::unresolved(name))
    }

    /// C expression reading the resolved scalar's value.
    pub fn slot_ref(&self, resolved: Resolved<'_>) -> String {
        match resolved {
            Resolved::Local(i) => format!("*(long *){}_fscalars[{}].data", self.module, i),
            Resolved::External { index, slot } => {
                format!("*(long *){}[{}].data", index.table_name(), slot)
            }
        }
    }

    /// Host form of a bound expression.
    pub fn host_form(&self, expr: &str) -> GenerationResult<String> {
        self.host_form_with(expr, &|_| None)
    }

    /// Host form where `bound` may claim identifiers first (used for routine
    /// arguments, which are C locals inside a wrapper).
    pub fn host_form_with(
        &self,
        expr: &str,
        bound: &dyn Fn(&str) -> Option<String>,
    ) -> GenerationResult<String> {
        let mut out = String::with_capacity(expr.len() * 2);
        for token in tokenize(expr) {
            match token {
                Token::Ident(name) => match bound(name) {
                    Some(local) => out.push_str(&local),
                    None => out.push_str(&self.slot_ref(self.resolve(name)?)),
                },
                // C has no `d` exponent.
                Token::Number(n) => out.push_str(&n.to_ascii_lowercase().replace('d', "e")),
                Token::Other(o) => out.push_str(&o.to_ascii_lowercase()),
            }
        }
        Ok(out)
    }

    /// Host expression for the extent `high - low + 1` of one dimension.
    pub fn extent(
        &self,
        dim: &DimBound,
        bound: &dyn Fn(&str) -> Option<String>,
    ) -> GenerationResult<String> {
        Ok(format!(
            "(({})-({})+1)",
            self.host_form_with(&dim.high, bound)?,
            self.host_form_with(&dim.low, bound)?
        ))
    }

    /// Guard that is true when the total element count is non-zero:
    /// `1*ext1*ext2... != 0`.
    pub fn nonzero_guard(
        &self,
        dims: &[DimBound],
        bound: &dyn Fn(&str) -> Option<String>,
    ) -> GenerationResult<String> {
        let mut guard = String::from("1");
        for dim in dims {
            guard.push('*');
            guard.push_str(&self.extent(dim, bound)?);
        }
        guard.push_str(" != 0");
        Ok(guard)
    }

    /// Groups owning the identifiers used in a shape text, without duplicates,
    /// in order of first use.
    pub fn referenced_groups(&self, text: &str) -> GenerationResult<Vec<String>> {
        let mut groups: Vec<String> = Vec::new();
        for token in tokenize(text) {
            let Token::Ident(name) = token else { continue };
            let resolved = self.resolve(name)?;
            if let Some(group) = resolved.group(self.scalars)
                && !groups.iter().any(|g| g == group)
            {
                groups.push(group.to_string());
            }
        }
        Ok(groups)
    }
}

/// Foreign form of a shape text: assumed `:` extents become `dims__(k)`.
pub fn foreign_form(dimstring: &str) -> String {
    let trimmed = dimstring.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(trimmed);
    let parts: Vec<String> = split_top_level(inner)
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            if part.trim() == ":" {
                format!("dims__({})", i + 1)
            } else {
                part.to_string()
            }
        })
        .collect();
    format!("({})", parts.join(",")).to_ascii_lowercase()
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

// ============================================================================
// Evaluation
// ============================================================================

/// Errors from evaluating a bound expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{0} has no value")]
    Unknown(String),
    #[error("cannot evaluate '{0}'")]
    Syntax(String),
    #[error("division by zero in '{0}'")]
    DivisionByZero(String),
    #[error("integer overflow in '{0}'")]
    Overflow(String),
}

/// Evaluate an integer bound expression.
///
/// Supports literals, identifiers (through `lookup`), `+ - * /`, unary minus
/// and parentheses. Division truncates toward zero, as in the foreign
/// language. Arithmetic that leaves the `i64` range is an
/// [`EvalError::Overflow`].
pub fn evaluate(expr: &str, lookup: &dyn Fn(&str) -> Option<i64>) -> Result<i64, EvalError> {
    let tokens: Vec<Token<'_>> = tokenize(expr)
        .into_iter()
        .flat_map(|t| match t {
            Token::Other(o) => o
                .char_indices()
                .filter(|(_, c)| !c.is_whitespace())
                .map(|(i, _)| Token::Other(&o[i..i + 1]))
                .collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect();
    let mut parser = Evaluator {
        expr,
        tokens: &tokens,
        pos: 0,
        lookup,
    };
    let value = parser.sum()?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Syntax(expr.to_string()));
    }
    Ok(value)
}

struct Evaluator<'t, 's> {
    expr: &'s str,
    tokens: &'t [Token<'s>],
    pos: usize,
    lookup: &'t dyn Fn(&str) -> Option<i64>,
}

impl Evaluator<'_, '_> {
    fn peek_op(&self) -> Option<&str> {
        match self.tokens.get(self.pos) {
            Some(Token::Other(o)) => Some(*o),
            _ => None,
        }
    }

    fn syntax(&self) -> EvalError {
        EvalError::Syntax(self.expr.to_string())
    }

    fn overflow(&self) -> EvalError {
        EvalError::Overflow(self.expr.to_string())
    }

    fn sum(&mut self) -> Result<i64, EvalError> {
        let mut value = self.product()?;
        while let Some(op) = self.peek_op() {
            let add = match op {
                "+" => true,
                "-" => false,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.product()?;
            value = if add {
                value.checked_add(rhs)
            } else {
                value.checked_sub(rhs)
            }
            .ok_or_else(|| self.overflow())?;
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<i64, EvalError> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek_op() {
            match op {
                "*" => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    value = value.checked_mul(rhs).ok_or_else(|| self.overflow())?;
                }
                "/" => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0 {
                        return Err(EvalError::DivisionByZero(self.expr.to_string()));
                    }
                    // i64::MIN / -1
                    value = value.checked_div(rhs).ok_or_else(|| self.overflow())?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<i64, EvalError> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                let value = self.unary()?;
                value.checked_neg().ok_or_else(|| self.overflow())
            }
            Some("+") => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<i64, EvalError> {
        let token = *self.tokens.get(self.pos).ok_or_else(|| self.syntax())?;
        self.pos += 1;
        match token {
            Token::Number(n) => n.parse::<i64>().map_err(|_| self.syntax()),
            Token::Ident(name) => (self.lookup)(name).ok_or_else(|| EvalError::Unknown(name.to_string())),
            Token::Other("(") => {
                let value = self.sum()?;
                match self.peek_op() {
                    Some(")") => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(self.syntax()),
                }
            }
            Token::Other(_) => Err(self.syntax()),
        }
    }
}
