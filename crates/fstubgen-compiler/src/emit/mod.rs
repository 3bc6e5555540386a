//! Source writers for the generated artifacts.
//!
//! [`HostWriter`] accumulates the C glue verbatim. [`ForeignWriter`]
//! accumulates foreign source and enforces the dialect's column limit by
//! inserting continuation markers (see [`continuation`]).

pub mod continuation;

use fstubgen_core::{Dialect, GenerationResult};

pub use continuation::{break_line, rejoin};

/// Escape text for use inside a C string literal.
pub fn escape_c(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Writer for the host glue source.
#[derive(Debug, Default)]
pub struct HostWriter {
    buf: String,
}

impl HostWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a full line.
    pub fn line(&mut self, text: impl AsRef<str>) {
        self.buf.push_str(text.as_ref());
        self.buf.push('\n');
    }

    /// Write text without ending the line.
    pub fn text(&mut self, text: impl AsRef<str>) {
        self.buf.push_str(text.as_ref());
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Writer for foreign linkage source.
#[derive(Debug)]
pub struct ForeignWriter {
    dialect: Dialect,
    buf: String,
}

impl ForeignWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            buf: String::new(),
        }
    }

    /// Resume writing an already started artifact.
    pub fn append_to(dialect: Dialect, existing: String) -> Self {
        Self {
            dialect,
            buf: existing,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Write one statement, continuing it over several lines when it exceeds
    /// the column limit. Fixed-form statements start in column 7.
    pub fn line(&mut self, text: impl AsRef<str>) -> GenerationResult<()> {
        let text = text.as_ref();
        let full = match self.dialect {
            Dialect::Free => text.to_string(),
            Dialect::Fixed => format!("      {}", text.trim_start()),
        };
        self.buf.push_str(&break_line(&full, self.dialect)?);
        self.buf.push('\n');
        Ok(())
    }

    /// Write a preprocessor macro line such as `Use(g)` as given. Fixed form
    /// does not move it to column 7.
    pub fn macro_line(&mut self, text: impl AsRef<str>) -> GenerationResult<()> {
        self.buf.push_str(&break_line(text.as_ref(), self.dialect)?);
        self.buf.push('\n');
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_writer_collects_lines() {
        let mut w = HostWriter::new();
        w.text("int x");
        w.line(" = 1;");
        w.blank();
        assert_eq!(w.finish(), "int x = 1;\n\n");
    }

    #[test]
    fn c_strings_are_escaped() {
        assert_eq!(escape_c("say \"hi\"\nnow"), "say \\\"hi\\\"\\nnow");
        assert_eq!(escape_c("a\\b"), "a\\\\b");
    }

    #[test]
    fn fixed_form_statements_start_in_column_seven() {
        let mut w = ForeignWriter::new(Dialect::Fixed);
        w.line("  call foo()").unwrap();
        assert_eq!(w.as_str(), "      call foo()\n");
    }

    #[test]
    fn append_keeps_existing_text() {
        let w = ForeignWriter::append_to(Dialect::Free, "MODULE a\n".into());
        let mut w = w;
        w.line("END MODULE a").unwrap();
        assert_eq!(w.finish(), "MODULE a\nEND MODULE a\n");
    }
}
