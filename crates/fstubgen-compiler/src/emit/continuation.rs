//! Line continuation for foreign source.
//!
//! Lines longer than the dialect's limit are split just before a non-word
//! character (anything but an ASCII letter, digit or underscore), so no
//! identifier or literal is cut in half. Free form ends a continued line with
//! `&`; fixed form starts the continuation line with `&` in column 6.
//! Removing the markers with [`rejoin`] gives back the original text.

use fstubgen_core::{Dialect, GenerationError, GenerationResult};

/// Prefix of a fixed-form continuation line.
const FIXED_CONTINUATION: &str = "     &";

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii()
}

/// Largest `p` in `1..=max` where `text[p]` is a non-word character.
fn break_point(text: &str, max: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (1..=max.min(bytes.len().saturating_sub(1)))
        .rev()
        .find(|&p| !is_word_byte(bytes[p]))
}

/// Break `text` into lines that fit the dialect's limit.
pub fn break_line(text: &str, dialect: Dialect) -> GenerationResult<String> {
    let limit = dialect.line_limit();
    if text.len() <= limit {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len() + text.len() / limit * 8);
    let mut rest = text;
    let mut first = true;
    loop {
        // Room left for content on this line, after any continuation prefix
        // and before any trailing marker.
        let prefix = match (dialect, first) {
            (Dialect::Fixed, false) => FIXED_CONTINUATION.len(),
            _ => 0,
        };
        let room = limit - prefix;
        if rest.len() <= room {
            out.push_str(rest);
            return Ok(out);
        }
        let max = match dialect {
            Dialect::Free => room - 1,
            Dialect::Fixed => room,
        };
        let p = break_point(rest, max).ok_or_else(|| GenerationError::NoLineBreak {
            line: text.to_string(),
        })?;
        out.push_str(&rest[..p]);
        match dialect {
            Dialect::Free => out.push_str("&\n"),
            Dialect::Fixed => {
                out.push('\n');
                out.push_str(FIXED_CONTINUATION);
            }
        }
        rest = &rest[p..];
        first = false;
    }
}

/// Undo [`break_line`].
pub fn rejoin(text: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::Free => text.replace("&\n", ""),
        Dialect::Fixed => text.replace(&format!("\n{FIXED_CONTINUATION}"), ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_call(n: usize) -> String {
        let args: Vec<String> = (0..n).map(|i| format!("argument_{i}")).collect();
        format!("  call some_routine({})", args.join(","))
    }

    #[test]
    fn short_lines_untouched() {
        assert_eq!(break_line("  return", Dialect::Free).unwrap(), "  return");
    }

    #[test]
    fn free_form_round_trip() {
        let text = long_call(40);
        let broken = break_line(&text, Dialect::Free).unwrap();
        assert!(broken.lines().count() > 1);
        assert!(broken.lines().all(|l| l.len() <= 132));
        assert!(broken.lines().rev().skip(1).all(|l| l.ends_with('&')));
        assert_eq!(rejoin(&broken, Dialect::Free), text);
    }

    #[test]
    fn fixed_form_round_trip() {
        let text = format!("      {}", long_call(20).trim_start());
        let broken = break_line(&text, Dialect::Fixed).unwrap();
        assert!(broken.lines().all(|l| l.len() <= 72));
        assert!(broken.lines().skip(1).all(|l| l.starts_with("     &")));
        assert_eq!(rejoin(&broken, Dialect::Fixed), text);
    }

    #[test]
    fn identifiers_are_not_split() {
        let text = long_call(40);
        let broken = break_line(&text, Dialect::Free).unwrap();
        for line in broken.lines().skip(1) {
            assert!(!line.as_bytes()[0].is_ascii_alphanumeric());
        }
    }

    #[test]
    fn unbreakable_line_is_an_error() {
        let text = "x".repeat(200);
        let err = break_line(&text, Dialect::Free).unwrap_err();
        assert!(matches!(err, GenerationError::NoLineBreak { .. }));
    }
}
