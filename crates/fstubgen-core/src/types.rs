//! Semantic type tags and dimension bounds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic type of a variable, argument or routine result.
///
/// The foreign language is case-insensitive, so type tags parse without
/// regard to case. Any tag that is not a built-in type names a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Integer,
    Real,
    Double,
    Complex,
    Logical,
    /// Character data; the interface files spell it `string` or `character`.
    Character,
    /// A record (derived) type, by name.
    Record(String),
}

impl VarType {
    /// Parse a type tag as written in an interface description.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "integer" => VarType::Integer,
            "real" => VarType::Real,
            "double" => VarType::Double,
            "complex" => VarType::Complex,
            "logical" => VarType::Logical,
            "string" | "character" => VarType::Character,
            _ => VarType::Record(tag.trim().to_string()),
        }
    }

    /// Check if this is a record type.
    pub fn is_record(&self) -> bool {
        matches!(self, VarType::Record(_))
    }

    /// Check if this is a built-in numeric (or logical) type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            VarType::Integer | VarType::Real | VarType::Double | VarType::Complex | VarType::Logical
        )
    }

    /// Check if values of this type are passed as length-carrying strings.
    pub fn is_character(&self) -> bool {
        matches!(self, VarType::Character)
    }

    /// The tag as it appears in descriptor tables and persisted indexes.
    pub fn tag(&self) -> &str {
        match self {
            VarType::Integer => "integer",
            VarType::Real => "real",
            VarType::Double => "double",
            VarType::Complex => "complex",
            VarType::Logical => "logical",
            VarType::Character => "character",
            VarType::Record(name) => name,
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One dimension of an array declaration, as bound expressions.
///
/// `high` is empty for an assumed extent (`:`); its size is then only known
/// when the foreign side reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimBound {
    pub low: String,
    pub high: String,
}

impl DimBound {
    pub fn new(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            low: low.into(),
            high: high.into(),
        }
    }

    /// A `1:high` bound.
    pub fn upper(high: impl Into<String>) -> Self {
        Self::new("1", high)
    }

    /// An assumed extent, written `:` in the shape text.
    pub fn assumed() -> Self {
        Self::new("1", "")
    }

    pub fn is_assumed(&self) -> bool {
        self.high.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(VarType::parse("INTEGER"), VarType::Integer);
        assert_eq!(VarType::parse("Real"), VarType::Real);
        assert_eq!(VarType::parse("string"), VarType::Character);
        assert_eq!(VarType::parse("character"), VarType::Character);
    }

    #[test]
    fn unknown_tags_are_records() {
        let ty = VarType::parse("Particles");
        assert_eq!(ty, VarType::Record("Particles".into()));
        assert!(ty.is_record());
        assert_eq!(ty.tag(), "Particles");
    }

    #[test]
    fn assumed_bound() {
        assert!(DimBound::assumed().is_assumed());
        assert!(!DimBound::upper("n").is_assumed());
    }
}
