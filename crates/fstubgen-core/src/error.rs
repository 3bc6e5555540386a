//! Error types for stub generation and for the call model.
//!
//! ## Error Hierarchy
//!
//! ```text
//! GenerationError   - fatal, aborts the whole generation run
//! CallError         - raised by a generated wrapper at call time
//! ```
//!
//! Generation has no partial-success mode: the first `GenerationError` stops
//! the run. Artifacts already written to disk are left in place.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Generation Errors
// ============================================================================

/// Errors that abort stub generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A dimension expression names an identifier that is neither a local
    /// scalar nor a scalar of any supplied external module.
    #[error("{name} is not declared in the interface file")]
    UnresolvedIdentifier { name: String },

    /// An over-long foreign source line has no non-word character at which
    /// it could be continued.
    #[error("can't find a place to break up this line:\n{line}")]
    NoLineBreak { line: String },

    /// An external scalar index was requested from a file that does not follow
    /// the `<module>.scalars` naming pattern.
    #[error("expected a .scalars file, got {}", path.display())]
    InvalidScalarIndexPath { path: PathBuf },

    /// A persisted scalar index could not be encoded or decoded.
    #[error("malformed scalar index {}: {source}", path.display())]
    ScalarIndexFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Writing or reading an artifact failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GenerationError {
    /// Create an unresolved-identifier error.
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::UnresolvedIdentifier { name: name.into() }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for generation.
pub type GenerationResult<T> = Result<T, GenerationError>;

// ============================================================================
// Call Errors
// ============================================================================

/// What went wrong with a wrapped call.
///
/// The generated wrappers surface all of these through one host exception;
/// the kind only changes the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallErrorKind {
    /// The call supplied the wrong number of arguments.
    ArgumentCount { expected: usize, given: usize },
    /// Argument type does not match the declared element or record type.
    WrongType,
    /// The argument could not be converted into a contiguous buffer.
    Conversion,
    /// Argument rank differs from the declared rank.
    WrongRank,
    /// One extent differs from the declared extent (1-based dimension).
    WrongDimension { dimension: usize },
    /// The foreign routine faulted and the recovery point caught it.
    ForeignFault,
}

/// Error raised by a wrapper, naming the routine and 1-based argument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.message())]
pub struct CallError {
    /// Routine being called.
    pub routine: String,
    /// 1-based position of the offending argument (0 when no argument is
    /// involved, as for a fault in a routine without arguments).
    pub argument: usize,
    pub kind: CallErrorKind,
}

impl CallError {
    pub fn new(routine: impl Into<String>, argument: usize, kind: CallErrorKind) -> Self {
        Self {
            routine: routine.into(),
            argument,
            kind,
        }
    }

    /// The message text, identical to the one the emitted C wrapper formats.
    pub fn message(&self) -> String {
        let (arg, name) = (self.argument, &self.routine);
        match &self.kind {
            CallErrorKind::ArgumentCount { expected, given } => {
                format!("{name}() takes exactly {expected} arguments ({given} given)")
            }
            CallErrorKind::WrongType | CallErrorKind::ForeignFault => {
                format!("Argument {arg} in {name} has the wrong type")
            }
            CallErrorKind::Conversion => format!("There is an error in argument {arg} in {name}"),
            CallErrorKind::WrongRank => {
                format!("Argument {arg} in {name} has the wrong number of dimensions")
            }
            CallErrorKind::WrongDimension { dimension } => {
                format!("Dimension {dimension} of argument {arg} in {name} has the wrong size")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_messages_name_routine_and_position() {
        let err = CallError::new("foo", 1, CallErrorKind::WrongDimension { dimension: 1 });
        assert_eq!(
            err.to_string(),
            "Dimension 1 of argument 1 in foo has the wrong size"
        );

        let err = CallError::new("bar", 3, CallErrorKind::WrongRank);
        assert_eq!(
            err.to_string(),
            "Argument 3 in bar has the wrong number of dimensions"
        );
    }

    #[test]
    fn unresolved_identifier_names_it() {
        let err = GenerationError::unresolved("nx");
        assert_eq!(err.to_string(), "nx is not declared in the interface file");
    }
}
