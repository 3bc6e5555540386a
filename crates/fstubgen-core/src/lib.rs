//! Core data model for the fstubgen stub compiler.
//!
//! ## Modules
//!
//! - [`types`]: semantic type tags and dimension bounds
//! - [`variable`]: variables, routines, record types and the parser's record stream
//! - [`options`]: generator configuration (dialect, toolchain, toggles)
//! - [`mangle`]: linker-legal symbol names under the 31-character ceiling
//! - [`scalar_index`]: persisted scalar dictionaries shared between modules
//! - [`descriptor`]: descriptor tables and the pointer-binding protocol
//! - [`type_table`]: host/foreign spellings of semantic types
//! - [`error`]: generation and call errors

pub mod descriptor;
pub mod error;
pub mod mangle;
pub mod options;
pub mod scalar_index;
pub mod type_table;
pub mod types;
pub mod variable;

pub use descriptor::{ArrayDescriptor, BindError, ForeignAddress, Package, ScalarDescriptor};
pub use error::{CallError, CallErrorKind, GenerationError, GenerationResult};
pub use mangle::{MAX_SYMBOL_LEN, NameMangler, mangle};
pub use options::{Dialect, GeneratorOptions, Toolchain};
pub use scalar_index::ScalarIndex;
pub use type_table::{StandardTypes, TypeTable};
pub use types::{DimBound, VarType};
pub use variable::{
    Argument, Declaration, Group, InterfaceDescription, RecordType, Routine, RoutineKind,
    VarFlags, Variable, shape_text,
};
