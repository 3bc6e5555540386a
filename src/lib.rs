//! fstubgen - Python/Fortran stub compiler.
//!
//! Given a description of Fortran routines and data (scalars, arrays, record
//! types organised in groups), fstubgen emits
//!
//! - `<module>pymodule.c`: C glue against the Python C API and `Forthon.h`,
//! - `<module>_p.F90` (or `<module>_p.m` in fixed form): Fortran subroutines
//!   that hand variable addresses to the glue, and the group modules,
//! - `<module>.scalars`: the module's scalar index, which dependent modules
//!   load to resolve dimension identifiers they do not declare.
//!
//! Parsing the textual interface format is left to the caller; build an
//! [`InterfaceDescription`] and hand it to a [`ModuleAssembler`].
//!
//! # Example
//!
//! ```no_run
//! use fstubgen::prelude::*;
//!
//! let interface = InterfaceDescription::new("wxy")
//!     .declare(Variable::scalar("n", VarType::Integer, "consts"))
//!     .declare(Variable::array("beta", VarType::Real, "consts", vec![DimBound::upper("n")]))
//!     .declare(
//!         Routine::subroutine("foo")
//!             .arg(Argument::new("x", VarType::Real).with_dims(vec![DimBound::upper("5")])),
//!     );
//!
//! let generated = ModuleAssembler::new(GeneratorOptions::default()).generate(interface)?;
//! assert!(generated.host_source.contains("PyInit_wxypy"));
//! # Ok::<(), GenerationError>(())
//! ```
//!
//! # Concurrency
//!
//! Generation is single-threaded. The generated C is not reentrant: wrappers
//! share descriptor tables and buffer handles without locking.

pub use fstubgen_compiler::{
    CallValidator, GeneratedModule, HostArg, ModuleAssembler, NoRecordTypes, RecordTypeEmitter,
    break_line, rejoin,
};
pub use fstubgen_core::{
    CallError, CallErrorKind, Dialect, GenerationError, GenerationResult, GeneratorOptions,
    InterfaceDescription, MAX_SYMBOL_LEN, Package, ScalarIndex, StandardTypes, Toolchain,
    TypeTable, mangle,
};

/// The types needed to describe and generate a module.
pub mod prelude {
    pub use fstubgen_compiler::{GeneratedModule, ModuleAssembler, RecordTypeEmitter};
    pub use fstubgen_core::{
        Argument, Declaration, DimBound, Dialect, GenerationError, GenerationResult, GeneratorOptions,
        InterfaceDescription, RecordType, Routine, RoutineKind, ScalarIndex, Toolchain, VarType,
        Variable,
    };
}

/// Load the scalar indexes of previously generated modules, in the order
/// given. Identifiers resolve against the first index that has them.
pub fn load_scalar_indexes<P: AsRef<std::path::Path>>(
    paths: &[P],
) -> GenerationResult<Vec<ScalarIndex>> {
    paths
        .iter()
        .map(|p| {
            log::debug!("loading scalar index {}", p.as_ref().display());
            ScalarIndex::load(p.as_ref())
        })
        .collect()
}
