//! Code generation for fstubgen.
//!
//! Turns a classified interface description into C glue for the Python host,
//! Fortran linkage subroutines and a persisted scalar index.
//!
//! ## Modules
//!
//! - [`classify`]: partitions declarations, builds the scalar dictionary
//! - [`dims`]: dimension expressions in host and foreign form, plus evaluation
//! - [`emit`]: line writers, including foreign line continuation
//! - [`context`]: shared per-module state handed to every emitter
//! - [`marshal`]: call wrappers, prototypes, method table and the call model
//! - [`pointers`]: descriptor tables, shape setters and binder entry points
//! - [`linkage`]: foreign pass-down, nullify, binders and group modules
//! - [`assembler`]: phase ordering and artifact output
//!
//! ## Example
//!
//! ```no_run
//! use fstubgen_compiler::ModuleAssembler;
//! use fstubgen_core::{DimBound, GeneratorOptions, InterfaceDescription, VarType, Variable};
//!
//! let interface = InterfaceDescription::new("wxy")
//!     .declare(Variable::scalar("n", VarType::Integer, "consts"))
//!     .declare(Variable::array("beta", VarType::Real, "consts", vec![DimBound::upper("n")]));
//!
//! let module = ModuleAssembler::new(GeneratorOptions::default())
//!     .generate_to(interface, std::path::Path::new("build"))?;
//! println!("{}", module.foreign_file_name());
//! # Ok::<(), fstubgen_core::GenerationError>(())
//! ```

pub mod assembler;
pub mod classify;
pub mod context;
pub mod dims;
pub mod emit;
pub mod linkage;
pub mod marshal;
pub mod pointers;

pub use assembler::{GeneratedModule, ModuleAssembler, NoRecordTypes, RecordTypeEmitter};
pub use classify::{Classified, add_timers, classify};
pub use context::GenContext;
pub use dims::{DimensionCompiler, EvalError, Resolved, evaluate};
pub use emit::{ForeignWriter, HostWriter, break_line, rejoin};
pub use marshal::{Buffer, CallValidator, HostArg};
