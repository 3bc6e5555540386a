//! GenContext - everything an emitter needs for one module.

use fstubgen_core::{
    GeneratorOptions, NameMangler, Package, Routine, RoutineKind, ScalarIndex, TypeTable,
};

use crate::classify::Classified;
use crate::dims::DimensionCompiler;
use crate::pointers;

/// Shared state of one generation run.
///
/// Built once after classification. The descriptor [`Package`] is laid out
/// here, before any emitter runs, so every table index and binder symbol an
/// emitter refers to already exists.
pub struct GenContext<'a> {
    pub options: &'a GeneratorOptions,
    pub types: &'a dyn TypeTable,
    /// Scalar indexes of other modules, in resolution order.
    pub externals: &'a [ScalarIndex],
    pub classified: Classified,
    pub mangler: NameMangler,
    pub package: Package,
}

impl<'a> GenContext<'a> {
    pub fn new(
        classified: Classified,
        options: &'a GeneratorOptions,
        types: &'a dyn TypeTable,
        externals: &'a [ScalarIndex],
    ) -> Self {
        let mangler = NameMangler::new(classified.module.clone());
        let package = pointers::layout(&classified, options, types, &mangler);
        Self {
            options,
            types,
            externals,
            classified,
            mangler,
            package,
        }
    }

    pub fn module(&self) -> &str {
        &self.classified.module
    }

    /// Dimension compiler over this module's scalars and the externals.
    pub fn dims(&self) -> DimensionCompiler<'_> {
        DimensionCompiler::new(
            &self.classified.module,
            self.classified.scalar_dict(),
            &self.classified.scalars,
            self.externals,
        )
    }

    /// Name of a generated foreign subroutine, as written in foreign source.
    pub fn foreign_symbol(&self, prefix: &str, suffix: &str) -> String {
        self.mangler.symbol(prefix, suffix)
    }

    /// Name of a generated foreign subroutine, as seen from C.
    pub fn c_symbol(&self, prefix: &str, suffix: &str) -> String {
        c_symbol(self.options, &self.mangler, prefix, suffix)
    }

    /// C name of a user routine.
    pub fn routine_symbol(&self, routine: &Routine) -> String {
        match routine.kind {
            RoutineKind::Fortran => self.options.toolchain.link_name(&routine.name),
            RoutineKind::C => routine.name.clone(),
        }
    }

    /// Foreign index literal for a table position.
    pub fn index(&self, position: usize) -> String {
        self.options.index_literal(position as i64)
    }

    /// Name of the C wrapper for a routine or record constructor.
    pub fn wrapper(&self, name: &str) -> String {
        self.mangler.wrapper(name)
    }
}

pub(crate) fn c_symbol(
    options: &GeneratorOptions,
    mangler: &NameMangler,
    prefix: &str,
    suffix: &str,
) -> String {
    options.toolchain.link_name(&mangler.symbol(prefix, suffix))
}
