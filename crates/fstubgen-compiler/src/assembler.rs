//! ModuleAssembler - drives every emitter in a fixed order.
//!
//! Each phase may refer to names and indices assigned by an earlier one, so
//! the order below is load-bearing:
//!
//! 1. classify (after adding timer scalars when routines are timed)
//! 2. foreign-routine, record-constructor and binder prototypes
//! 3. scalar table, then array table
//! 4. one wrapper per routine, then the method table
//! 5. static and dynamic shape setters, binder entry points
//! 6. module init
//! 7. record types (appends to both artifacts)
//! 8. foreign linkage, then group modules
//! 9. the persisted scalar index
//!
//! Generation either completes or stops at the first error. Artifacts already
//! written by [`ModuleAssembler::generate_to`] stay on disk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fstubgen_core::{
    Dialect, GenerationError, GenerationResult, GeneratorOptions, InterfaceDescription,
    ScalarIndex, StandardTypes, TypeTable,
};

use crate::classify::{add_timers, classify};
use crate::context::GenContext;
use crate::emit::{ForeignWriter, HostWriter};
use crate::linkage::LinkageEmitter;
use crate::marshal::MarshalEmitter;
use crate::pointers::PointerEmitter;

/// Generates the code of a module's record types.
///
/// Runs after the host artifact is complete and before the foreign linkage.
/// Whatever it writes is appended to the respective artifact; foreign text
/// is placed ahead of the group modules that may `USE` it.
pub trait RecordTypeEmitter {
    fn emit(
        &self,
        ctx: &GenContext<'_>,
        host: &mut HostWriter,
        foreign: &mut ForeignWriter,
    ) -> GenerationResult<()>;
}

/// Record-type hook that emits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecordTypes;

impl RecordTypeEmitter for NoRecordTypes {
    fn emit(
        &self,
        ctx: &GenContext<'_>,
        _host: &mut HostWriter,
        _foreign: &mut ForeignWriter,
    ) -> GenerationResult<()> {
        if !ctx.classified.record_types.is_empty() {
            log::debug!(
                "{}: {} record types left to an external generator",
                ctx.module(),
                ctx.classified.record_types.len()
            );
        }
        Ok(())
    }
}

/// The three artifacts of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedModule {
    pub module: String,
    pub dialect: Dialect,
    pub host_source: String,
    pub foreign_source: String,
    pub scalar_index: ScalarIndex,
}

impl GeneratedModule {
    /// `<module>pymodule.c`
    pub fn host_file_name(&self) -> String {
        host_file_name(&self.module)
    }

    /// `<module>_p.F90` or `<module>_p.m`
    pub fn foreign_file_name(&self) -> String {
        foreign_file_name(&self.module, self.dialect)
    }

    /// Write all artifacts into `dir`, returning the paths written.
    pub fn write_to(&self, dir: &Path) -> GenerationResult<Vec<PathBuf>> {
        let host = write_artifact(dir, &self.host_file_name(), &self.host_source)?;
        let foreign = write_artifact(dir, &self.foreign_file_name(), &self.foreign_source)?;
        let index = self.scalar_index.save(dir)?;
        Ok(vec![host, foreign, index])
    }
}

fn host_file_name(module: &str) -> String {
    format!("{module}pymodule.c")
}

fn foreign_file_name(module: &str, dialect: Dialect) -> String {
    format!("{module}_p.{}", dialect.extension())
}

fn write_artifact(dir: &Path, name: &str, text: &str) -> GenerationResult<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, text).map_err(|e| GenerationError::io(&path, e))?;
    log::debug!("wrote {}", path.display());
    Ok(path)
}

fn append_artifact(path: &Path, text: &str) -> GenerationResult<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| GenerationError::io(path, e))?;
    file.write_all(text.as_bytes())
        .map_err(|e| GenerationError::io(path, e))
}

/// Sequences classification and all emitters for one module.
pub struct ModuleAssembler<'a> {
    options: GeneratorOptions,
    types: &'a dyn TypeTable,
    externals: Vec<ScalarIndex>,
    records: &'a dyn RecordTypeEmitter,
}

impl<'a> ModuleAssembler<'a> {
    /// An assembler with the standard type table, no external scalar indexes
    /// and no record-type generator.
    pub fn new(options: GeneratorOptions) -> Self {
        Self {
            options,
            types: &StandardTypes,
            externals: Vec::new(),
            records: &NoRecordTypes,
        }
    }

    pub fn with_types(mut self, types: &'a dyn TypeTable) -> Self {
        self.types = types;
        self
    }

    /// Scalar indexes of other modules, tried in order when resolving
    /// dimension identifiers.
    pub fn with_externals(mut self, externals: Vec<ScalarIndex>) -> Self {
        self.externals = externals;
        self
    }

    pub fn with_record_emitter(mut self, records: &'a dyn RecordTypeEmitter) -> Self {
        self.records = records;
        self
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Generate all artifacts in memory.
    pub fn generate(&self, interface: InterfaceDescription) -> GenerationResult<GeneratedModule> {
        self.run(interface, None)
    }

    /// Generate all artifacts, writing each into `dir` as soon as it is
    /// complete.
    pub fn generate_to(
        &self,
        interface: InterfaceDescription,
        dir: &Path,
    ) -> GenerationResult<GeneratedModule> {
        self.run(interface, Some(dir))
    }

    /// Group module declarations only, for builds that compile the modules
    /// ahead of everything else.
    pub fn module_declarations(&self, interface: InterfaceDescription) -> GenerationResult<String> {
        let ctx = self.context(interface);
        let mut w = ForeignWriter::new(self.options.dialect);
        LinkageEmitter::new(&ctx).emit_modules(&mut w)?;
        Ok(w.finish())
    }

    fn context(&self, mut interface: InterfaceDescription) -> GenContext<'_> {
        if self.options.time_routines {
            add_timers(&mut interface);
        }
        GenContext::new(classify(interface), &self.options, self.types, &self.externals)
    }

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn run(
        &self,
        interface: InterfaceDescription,
        dir: Option<&Path>,
    ) -> GenerationResult<GeneratedModule> {
        let ctx = self.context(interface);
        let module = ctx.module().to_string();
        log::debug!("generating module {module}");

        let mut host_source = emit_host(&ctx)?;
        let host_path = match dir {
            Some(dir) => Some(write_artifact(dir, &host_file_name(&module), &host_source)?),
            None => None,
        };

        let mut record_host = HostWriter::new();
        let mut record_foreign = ForeignWriter::new(self.options.dialect);
        {
            #[cfg(feature = "profiling")]
            profiling::scope!("record types");
            self.records.emit(&ctx, &mut record_host, &mut record_foreign)?;
        }
        let record_host = record_host.finish();
        if !record_host.is_empty() {
            // The host artifact is already on disk; resume it.
            if let Some(path) = &host_path {
                append_artifact(path, &record_host)?;
            }
            host_source.push_str(&record_host);
        }

        let foreign_source = emit_foreign(&ctx, record_foreign)?;
        if let Some(dir) = dir {
            write_artifact(dir, &foreign_file_name(&module, self.options.dialect), &foreign_source)?;
        }

        let scalar_index = ScalarIndex::from_scalars(module.as_str(), &ctx.classified.scalars);
        if let Some(dir) = dir {
            scalar_index.save(dir)?;
        }
        log::debug!(
            "generated module {module}: {} scalars, {} arrays, {} routines",
            ctx.classified.scalars.len(),
            ctx.classified.arrays.len(),
            ctx.classified.routines.len()
        );

        Ok(GeneratedModule {
            module,
            dialect: self.options.dialect,
            host_source,
            foreign_source,
            scalar_index,
        })
    }
}

// ============================================================================
// Host artifact
// ============================================================================

#[cfg_attr(feature = "profiling", profiling::function)]
fn emit_host(ctx: &GenContext<'_>) -> GenerationResult<String> {
    let marshal = MarshalEmitter::new(ctx);
    let pointers = PointerEmitter::new(ctx);
    let mut w = HostWriter::new();

    log::trace!("{}: prototypes", ctx.module());
    marshal.emit_prototypes(&mut w);
    pointers.emit_prototypes(&mut w);

    log::trace!("{}: descriptor tables", ctx.module());
    pointers.emit_scalar_table(&mut w);
    pointers.emit_array_table(&mut w);

    log::trace!("{}: wrappers", ctx.module());
    {
        #[cfg(feature = "profiling")]
        profiling::scope!("wrappers");
        marshal.emit_wrappers(&mut w)?;
    }
    marshal.emit_method_table(&mut w);

    log::trace!("{}: shape setters", ctx.module());
    pointers.emit_static_dims(&mut w)?;
    pointers.emit_dynamic_dims(&mut w)?;
    pointers.emit_binders(&mut w);

    emit_module_init(ctx, &mut w);
    Ok(w.finish())
}

/// `PyInit_<module>py`: wires the tables into the package object and
/// registers it.
fn emit_module_init(ctx: &GenContext<'_>, w: &mut HostWriter) {
    let m = ctx.module();
    let obj = format!("{m}Object");

    w.line(format!("static struct PyModuleDef {m}moduledef = {{"));
    w.line("  PyModuleDef_HEAD_INIT,");
    w.line(format!("  \"{m}py\","));
    w.line("  NULL,");
    w.line("  -1,");
    w.line(format!("  {m}_methods"));
    w.line("};");
    w.blank();
    w.line("PyMODINIT_FUNC");
    w.line(format!("PyInit_{m}py(void)"));
    w.line("{");
    w.line("  PyObject *m;");
    if ctx.options.toolchain.needs_runtime_init() {
        w.line("  f90_init(0,NULL);");
    }
    w.line("  if (PyType_Ready(&ForthonType) < 0)");
    w.line("    return NULL;");
    w.line(format!("  m = PyModule_Create(&{m}moduledef);"));
    w.line("  if (m == NULL)");
    w.line("    return NULL;");
    w.line(format!("  {obj}=(ForthonObject *)PyObject_GC_New(ForthonObject, &ForthonType);"));
    w.line(format!("  {obj}->name = \"{m}\";"));
    w.line(format!("  {obj}->typename = \"{m}\";"));
    w.line(format!("  {obj}->nscalars = {m}nscalars;"));
    w.line(format!("  {obj}->fscalars = {};", ctx.package.scalar_table()));
    w.line(format!("  {obj}->narrays = {m}narrays;"));
    w.line(format!("  {obj}->farrays = {};", ctx.package.array_table()));
    w.line(format!("  {obj}->setdims = *{m}setdims;"));
    w.line(format!("  {obj}->setstaticdims = *{m}setstaticdims;"));
    w.line(format!("  {obj}->fmethods = {m}_methods;"));
    w.line(format!("  {obj}->__module__ = Py_BuildValue(\"s\",\"{m}py\");"));
    w.line(format!("  {obj}->fobj = NULL;"));
    w.line(format!("  {obj}->fobjdeallocate = NULL;"));
    w.line(format!("  {obj}->nullifycobj = NULL;"));
    w.line(format!("  {obj}->allocated = 0;"));
    w.line(format!("  {obj}->garbagecollected = 0;"));
    w.line(format!("  PyModule_AddObject(m,\"{m}\",(PyObject *){obj});"));
    w.line(format!("  ErrorObject = PyErr_NewException(\"{m}py.error\",NULL,NULL);"));
    w.line(format!("  PyModule_AddObject(m,\"{m}error\", ErrorObject);"));
    w.line(format!(
        "  PyModule_AddObject(m,\"fcompname\",PyUnicode_FromString(\"{}\"));",
        ctx.options.toolchain.name()
    ));
    w.line("  if (PyErr_Occurred()) {");
    w.line("    PyErr_Print();");
    w.line(format!("    Py_FatalError(\"can not initialize module {m}\");"));
    w.line("    }");
    w.line("  import_array();");
    w.line(format!("  Forthon_BuildDicts({obj});"));
    w.line(format!("  ForthonPackage_allotdims({obj});"));
    w.line(format!("  {}();", ctx.c_symbol("passpointers", "")));
    w.line(format!("  {}();", ctx.c_symbol("nullifypointers", "")));
    w.line(format!("  ForthonPackage_staticarrays({obj});"));
    if !ctx.options.is_free_form() {
        w.line(format!("  {}();", ctx.c_symbol("data", "")));
    }
    if ctx.options.initial_allocation {
        w.line("  {");
        w.line("  PyObject *s;");
        w.line("  s = Py_BuildValue(\"(s)\",\"*\");");
        w.line(format!("  ForthonPackage_gallot((PyObject *){obj},s);"));
        w.line("  Py_XDECREF(s);");
        w.line("  }");
    }

    w.line("  {");
    w.line("  PyObject *fm, *d, *f, *r;");
    w.line("  r = NULL;");
    w.line("  fm = PyImport_ImportModule(\"Forthon\");");
    w.line("  if (fm != NULL) {");
    w.line("    d = PyModule_GetDict(fm);");
    w.line("    if (d != NULL) {");
    w.line("      f = PyDict_GetItemString(d,\"registerpackage\");");
    w.line("      if (f != NULL) {");
    w.line(format!(
        "        r = PyObject_CallFunction(f,\"Os\",(PyObject *){obj},\"{m}\");"
    ));
    w.line("  }}}");
    w.line("  if (NULL == r) {");
    w.line("    if (PyErr_Occurred()) PyErr_Print();");
    w.line(format!(
        "    Py_FatalError(\"unable to find a compatible Forthon module in which to register module {m}\");"
    ));
    w.line("  }");
    w.line("  Py_XDECREF(fm);");
    w.line("  Py_XDECREF(r);");
    w.line("  }");
    w.line("  return m;");
    w.line("}");
}

// ============================================================================
// Foreign artifact
// ============================================================================

/// Record-type code, group modules, then linkage. Modules come first in the
/// file because the linkage subroutines `USE` them.
#[cfg_attr(feature = "profiling", profiling::function)]
fn emit_foreign(ctx: &GenContext<'_>, records: ForeignWriter) -> GenerationResult<String> {
    let linkage = LinkageEmitter::new(ctx);

    log::trace!("{}: foreign linkage", ctx.module());
    let mut subroutines = ForeignWriter::new(ctx.options.dialect);
    linkage.emit_linkage(&mut subroutines)?;

    let mut w = ForeignWriter::append_to(ctx.options.dialect, records.finish());
    if ctx.options.write_modules {
        log::trace!("{}: group modules", ctx.module());
        linkage.emit_modules(&mut w)?;
    }
    let mut text = w.finish();
    text.push_str(subroutines.as_str());
    Ok(text)
}
