//! Marshaling emitter: prototypes, call wrappers and the method table.
//!
//! Every exported routine gets one C wrapper. At call time the wrapper
//!
//! 1. converts each positional argument into a typed buffer (or a string
//!    descriptor, or checks a record's type tag),
//! 2. validates ranks and extents once *all* buffers exist, since a later
//!    argument may size an earlier one,
//! 3. sets a recovery point so a fault inside the foreign routine lands on
//!    the same error path,
//! 4. calls the routine, copies temporaries back and builds the result.
//!
//! Every failure goes through a single `err:` label that raises one host
//! exception naming the routine and the 1-based argument.
//!
//! [`validate`] holds a Rust model of steps 1 and 2 plus the recovery point.

pub mod validate;

use fstubgen_core::{
    Argument, CallError, CallErrorKind, GenerationResult, Routine, RoutineKind, VarType,
};

use crate::context::GenContext;
use crate::dims::{Token, tokenize};
use crate::emit::{HostWriter, escape_c};

pub use validate::{Buffer, CallValidator, HostArg};

/// Whether dimension checks apply to an argument.
fn is_checked(arg: &Argument) -> bool {
    !arg.dims.is_empty() && !arg.ty.is_record() && !arg.ty.is_character()
}

/// Whether an argument's value can size another argument.
fn is_sizing(arg: &Argument) -> bool {
    arg.ty.is_numeric() && arg.ty != VarType::Complex
}

/// Arguments whose values appear in other arguments' bounds, in order of
/// first use, without duplicates.
pub fn dimension_arguments(routine: &Routine) -> Vec<&Argument> {
    let mut found: Vec<&Argument> = Vec::new();
    for arg in routine.args.iter().filter(|a| is_checked(a)) {
        for dim in &arg.dims {
            for token in tokenize(&dim.low).into_iter().chain(tokenize(&dim.high)) {
                let Token::Ident(name) = token else { continue };
                if let Some(sizing) = routine.find_arg(name)
                    && is_sizing(sizing)
                    && !found.iter().any(|f| f.position == sizing.position)
                {
                    found.push(sizing);
                }
            }
        }
    }
    found
}

/// C local holding the value of a sizing argument.
fn dimension_local(name: &str) -> String {
    format!("{}__", name.to_ascii_lowercase())
}

/// Emits prototypes, wrappers and the method table of one module.
pub struct MarshalEmitter<'c, 'a> {
    ctx: &'c GenContext<'a>,
}

impl<'c, 'a> MarshalEmitter<'c, 'a> {
    pub fn new(ctx: &'c GenContext<'a>) -> Self {
        Self { ctx }
    }

    // ==========================================================================
    // Prototypes
    // ==========================================================================

    /// File header and prototypes of every foreign routine and record
    /// constructor.
    pub fn emit_prototypes(&self, w: &mut HostWriter) {
        let ctx = self.ctx;
        let m = ctx.module();
        w.line(format!("/* {m}pymodule.c: generated by fstubgen, do not edit."));
        w.line(" * The descriptor tables and wrappers in this file are not reentrant:");
        w.line(" * calling two wrappers that share descriptor state concurrently is undefined. */");
        w.line("#include \"Forthon.h\"");
        w.line("#include <setjmp.h>");
        w.line(format!("ForthonObject *{m}Object;"));
        w.line("extern jmp_buf stackenvironment;");
        w.line(format!("extern void {}(void);", ctx.c_symbol("passpointers", "")));
        w.line(format!("extern void {}(void);", ctx.c_symbol("nullifypointers", "")));
        if !ctx.options.is_free_form() {
            w.line(format!("extern void {}(void);", ctx.c_symbol("data", "")));
        }

        for f in &ctx.classified.routines {
            w.line(format!("extern {};", self.prototype(f)));
        }
        for t in &ctx.classified.record_types {
            w.line(format!(
                "extern PyObject *{}New(PyObject *self, PyObject *args);",
                ctx.wrapper(&t.name)
            ));
        }
        w.blank();
    }

    /// C declaration of a foreign routine.
    fn prototype(&self, f: &Routine) -> String {
        let types = self.ctx.types;
        let result = f
            .result
            .as_ref()
            .map_or_else(|| "void".to_string(), |ty| types.c_type(ty));
        let mut params: Vec<String> = f
            .args
            .iter()
            .map(|a| {
                let c_type = types.c_type(&a.ty);
                if a.ty.is_character() {
                    format!("{c_type} {}", a.name)
                } else {
                    format!("{c_type} *{}", a.name)
                }
            })
            .collect();
        if self.ctx.options.string_lengths_at_end {
            params.extend((0..f.string_arg_count()).map(|k| format!("int sl{k}")));
        }
        if params.is_empty() {
            params.push("void".to_string());
        }
        format!("{result} {}({})", self.ctx.routine_symbol(f), params.join(","))
    }

    // ==========================================================================
    // Wrappers
    // ==========================================================================

    /// One wrapper per routine.
    pub fn emit_wrappers(&self, w: &mut HostWriter) -> GenerationResult<()> {
        for f in &self.ctx.classified.routines {
            self.emit_wrapper(f, w)?;
        }
        w.blank();
        Ok(())
    }

    fn error_line(&self, w: &mut HostWriter, indent: &str, error: CallError) {
        w.line(format!("{indent}sprintf(e,\"{}\");", escape_c(&error.message())));
        w.line(format!("{indent}goto err;}}"));
    }

    /// Emit the wrapper of one routine.
    pub fn emit_wrapper(&self, f: &Routine, w: &mut HostWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let name = ctx.wrapper(&f.name);
        let n = f.args.len();
        let timer = if ctx.options.time_routines {
            let slot = ctx.classified.scalar_index(&format!("{}runtime", f.name));
            if slot.is_none() {
                log::warn!("{} has no {}runtime scalar; not timing it", f.name, f.name);
            }
            slot
        } else {
            None
        };

        let doc = format!("{}{}{}", f.name, f.dimstring, f.comment);
        w.line(format!("static char doc_{name}[] = \"{}\";", escape_c(&doc)));
        w.line("static PyObject *");
        w.line(format!("{name}(PyObject *self, PyObject *args)"));
        w.line("{");

        // Declarations.
        if n > 0 {
            w.line(format!("  PyObject * pyobj[{n}];"));
            w.line(format!("  PyArrayObject * ax[{n}];"));
            w.line("  int i;");
        }
        w.line("  int argno=0;");
        w.line("  char e[256];");
        if timer.is_some() {
            w.line("  double time1,time2;");
        }
        let strings = f.string_arg_count();
        if strings > 0 {
            w.line(format!("  FSTRING fstr[{strings}];"));
        }
        if let Some(ty) = &f.result {
            w.line("  PyObject * ret_val;");
            w.line(format!("  {} r;", ctx.types.c_type(ty)));
        }

        if timer.is_some() {
            w.line("  time1 = cputime();");
        }
        if n > 0 {
            w.line(format!("  for (i=0;i<{n};i++) ax[i] = NULL;"));
        }
        let targets: String = (0..n).map(|i| format!(",&pyobj[{i}]")).collect();
        w.line(format!(
            "  if (!PyArg_ParseTuple(args, \"{}\"{targets})) return NULL;",
            "O".repeat(n)
        ));

        self.emit_conversions(f, w);
        self.emit_shape_checks(f, w)?;

        w.line("  if (setjmp(stackenvironment)) {");
        w.line(format!(
            "    sprintf(e,\"Argument %d in {} has the wrong type\",argno);",
            escape_c(&f.name)
        ));
        w.line("    goto err;}");

        self.emit_call(f, w);

        if n > 0 {
            w.line(format!("  Forthon_restoresubroutineargs({n},pyobj,ax);"));
        }
        if let Some(slot) = timer {
            w.line("  time2 = cputime();");
            w.line(format!(
                "  *(double *){}[{slot}].data += (time2-time1);",
                ctx.package.scalar_table()
            ));
        }
        match &f.result {
            None => w.line("  returnnone;"),
            Some(ty) => {
                let format = ctx.types.build_format(ty);
                // Py_BuildValue takes complex values by address.
                let value = if format == "D" { "&r" } else { "r" };
                w.line(format!("  ret_val = Py_BuildValue(\"{format}\", {value});"));
                w.line("  return ret_val;");
            }
        }

        w.line("err:");
        w.line("  if (!PyErr_Occurred())");
        w.line("    PyErr_SetString(ErrorObject,e);");
        if n > 0 {
            w.line(format!("  for (i=0;i<{n};i++)"));
            w.line("    if (ax[i] != NULL) {Py_XDECREF(ax[i]);}");
        }
        w.line("  return NULL;");
        w.line("}");
        Ok(())
    }

    /// Phase 1: turn every argument into a buffer, descriptor or checked
    /// record handle.
    fn emit_conversions(&self, f: &Routine, w: &mut HostWriter) {
        let ctx = self.ctx;
        let mut string = 0;
        for (i, a) in f.args.iter().enumerate() {
            let k = i + 1;
            w.line("  argno++;");
            if let VarType::Record(type_name) = &a.ty {
                w.line("  {");
                w.line(format!("  PyObject *t = PyObject_Type(pyobj[{i}]);"));
                w.line("  int isforthon = strcmp(((PyTypeObject *)t)->tp_name,\"Forthon\") == 0;");
                w.line("  Py_XDECREF(t);");
                w.line(format!(
                    "  if (!isforthon || strcmp(((ForthonObject *)pyobj[{i}])->typename,\"{type_name}\") != 0) {{"
                ));
                self.error_line(w, "    ", CallError::new(&f.name, k, CallErrorKind::WrongType));
                w.line("  }");
                continue;
            }

            let code = ctx.types.array_type(&a.ty);
            w.line(format!("  if (!Forthon_checksubroutineargtype(pyobj[{i}],{code})) {{"));
            self.error_line(w, "    ", CallError::new(&f.name, k, CallErrorKind::WrongType));
            match f.kind {
                RoutineKind::Fortran => {
                    w.line(format!("  ax[{i}] = FARRAY_FROMOBJECT(pyobj[{i}], {code});"));
                }
                RoutineKind::C => {
                    w.line(format!(
                        "  ax[{i}] = (PyArrayObject *)PyArray_ContiguousFromObject(pyobj[{i}], {code},0,0);"
                    ));
                }
            }
            w.line(format!("  if (ax[{i}] == NULL) {{"));
            self.error_line(w, "    ", CallError::new(&f.name, k, CallErrorKind::Conversion));
            if a.ty.is_character() {
                w.line(format!(
                    "  FSETSTRING(fstr[{string}],PyArray_BYTES(ax[{i}]),PyArray_SIZE(ax[{i}]));"
                ));
                string += 1;
            }
        }
    }

    /// Phase 2: rank and extent checks, after every buffer exists.
    fn emit_shape_checks(&self, f: &Routine, w: &mut HostWriter) -> GenerationResult<()> {
        if !f.args.iter().any(is_checked) {
            return Ok(());
        }
        let ctx = self.ctx;
        let dims = ctx.dims();
        let sizing = dimension_arguments(f);
        let bound = |name: &str| {
            sizing
                .iter()
                .any(|a| a.name.eq_ignore_ascii_case(name))
                .then(|| dimension_local(name))
        };

        w.line("  {");
        w.line("  int _n;");
        for a in &sizing {
            let c_type = ctx.types.c_type(&a.ty);
            w.line(format!(
                "  {c_type} {} = *({c_type} *)(PyArray_BYTES(ax[{}]));",
                dimension_local(&a.name),
                a.position
            ));
        }

        for (i, a) in f.args.iter().enumerate().filter(|(_, a)| is_checked(a)) {
            let k = i + 1;
            let rank = a.rank();
            w.line(format!("  argno = {k};"));
            // A bare value is accepted where one dimension is declared.
            if rank == 1 {
                w.line(format!(
                    "  if (!(PyArray_NDIM(ax[{i}]) == 1 || PyArray_NDIM(ax[{i}]) == 0)) {{"
                ));
            } else {
                w.line(format!("  if (!(PyArray_NDIM(ax[{i}]) == {rank})) {{"));
            }
            self.error_line(w, "    ", CallError::new(&f.name, k, CallErrorKind::WrongRank));

            let known: Vec<_> = a.dims.iter().filter(|d| !d.is_assumed()).cloned().collect();
            if known.is_empty() {
                continue;
            }
            // Empty arrays may come back with any layout; skip their extents.
            w.line(format!("  if ({}) {{", dims.nonzero_guard(&known, &bound)?));
            for (j, dim) in a.dims.iter().enumerate() {
                if dim.is_assumed() {
                    continue;
                }
                w.line(format!("    _n = (int){};", dims.extent(dim, &bound)?));
                if rank == 1 {
                    w.line(format!(
                        "    if (!(PyArray_NDIM(ax[{i}]) == 0 || _n == (int)(PyArray_DIMS(ax[{i}])[0]))) {{"
                    ));
                } else {
                    w.line(format!("    if (!(_n == (int)(PyArray_DIMS(ax[{i}])[{j}]))) {{"));
                }
                self.error_line(
                    w,
                    "      ",
                    CallError::new(&f.name, k, CallErrorKind::WrongDimension { dimension: j + 1 }),
                );
            }
            w.line("  }");
        }
        w.line("  }");
        Ok(())
    }

    /// The foreign call itself.
    fn emit_call(&self, f: &Routine, w: &mut HostWriter) {
        let ctx = self.ctx;
        let mut string = 0;
        let mut args: Vec<String> = f
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| {
                if a.ty.is_record() {
                    format!("((ForthonObject *)(pyobj[{i}]))->fobj")
                } else if a.ty.is_character() {
                    string += 1;
                    format!("fstr[{}]", string - 1)
                } else {
                    format!("({} *)(PyArray_BYTES(ax[{i}]))", ctx.types.c_type(&a.ty))
                }
            })
            .collect();
        if ctx.options.string_lengths_at_end {
            args.extend(
                f.args
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.ty.is_character())
                    .map(|(i, _)| format!("PyArray_SIZE(ax[{i}])")),
            );
        }
        let assign = if f.result.is_some() { "r = " } else { "" };
        w.line(format!(
            "  {assign}{}({});",
            ctx.routine_symbol(f),
            args.join(",")
        ));
    }

    // ==========================================================================
    // Method table
    // ==========================================================================

    /// The routine lookup table, including record constructors.
    pub fn emit_method_table(&self, w: &mut HostWriter) {
        let ctx = self.ctx;
        w.line(format!("static struct PyMethodDef {}_methods[] = {{", ctx.module()));
        for f in &ctx.classified.routines {
            let name = ctx.wrapper(&f.name);
            w.line(format!(
                "{{\"{}\",(PyCFunction){name},METH_VARARGS,doc_{name}}},",
                f.name
            ));
        }
        for t in &ctx.classified.record_types {
            w.line(format!(
                "{{\"{0}\",(PyCFunction){1}New,METH_VARARGS,\"Creates a new instance of fortran derived type {0}\"}},",
                t.name,
                ctx.wrapper(&t.name)
            ));
        }
        w.line("{NULL,NULL}};");
        w.blank();
    }
}
