//! Foreign-side linkage.
//!
//! The foreign half of the pointer protocol: `passpointers` hands the address
//! of every static variable to the C binders, `nullifypointers` puts every
//! dynamic pointer into a known state, and (free form only) each dynamic
//! variable gets a `setpointer` binder plus, where needed, a `getpointer`.
//! Fixed-form output instead carries a `data` subroutine with the literal
//! initializers. Group module declarations are emitted separately by
//! [`LinkageEmitter::emit_modules`].

use fstubgen_core::{Dialect, GenerationResult, VarType, Variable};
use rustc_hash::FxHashSet;

use crate::context::GenContext;
use crate::dims::foreign_form;
use crate::emit::ForeignWriter;
use crate::pointers::initializer_value;

/// Emits the foreign linkage source of one module.
pub struct LinkageEmitter<'c, 'a> {
    ctx: &'c GenContext<'a>,
}

impl<'c, 'a> LinkageEmitter<'c, 'a> {
    pub fn new(ctx: &'c GenContext<'a>) -> Self {
        Self { ctx }
    }

    fn kind(&self) -> u8 {
        self.ctx.options.index_kind
    }

    /// `USE` every group. Fixed form uses the `Use(g)` macro, indented by
    /// `indent` columns.
    fn use_all_groups(&self, w: &mut ForeignWriter, indent: usize) -> GenerationResult<()> {
        for group in self.ctx.classified.group_names() {
            match self.ctx.options.dialect {
                Dialect::Free => w.line(format!("  USE {group}"))?,
                Dialect::Fixed => w.macro_line(format!("{:indent$}Use({group})", ""))?,
            }
        }
        Ok(())
    }

    /// Pass-down, nullification and the per-variable binders (free form) or
    /// the data subroutine (fixed form).
    pub fn emit_linkage(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        self.emit_passpointers(w)?;
        self.emit_nullify(w)?;
        match self.ctx.options.dialect {
            Dialect::Free => self.emit_binders(w),
            Dialect::Fixed => self.emit_data(w),
        }
    }

    fn emit_passpointers(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let one = ctx.options.index_literal(1);
        let zero = ctx.options.index_literal(0);
        w.line(format!("SUBROUTINE {}()", ctx.foreign_symbol("passpointers", "")))?;
        self.use_all_groups(w, 2)?;

        for (i, s) in ctx.classified.scalars.iter().enumerate() {
            if s.is_dynamic() {
                continue;
            }
            let index = ctx.index(i);
            let name = &s.name;
            if let VarType::Record(type_name) = &s.ty {
                // Static instances are never deallocated.
                w.line(format!(
                    "  call init{type_name}py({index},{name},{name}%cobj__,{one},{zero})"
                ))?;
                w.line(format!(
                    "  call {}({index},{name}%cobj__)",
                    ctx.foreign_symbol("setderivedtypepointers", "")
                ))?;
            } else {
                w.line(format!(
                    "  call {}({index},{name})",
                    ctx.foreign_symbol("setscalarpointers", "")
                ))?;
            }
        }

        let setarray = ctx.foreign_symbol("setarraypointers", "");
        for (i, a) in ctx.classified.arrays.iter().enumerate() {
            let index = ctx.index(i);
            match (a.is_dynamic(), ctx.options.dialect) {
                // Free-form dynamic arrays bind through their own setpointer.
                (true, Dialect::Free) => {}
                (true, Dialect::Fixed) => w.line(format!("  call {setarray}({index},p{})", a.name))?,
                (false, _) => w.line(format!("  call {setarray}({index},{})", a.name))?,
            }
        }
        w.line("  return")?;
        w.line("end")
    }

    fn emit_nullify(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        w.line(format!("SUBROUTINE {}()", ctx.foreign_symbol("nullifypointers", "")))?;
        self.use_all_groups(w, 2)?;
        let dynamic = ctx
            .classified
            .scalars
            .iter()
            .chain(&ctx.classified.arrays)
            .filter(|v| v.is_dynamic());
        for v in dynamic {
            w.line(format!("  NULLIFY({})", v.name))?;
        }
        w.line("  return")?;
        w.line("end")
    }

    // ==========================================================================
    // Free-form binders
    // ==========================================================================

    fn emit_binders(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        for s in &self.ctx.classified.scalars {
            if s.is_dynamic() || s.is_record() {
                self.emit_scalar_setpointer(s, w)?;
            }
            if s.is_dynamic() && s.is_record() {
                self.emit_scalar_getpointer(s, w)?;
            }
        }
        for a in &self.ctx.classified.arrays {
            if !a.is_dynamic() {
                continue;
            }
            self.emit_array_setpointer(a, w)?;
            if a.is_fassign() {
                self.emit_array_getpointer(a, w)?;
            }
        }
        Ok(())
    }

    fn emit_scalar_setpointer(&self, s: &Variable, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        w.line(format!("SUBROUTINE {}(p__,cobj__)", ctx.foreign_symbol("setpointer", &s.name)))?;
        w.line(format!("  USE {}", s.group))?;
        w.line(format!("  integer({}):: cobj__", self.kind()))?;
        w.line(format!("  {},target::p__", ctx.types.foreign_type(&s.ty)))?;
        if s.is_dynamic() {
            w.line(format!("  {} => p__", s.name))?;
        } else {
            w.line(format!("  {} = p__", s.name))?;
        }
        w.line("  RETURN")?;
        w.line("END")
    }

    fn emit_scalar_getpointer(&self, s: &Variable, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let k = self.kind();
        let name = &s.name;
        let minus_one = ctx.options.index_literal(-1);
        let zero = ctx.options.index_literal(0);
        w.line(format!(
            "SUBROUTINE {}(cobj__,obj__,createnew__)",
            ctx.foreign_symbol("getpointer", name)
        ))?;
        w.line(format!("  USE {}", s.group))?;
        w.line(format!("  integer({k}):: cobj__,obj__,createnew__"))?;
        w.line(format!("  if (ASSOCIATED({name})) then"))?;
        w.line(format!("    if ({name}%cobj__ == 0 .and. createnew__ == 1) then"))?;
        w.line(format!(
            "      call init{}py({minus_one},{name},{name}%cobj__,{zero},{zero})",
            s.ty.tag()
        ))?;
        w.line("    endif")?;
        w.line(format!("    cobj__ = {name}%cobj__"))?;
        w.line("  else")?;
        w.line("    cobj__ = 0")?;
        w.line("  endif")?;
        w.line("  RETURN")?;
        w.line("END")
    }

    fn emit_array_setpointer(&self, a: &Variable, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let k = self.kind();
        w.line(format!(
            "SUBROUTINE {}(p__,cobj__,dims__)",
            ctx.foreign_symbol("setpointer", &a.name)
        ))?;
        // Groups of the scalars named in the shape must be in scope.
        for group in ctx.dims().referenced_groups(&a.dimstring)? {
            if group != a.group {
                w.line(format!("  USE {group}"))?;
            }
        }
        w.line(format!("  USE {}", a.group))?;
        w.line(format!("  integer({k}):: cobj__"))?;
        w.line(format!("  integer({k}):: dims__({})", a.rank()))?;
        w.line(format!(
            "  {},target::p__{}",
            ctx.types.foreign_type(&a.ty),
            foreign_form(&a.dimstring)
        ))?;
        w.line(format!("  {} => p__", a.name))?;
        w.line("  return")?;
        w.line("end")
    }

    fn emit_array_getpointer(&self, a: &Variable, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let k = self.kind();
        let name = &a.name;
        w.line(format!("SUBROUTINE {}(i__,obj__)", ctx.foreign_symbol("getpointer", name)))?;
        w.line(format!("  USE {}", a.group))?;
        w.line(format!("  integer({k}):: i__,obj__"))?;
        w.line(format!("  integer({k}):: ss({})", a.rank()))?;
        w.line(format!("  if (.not. associated({name})) return"))?;
        w.line(format!(
            "  call {}(i__,{name})",
            ctx.foreign_symbol("setarraypointersobj", "")
        ))?;
        w.line(format!("  ss = shape({name})"))?;
        w.line(format!("  call {}(i__,ss)", ctx.foreign_symbol("setarraydims", "")))?;
        w.line("  return")?;
        w.line("end")
    }

    // ==========================================================================
    // Fixed-form data
    // ==========================================================================

    fn emit_data(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        w.line(format!("SUBROUTINE {}()", ctx.foreign_symbol("data", "")))?;
        // Macro lines start in column 1 here.
        self.use_all_groups(w, 0)?;
        w.line("integer idata__")?;
        let initialized = ctx
            .classified
            .scalars
            .iter()
            .chain(ctx.classified.arrays.iter().filter(|a| !a.is_dynamic()));
        for v in initialized {
            if let Some(data) = &v.data {
                w.line(format!("data {}{}", v.name, data.replace('\n', " ")))?;
            }
        }
        w.line("idata__=0")?;
        w.line("return")?;
        w.line("end")
    }

    // ==========================================================================
    // Modules
    // ==========================================================================

    /// One module per group, visible groups first. Only free-form source
    /// declares modules; fixed-form groups come from `Use` macros.
    pub fn emit_modules(&self, w: &mut ForeignWriter) -> GenerationResult<()> {
        if !self.ctx.options.is_free_form() {
            log::debug!("{}: fixed form declares no modules", self.ctx.module());
            return Ok(());
        }
        for group in self.ctx.classified.group_names() {
            self.emit_module(group, w)?;
        }
        Ok(())
    }

    fn emit_module(&self, group: &str, w: &mut ForeignWriter) -> GenerationResult<()> {
        let ctx = self.ctx;
        let save = ctx.options.toolchain.save_attribute();
        w.line(format!("MODULE {group}"))?;

        let mut used = FxHashSet::default();
        for v in ctx.classified.variables_in(group) {
            if let VarType::Record(type_name) = &v.ty
                && used.insert(type_name.clone())
            {
                w.line(format!("  USE {type_name}module"))?;
            }
        }
        // Static shapes may name scalars of other groups.
        let dims = ctx.dims();
        let mut shape_groups: Vec<String> = Vec::new();
        for a in ctx.classified.variables_in(group) {
            if a.is_scalar() || a.is_dynamic() {
                continue;
            }
            for g in dims.referenced_groups(&a.dimstring)? {
                if g != group && !shape_groups.contains(&g) {
                    shape_groups.push(g);
                }
            }
        }
        for g in &shape_groups {
            w.line(format!("  USE {g}"))?;
        }
        w.line("  SAVE")?;

        // Scalars before arrays, each in declaration order.
        let (scalars, arrays): (Vec<&Variable>, Vec<&Variable>) =
            ctx.classified.variables_in(group).partition(|v| v.is_scalar());
        for s in scalars {
            let pointer = if s.is_dynamic() { ",POINTER" } else { "" };
            let init = s
                .data
                .as_deref()
                .map(|d| format!("={}", initializer_value(d)))
                .unwrap_or_default();
            w.line(format!(
                "  {}{pointer}{save}::{}{init}",
                ctx.types.foreign_type(&s.ty),
                s.name
            ))?;
        }
        for a in arrays {
            let declared = match (&a.ty, a.dims.first()) {
                (VarType::Character, Some(len)) => format!("character(len={})", len.high),
                _ => ctx.types.foreign_type(&a.ty),
            };
            if a.is_dynamic() {
                // Character arrays spend their first dimension on the length.
                let rank = if a.ty.is_character() { a.rank() - 1 } else { a.rank() };
                let shape = if rank > 0 {
                    format!("({})", vec![":"; rank].join(","))
                } else {
                    String::new()
                };
                w.line(format!("  {declared},pointer{save}::{}{shape}", a.name))?;
            } else {
                w.line(format!("  {declared}{save}::{}{}", a.name, a.dimstring))?;
                if let Some(data) = &a.data {
                    w.line(format!("  data {}{}", a.name, data.replace('\n', " ")))?;
                }
            }
        }
        w.line(format!("END MODULE {group}"))
    }
}
