//! Pointer protocol: descriptor tables, shape setters and binders.
//!
//! ## Layout
//!
//! [`layout`] builds the module's [`Package`] from the classified variables.
//! Scalars and arrays keep their declaration order, so a variable's table
//! index is its position in [`Classified`]. This happens before any code is
//! emitted, which is what lets a shape setter refer to a scalar by index.
//!
//! ## Emitted C
//!
//! - the scalar and array tables (`<m>_fscalars`, `<m>_farrays`), preceded by
//!   `extern` declarations of the external modules' scalar tables
//! - `<m>setstaticdims`, storing the shape of every static array once
//! - one `<m>setdims<group>` per group owning dynamic arrays, plus the
//!   `<m>setdims` dispatcher
//! - the binder entry points called from the foreign side
//!
//! Shapes are stored in host axis order, the reverse of the foreign
//! declaration.

use fstubgen_core::{
    ArrayDescriptor, GenerationResult, GeneratorOptions, NameMangler, Package, ScalarDescriptor,
    TypeTable, Variable,
};

use crate::classify::Classified;
use crate::context::{GenContext, c_symbol};
use crate::emit::{HostWriter, escape_c};

/// Lay out the descriptor tables of a module.
pub fn layout(
    classified: &Classified,
    options: &GeneratorOptions,
    types: &dyn TypeTable,
    mangler: &NameMangler,
) -> Package {
    let free = options.is_free_form();
    let symbol = |prefix: &str, v: &Variable| c_symbol(options, mangler, prefix, &v.name);
    let mut package = Package::new(classified.module.clone());

    for s in &classified.scalars {
        package.push_scalar(ScalarDescriptor {
            type_code: types.array_type(&s.ty).to_string(),
            type_name: s.ty.tag().to_string(),
            name: s.name.clone(),
            group: s.group.clone(),
            attributes: s.attributes.clone(),
            comment: s.comment.clone(),
            dynamic: s.is_dynamic(),
            setter: (free && (s.is_dynamic() || s.is_record())).then(|| symbol("setpointer", s)),
            getter: (free && s.is_dynamic() && s.is_record()).then(|| symbol("getpointer", s)),
            data: None,
        });
    }

    for a in &classified.arrays {
        let initial_value = match &a.data {
            Some(data) if a.is_dynamic() => initializer_value(data).to_string(),
            _ => "0".to_string(),
        };
        package.push_array(ArrayDescriptor {
            type_code: types.array_type(&a.ty).to_string(),
            name: a.name.clone(),
            group: a.group.clone(),
            attributes: a.attributes.clone(),
            comment: a.comment.clone(),
            dimstring: a.dimstring.clone(),
            dynamic: a.is_dynamic(),
            rank: a.rank(),
            shape: Vec::new(),
            setter: (free && a.is_dynamic()).then(|| symbol("setpointer", a)),
            getter: (free && a.is_dynamic() && a.is_fassign()).then(|| symbol("getpointer", a)),
            initial_value,
            data: None,
        });
    }

    log::debug!(
        "laid out {}: {} scalar slots, {} array slots",
        package.module,
        package.scalars().len(),
        package.arrays().len()
    );
    package
}

/// A literal initializer without its delimiters: `/1.5/` → `1.5`.
pub(crate) fn initializer_value(data: &str) -> &str {
    let data = data.trim();
    let mut chars = data.chars();
    match (chars.next(), chars.next_back()) {
        (Some(_), Some(_)) => chars.as_str().trim(),
        _ => data,
    }
}

fn symbol_ref(symbol: &Option<String>) -> String {
    symbol
        .as_ref()
        .map_or_else(|| "NULL".to_string(), |s| format!("*{s}"))
}

/// Emits the pointer protocol of one module.
pub struct PointerEmitter<'c, 'a> {
    ctx: &'c GenContext<'a>,
}

impl<'c, 'a> PointerEmitter<'c, 'a> {
    pub fn new(ctx: &'c GenContext<'a>) -> Self {
        Self { ctx }
    }

    // ==========================================================================
    // Prototypes
    // ==========================================================================

    /// Prototypes of the per-variable foreign binders referenced by the tables.
    pub fn emit_prototypes(&self, w: &mut HostWriter) {
        let pkg = &self.ctx.package;
        for s in pkg.scalars() {
            if let Some(setter) = &s.setter {
                w.line(format!("extern void {setter}(char *p,long *cobj__);"));
            }
            if let Some(getter) = &s.getter {
                w.line(format!(
                    "extern void {getter}(ForthonObject **cobj__,long *obj,long *createnew);"
                ));
            }
        }
        for a in pkg.arrays() {
            if let Some(setter) = &a.setter {
                w.line(format!("extern void {setter}(char *p,long *cobj__,npy_intp *dims__);"));
            }
            if let Some(getter) = &a.getter {
                w.line(format!("extern void {getter}(long *i,long *cobj__);"));
            }
        }
    }

    // ==========================================================================
    // Tables
    // ==========================================================================

    /// The scalar table, after `extern` declarations of external tables.
    pub fn emit_scalar_table(&self, w: &mut HostWriter) {
        let pkg = &self.ctx.package;
        for external in self.ctx.externals {
            w.line(format!("extern Fortranscalar {}[];", external.table_name()));
        }

        let m = self.ctx.module();
        let table = pkg.scalar_table();
        let scalars = pkg.scalars();
        w.line(format!("int {m}nscalars = {};", scalars.len()));
        if scalars.is_empty() {
            w.line(format!("Fortranscalar *{table}=NULL;"));
            return;
        }
        w.line(format!("Fortranscalar {table}[{}]={{", scalars.len()));
        let rows: Vec<String> = scalars
            .iter()
            .map(|s| {
                format!(
                    "{{{},\"{}\",\"{}\",NULL,\"{}\",\"{}\",\"{}\",{},{},{}}}",
                    s.type_code,
                    s.type_name,
                    s.name,
                    s.group,
                    escape_c(&s.attributes),
                    escape_c(&s.comment),
                    i32::from(s.dynamic),
                    symbol_ref(&s.setter),
                    symbol_ref(&s.getter),
                )
            })
            .collect();
        w.line(rows.join(",\n"));
        w.line("};");
    }

    /// The array table.
    pub fn emit_array_table(&self, w: &mut HostWriter) {
        let pkg = &self.ctx.package;
        let m = self.ctx.module();
        let table = pkg.array_table();
        let arrays = pkg.arrays();
        w.line(format!("int {m}narrays = {};", arrays.len()));
        if arrays.is_empty() {
            w.line(format!("static Fortranarray *{table}=NULL;"));
            return;
        }
        w.line(format!("static Fortranarray {table}[{}]={{", arrays.len()));
        let rows: Vec<String> = arrays
            .iter()
            .map(|a| {
                format!(
                    "{{{},{},{},NULL,\"{}\",{{NULL}},{},{},{},NULL,\"{}\",\"{}\",\"{}\",\"{}\"}}",
                    a.type_code,
                    i32::from(a.dynamic),
                    a.rank,
                    a.name,
                    symbol_ref(&a.setter),
                    symbol_ref(&a.getter),
                    a.initial_value,
                    a.group,
                    escape_c(&a.attributes),
                    escape_c(&a.comment),
                    escape_c(&a.dimstring),
                )
            })
            .collect();
        w.line(rows.join(",\n"));
        w.line("};");
    }

    // ==========================================================================
    // Shape setters
    // ==========================================================================

    /// Lines storing the extents of array `index`, skipping assumed extents.
    fn dimension_lines(&self, index: usize, array: &Variable, indent: &str) -> GenerationResult<Vec<String>> {
        let dims = self.ctx.dims();
        let table = self.ctx.package.array_table();
        let rank = array.rank();
        let mut lines = Vec::with_capacity(rank);
        for (j, dim) in array.dims.iter().enumerate() {
            if dim.is_assumed() {
                continue;
            }
            lines.push(format!(
                "{indent}{table}[{index}].dimensions[{}] = (npy_intp){};",
                rank - 1 - j,
                dims.extent(dim, &|_| None)?
            ));
        }
        Ok(lines)
    }

    /// `<m>setstaticdims`.
    pub fn emit_static_dims(&self, w: &mut HostWriter) -> GenerationResult<()> {
        let m = self.ctx.module();
        w.line(format!("void {m}setstaticdims(ForthonObject *self)"));
        w.line("{");
        for (i, a) in self.ctx.classified.arrays.iter().enumerate() {
            if a.is_dynamic() {
                continue;
            }
            for line in self.dimension_lines(i, a, "  ")? {
                w.line(line);
            }
        }
        w.line("}");
        w.blank();
        Ok(())
    }

    /// Dynamic arrays grouped by owning group, in first-appearance order.
    fn dynamic_groups(&self) -> Vec<(&'c str, Vec<usize>)> {
        let ctx: &'c GenContext<'a> = self.ctx;
        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for (i, a) in ctx.classified.arrays.iter().enumerate() {
            if !a.is_dynamic() {
                continue;
            }
            match groups.iter_mut().find(|(g, _)| *g == a.group) {
                Some((_, members)) => members.push(i),
                None => groups.push((a.group.as_str(), vec![i])),
            }
        }
        groups
    }

    /// One `<m>setdims<group>` per group with dynamic arrays, then the
    /// `<m>setdims` dispatcher.
    ///
    /// A group setter acts when `name` is its group or `"*"`, and for the
    /// array whose index is `i`, or for all of them when `i` is -1.
    pub fn emit_dynamic_dims(&self, w: &mut HostWriter) -> GenerationResult<()> {
        let m = self.ctx.module();
        let groups = self.dynamic_groups();
        for (group, members) in &groups {
            w.line(format!("static void {m}setdims{group}(char *name,long i)"));
            w.line("{");
            w.line(format!(
                "  if (strcmp(name,\"{group}\") == 0 || strcmp(name,\"*\") == 0) {{"
            ));
            for &i in members {
                let a = &self.ctx.classified.arrays[i];
                w.line(format!("  if (i == -1 || i == {i}) {{"));
                for line in self.dimension_lines(i, a, "    ")? {
                    w.line(line);
                }
                w.line("  }");
            }
            w.line("  }");
            w.line("}");
        }
        log::trace!("{m}: {} group shape setters", groups.len());

        w.line(format!("void {m}setdims(char *name,ForthonObject *obj,long i)"));
        w.line("{");
        for (group, members) in &groups {
            let (lo, hi) = match (members.first(), members.last()) {
                (Some(lo), Some(hi)) => (*lo, *hi),
                _ => continue,
            };
            w.line(format!(
                "  if (i == -1 || ({lo} <= i && i <= {hi})) {m}setdims{group}(name,i);"
            ));
        }
        w.line("}");
        w.blank();
        Ok(())
    }

    // ==========================================================================
    // Binders
    // ==========================================================================

    /// Binder entry points called from the foreign side.
    pub fn emit_binders(&self, w: &mut HostWriter) {
        let ctx = self.ctx;
        let scalars = ctx.package.scalar_table();
        let arrays = ctx.package.array_table();

        w.line(format!("void {}(long *i,char *p)", ctx.c_symbol("setscalarpointers", "")));
        w.line("{");
        w.line(format!("  {scalars}[*i].data = (char *)p;"));
        w.line("}");

        // The foreign side passes the location of the instance pointer.
        w.line(format!("void {}(long *i,char **p)", ctx.c_symbol("setderivedtypepointers", "")));
        w.line("{");
        w.line(format!("  {scalars}[*i].data = (char *)(*p);"));
        w.line("}");

        w.line(format!("void {}(long *i,char *p)", ctx.c_symbol("setarraypointers", "")));
        w.line("{");
        w.line(format!("  {arrays}[*i].data.s = (char *)p;"));
        w.line("}");

        w.line(format!(
            "void {}(Fortranarray *farray,char *p)",
            ctx.c_symbol("setarraypointersobj", "")
        ));
        w.line("{");
        w.line("  farray->data.s = (char *)p;");
        w.line("}");

        w.line(format!(
            "void {}(Fortranarray *farray,long *dims)",
            ctx.c_symbol("setarraydims", "")
        ));
        w.line("{");
        if ctx.options.is_free_form() {
            w.line("  int id;");
            w.line("  for (id=0;id<farray->nd;id++)");
            w.line("    farray->dimensions[farray->nd-1-id] = (npy_intp)(dims[id]);");
        }
        w.line("}");
        w.blank();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use fstubgen_core::{
        DimBound, Dialect, InterfaceDescription, ScalarIndex, StandardTypes, VarType,
    };

    fn interface() -> InterfaceDescription {
        InterfaceDescription::new("wxy")
            .declare(Variable::scalar("n", VarType::Integer, "consts"))
            .declare(Variable::array("beta", VarType::Real, "consts", vec![DimBound::upper("n")]))
            .declare(
                Variable::array("hist", VarType::Real, "hist", vec![DimBound::new("0", "N"), DimBound::upper("nz")])
                    .dynamic()
                    .with_data("/-1./")
                    .with_attributes("dump fassign"),
            )
            .declare(Variable::array("work", VarType::Integer, "hist", vec![DimBound::assumed()]).dynamic())
            .declare(Variable::scalar("part", VarType::Record("particle".into()), "hist").dynamic())
    }

    fn externals() -> Vec<ScalarIndex> {
        vec![ScalarIndex::from_scalars(
            "base",
            &[Variable::scalar("nz", VarType::Integer, "basegrid")],
        )]
    }

    fn emit(f: impl Fn(&PointerEmitter<'_, '_>, &mut HostWriter)) -> String {
        let opts = GeneratorOptions::default();
        let ext = externals();
        let ctx = GenContext::new(classify(interface()), &opts, &StandardTypes, &ext);
        let mut w = HostWriter::new();
        f(&PointerEmitter::new(&ctx), &mut w);
        w.finish()
    }

    #[test]
    fn layout_assigns_binders() {
        let opts = GeneratorOptions::default();
        let ext = externals();
        let ctx = GenContext::new(classify(interface()), &opts, &StandardTypes, &ext);
        let pkg = &ctx.package;
        assert_eq!(pkg.scalar_index("n"), Some(0));
        assert_eq!(pkg.array_index("hist"), Some(1));
        let hist = &pkg.arrays()[1];
        assert_eq!(hist.setter.as_deref(), Some("wxysetpointerhist_"));
        assert_eq!(hist.getter.as_deref(), Some("wxygetpointerhist_"));
        assert_eq!(hist.initial_value, "-1.");
        assert!(pkg.arrays()[0].setter.is_none());
        let part = &pkg.scalars()[1];
        assert_eq!(part.type_code, "NPY_OBJECT");
        assert!(part.getter.is_some());
    }

    #[test]
    fn fixed_form_has_no_per_variable_binders() {
        let opts = GeneratorOptions::default().with_dialect(Dialect::Fixed);
        let ctx = GenContext::new(classify(interface()), &opts, &StandardTypes, &[]);
        assert!(ctx.package.arrays().iter().all(|a| a.setter.is_none()));
    }

    #[test]
    fn tables_reference_externals_and_binders() {
        let text = emit(|e, w| {
            e.emit_scalar_table(w);
            e.emit_array_table(w);
        });
        assert!(text.starts_with("extern Fortranscalar base_fscalars[];\n"));
        assert!(text.contains("int wxynscalars = 2;"));
        assert!(text.contains("{NPY_LONG,\"integer\",\"n\",NULL,\"consts\",\"\",\"\",0,NULL,NULL}"));
        assert!(text.contains(
            "{NPY_DOUBLE,1,2,NULL,\"hist\",{NULL},*wxysetpointerhist_,*wxygetpointerhist_,-1.,NULL,\"hist\",\"dump fassign\",\"\",\"(0:N,nz)\"}"
        ));
    }

    #[test]
    fn empty_tables_are_null() {
        let opts = GeneratorOptions::default();
        let ctx = GenContext::new(classify(InterfaceDescription::new("e")), &opts, &StandardTypes, &[]);
        let mut w = HostWriter::new();
        let e = PointerEmitter::new(&ctx);
        e.emit_scalar_table(&mut w);
        e.emit_array_table(&mut w);
        let text = w.finish();
        assert!(text.contains("Fortranscalar *e_fscalars=NULL;"));
        assert!(text.contains("static Fortranarray *e_farrays=NULL;"));
    }

    #[test]
    fn static_shapes_reference_scalars_by_index() {
        let text = emit(|e, w| e.emit_static_dims(w).unwrap());
        assert!(text.contains(
            "  wxy_farrays[0].dimensions[0] = (npy_intp)((*(long *)wxy_fscalars[0].data)-(1)+1);"
        ));
        assert!(!text.contains("(n)"));
        assert!(!text.contains("farrays[1]"));
    }

    #[test]
    fn group_setters_are_guarded() {
        let text = emit(|e, w| e.emit_dynamic_dims(w).unwrap());
        assert!(text.contains("static void wxysetdimshist(char *name,long i)"));
        assert!(text.contains("if (strcmp(name,\"hist\") == 0 || strcmp(name,\"*\") == 0) {"));
        assert!(text.contains("  if (i == -1 || i == 1) {"));
        // Axes are reversed and external identifiers use the external table.
        assert!(text.contains(
            "    wxy_farrays[1].dimensions[1] = (npy_intp)((*(long *)wxy_fscalars[0].data)-(0)+1);"
        ));
        assert!(text.contains(
            "    wxy_farrays[1].dimensions[0] = (npy_intp)((*(long *)base_fscalars[0].data)-(1)+1);"
        ));
        // Assumed extents are left for the foreign side to report.
        assert!(!text.contains("wxy_farrays[2].dimensions"));
        assert!(text.contains("  if (i == -1 || (1 <= i && i <= 2)) wxysetdimshist(name,i);"));
        assert!(!text.contains("setdimsconsts"));
    }

    #[test]
    fn unresolved_shape_identifier_fails() {
        let opts = GeneratorOptions::default();
        let iface = InterfaceDescription::new("wxy").declare(
            Variable::array("q", VarType::Real, "g", vec![DimBound::upper("nq")]).dynamic(),
        );
        let ctx = GenContext::new(classify(iface), &opts, &StandardTypes, &[]);
        let mut w = HostWriter::new();
        let err = PointerEmitter::new(&ctx).emit_dynamic_dims(&mut w).unwrap_err();
        assert_eq!(err.to_string(), "nq is not declared in the interface file");
    }

    #[test]
    fn binders_write_into_tables() {
        let text = emit(|e, w| e.emit_binders(w));
        assert!(text.contains("void wxysetscalarpointers_(long *i,char *p)"));
        assert!(text.contains("  wxy_fscalars[*i].data = (char *)(*p);"));
        assert!(text.contains("  wxy_farrays[*i].data.s = (char *)p;"));
        assert!(text.contains("farray->dimensions[farray->nd-1-id] = (npy_intp)(dims[id]);"));
    }

    #[test]
    fn initializer_delimiters_are_stripped() {
        assert_eq!(initializer_value("/1.5/"), "1.5");
        assert_eq!(initializer_value(" /0/ "), "0");
        assert_eq!(initializer_value("x"), "x");
    }
}
