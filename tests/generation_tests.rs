//! Integration tests for fstubgen using ModuleAssembler as the entry point.
//!
//! These tests run whole generations and inspect the three artifacts, across
//! modules where one module's scalar index feeds another.

use fstubgen::prelude::*;
use fstubgen::{
    CallErrorKind, CallValidator, HostArg, MAX_SYMBOL_LEN, load_scalar_indexes, mangle, rejoin,
};
use tempdir::TempDir;

/// Module `wxy`: scalar `n` sizing array `beta`, a dynamic array and `foo`.
fn wxy() -> InterfaceDescription {
    InterfaceDescription::new("wxy")
        .declare(Variable::scalar("n", VarType::Integer, "consts").with_data("/3/"))
        .declare(Variable::array("beta", VarType::Real, "consts", vec![DimBound::upper("n")]))
        .declare(
            Variable::array("hist", VarType::Double, "hist", vec![DimBound::upper("n"), DimBound::assumed()])
                .dynamic()
                .with_attributes("fassign"),
        )
        .declare(
            Routine::subroutine("foo")
                .arg(Argument::new("x", VarType::Real).with_dims(vec![DimBound::upper("5")])),
        )
}

fn generate(options: GeneratorOptions, interface: InterfaceDescription) -> GeneratedModule {
    ModuleAssembler::new(options)
        .generate(interface)
        .unwrap_or_else(|e| panic!("generation failed: {e}"))
}

/// Body of a C function, from its signature to the first closing brace in
/// column 1.
fn c_function<'s>(source: &'s str, signature: &str) -> &'s str {
    let start = source
        .find(signature)
        .unwrap_or_else(|| panic!("{signature} not emitted"));
    let rest = &source[start..];
    let end = rest.find("\n}").map_or(rest.len(), |i| i + 2);
    &rest[..end]
}

// =============================================================================
// Artifacts
// =============================================================================

#[test]
fn test_generate_to_writes_three_artifacts() {
    let dir = TempDir::new("fstubgen-e2e").unwrap();
    let generated = ModuleAssembler::new(GeneratorOptions::default())
        .generate_to(wxy(), dir.path())
        .unwrap();

    let host = std::fs::read_to_string(dir.path().join("wxypymodule.c")).unwrap();
    let foreign = std::fs::read_to_string(dir.path().join("wxy_p.F90")).unwrap();
    assert_eq!(host, generated.host_source);
    assert_eq!(foreign, generated.foreign_source);

    let index = ScalarIndex::load(&dir.path().join("wxy.scalars")).unwrap();
    assert_eq!(index, generated.scalar_index);
    assert_eq!(index.lookup("N"), Some(0));
}

#[test]
fn test_write_to_matches_generate_to() {
    let generated = generate(GeneratorOptions::default(), wxy());
    let dir = TempDir::new("fstubgen-write").unwrap();
    let paths = generated.write_to(dir.path()).unwrap();
    let names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["wxypymodule.c", "wxy_p.F90", "wxy.scalars"]);
}

// =============================================================================
// Dimension resolution
// =============================================================================

#[test]
fn test_static_shape_refers_to_scalar_by_index() {
    let generated = generate(GeneratorOptions::default(), wxy());
    let body = c_function(&generated.host_source, "void wxysetstaticdims(");
    assert!(body.contains(
        "  wxy_farrays[0].dimensions[0] = (npy_intp)((*(long *)wxy_fscalars[0].data)-(1)+1);"
    ));
    assert!(!body.contains("(n)"));
}

#[test]
fn test_scalar_index_round_trip_between_runs() {
    let dir = TempDir::new("fstubgen-ab").unwrap();
    let a = InterfaceDescription::new("base")
        .declare(Variable::scalar("nx", VarType::Integer, "grid"))
        .declare(Variable::scalar("ny", VarType::Integer, "grid"));
    ModuleAssembler::new(GeneratorOptions::default())
        .generate_to(a, dir.path())
        .unwrap();

    let externals = load_scalar_indexes(&[dir.path().join("base.scalars")]).unwrap();
    let assembler = ModuleAssembler::new(GeneratorOptions::default()).with_externals(externals);

    let b = InterfaceDescription::new("field").declare(Variable::array(
        "rho",
        VarType::Real,
        "fields",
        vec![DimBound::upper("NX"), DimBound::new("0", "ny")],
    ));
    let generated = assembler.generate(b).unwrap();
    assert!(generated.host_source.contains("extern Fortranscalar base_fscalars[];"));
    assert!(generated.host_source.contains("(*(long *)base_fscalars[0].data)"));
    assert!(generated.host_source.contains("(*(long *)base_fscalars[1].data)"));
    // The shape's scalars live in the other module's group.
    assert!(generated.foreign_source.contains("MODULE fields\n  USE grid\n  SAVE\n"));

    let missing = InterfaceDescription::new("field").declare(Variable::array(
        "rho",
        VarType::Real,
        "fields",
        vec![DimBound::upper("nz")],
    ));
    let err = assembler.generate(missing).unwrap_err();
    assert!(matches!(&err, GenerationError::UnresolvedIdentifier { name } if name == "nz"));
    assert_eq!(err.to_string(), "nz is not declared in the interface file");
}

#[test]
fn test_first_external_index_wins() {
    let first = ScalarIndex::from_scalars("one", &[Variable::scalar("m", VarType::Integer, "g1")]);
    let second = ScalarIndex::from_scalars(
        "two",
        &[
            Variable::scalar("k", VarType::Integer, "g2"),
            Variable::scalar("m", VarType::Integer, "g2"),
        ],
    );
    let iface = InterfaceDescription::new("wxy").declare(
        Variable::array("w", VarType::Real, "work", vec![DimBound::upper("m")]).dynamic(),
    );
    let generated = ModuleAssembler::new(GeneratorOptions::default())
        .with_externals(vec![first, second])
        .generate(iface)
        .unwrap();
    assert!(generated.host_source.contains("*(long *)one_fscalars[0].data"));
    assert!(!generated.host_source.contains("two_fscalars[1]"));
    assert!(generated.foreign_source.contains("  USE g1\n  USE work\n"));
}

#[test]
fn test_local_scalar_shadows_externals() {
    let external = ScalarIndex::from_scalars("base", &[Variable::scalar("n", VarType::Integer, "grid")]);
    let generated = ModuleAssembler::new(GeneratorOptions::default())
        .with_externals(vec![external])
        .generate(wxy())
        .unwrap();
    assert!(!generated.host_source.contains("base_fscalars[0].data"));
}

// =============================================================================
// Naming
// =============================================================================

#[test]
fn test_long_symbols_are_mangled() {
    let module = "averyverylongmodulename";
    let iface = InterfaceDescription::new(module).declare(
        Variable::array("somewhatlongarray", VarType::Real, "work", vec![DimBound::upper("4")]).dynamic(),
    );
    let generated = generate(GeneratorOptions::default(), iface);

    for (prefix, suffix) in [("nullifypointers", ""), ("setpointer", "somewhatlongarray")] {
        let full = format!("{module}{prefix}{suffix}");
        assert!(full.len() >= 32);
        let mangled = mangle(&full);
        assert_eq!(mangled.len(), MAX_SYMBOL_LEN);
        assert_eq!(&mangled[..15], &full[..15]);
        assert!(generated.foreign_source.contains(&format!("SUBROUTINE {mangled}(")));
    }
}

#[test]
fn test_short_symbols_are_kept() {
    let generated = generate(GeneratorOptions::default(), wxy());
    assert!(generated.foreign_source.contains("SUBROUTINE wxynullifypointers()"));
    assert!(generated.host_source.contains("  wxynullifypointers_();"));
}

// =============================================================================
// Options
// =============================================================================

#[test]
fn test_initial_allocation_toggle() {
    let off = generate(GeneratorOptions::default(), wxy());
    let on = generate(GeneratorOptions::default().with_initial_allocation(true), wxy());
    assert!(!off.host_source.contains("ForthonPackage_gallot"));
    let init = c_function(&on.host_source, "PyInit_wxypy(void)");
    assert!(init.contains("  s = Py_BuildValue(\"(s)\",\"*\");"));
    assert!(init.contains("  ForthonPackage_gallot((PyObject *)wxyObject,s);"));
}

#[test]
fn test_fixed_form_linkage() {
    let generated = generate(GeneratorOptions::default().with_dialect(Dialect::Fixed), wxy());
    assert_eq!(generated.foreign_file_name(), "wxy_p.m");
    let f = &generated.foreign_source;
    assert!(f.contains("  Use(consts)\n"));
    assert!(f.contains("      SUBROUTINE wxydata()\nUse(consts)\n"));
    assert!(!f.contains("      Use("));
    assert!(f.contains("      data n/3/\n"));
    assert!(f.lines().all(|l| l.len() <= Dialect::Fixed.line_limit()));
    assert!(!f.contains("=> p__"));
}

#[test]
fn test_xlf_saves_module_variables() {
    let generated = generate(GeneratorOptions::default().with_toolchain(Toolchain::new("xlf")), wxy());
    assert!(generated.foreign_source.contains("  integer(kind=8),SAVE::n=3\n"));
    assert!(generated.foreign_source.contains("  real(kind=8),pointer,SAVE::hist(:,:)\n"));
}

// =============================================================================
// Line continuation
// =============================================================================

#[test]
fn test_long_lines_rejoin_to_original() {
    let values: Vec<String> = (0..80).map(|i| format!("{i}.5")).collect();
    let data = format!("/{}/", values.join(","));
    let long = format!("  data beta{data}");
    assert!(long.len() > 132);

    for dialect in [Dialect::Free, Dialect::Fixed] {
        let iface = InterfaceDescription::new("wxy")
            .declare(Variable::scalar("n", VarType::Integer, "consts").with_data("/80/"))
            .declare(
                Variable::array("beta", VarType::Real, "consts", vec![DimBound::upper("n")])
                    .with_data(data.as_str()),
            );
        let generated = generate(GeneratorOptions::default().with_dialect(dialect), iface);
        let f = &generated.foreign_source;
        assert!(f.lines().all(|l| l.len() <= dialect.line_limit()), "{dialect:?}");

        let rejoined = rejoin(f, dialect);
        let expected = match dialect {
            Dialect::Free => long.clone(),
            Dialect::Fixed => format!("      data beta{data}"),
        };
        assert!(rejoined.lines().any(|l| l == expected), "{dialect:?}");
    }
}

// =============================================================================
// Call model
// =============================================================================

#[test]
fn test_foo_argument_checks() {
    let iface = wxy();
    let foo = iface
        .declarations
        .iter()
        .find_map(|d| match d {
            Declaration::Routine(r) => Some(r.clone()),
            Declaration::Variable(_) => None,
        })
        .unwrap();
    let validator = CallValidator::new(&foo);
    let vector = |len| HostArg::Array { element: VarType::Real, shape: vec![len] };

    assert!(validator.check(&[vector(5)]).is_ok());

    let err = validator.check(&[vector(4)]).unwrap_err();
    assert_eq!(err.routine, "foo");
    assert_eq!(err.argument, 1);
    assert_eq!(err.kind, CallErrorKind::WrongDimension { dimension: 1 });

    assert!(validator.check(&[HostArg::Float(2.0)]).is_ok());

    let matrix = HostArg::Array { element: VarType::Real, shape: vec![5, 1] };
    assert_eq!(validator.check(&[matrix]).unwrap_err().kind, CallErrorKind::WrongRank);
}

#[test]
fn test_foo_wrapper_checks_match_model() {
    let generated = generate(GeneratorOptions::default(), wxy());
    let wrapper = c_function(&generated.host_source, "wxy_foo(PyObject *self, PyObject *args)");
    assert!(wrapper.contains("setjmp(stackenvironment)"));
    assert!(wrapper.contains("\nerr:"));
    assert!(wrapper.contains("\"Argument %d in foo has the wrong type\""));
}
