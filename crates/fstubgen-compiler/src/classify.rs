//! Variable classification.
//!
//! Partitions the parser's flat record stream into scalars, arrays and
//! routines, keeping declaration order inside each list, and builds the
//! scalar dictionary used to resolve identifiers in dimension expressions.
//!
//! A variable without dimensions is a scalar, one with at least one dimension
//! is an array; routines come through as their own declaration kind. This is
//! also the one place where [`VarFlags`](fstubgen_core::VarFlags) are computed.

use fstubgen_core::{
    Declaration, Group, InterfaceDescription, RecordType, Routine, VarType, Variable,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// The classified interface of one module.
#[derive(Debug, Clone, Default)]
pub struct Classified {
    pub module: String,
    /// Host-visible scalars in declaration order; position is the table index.
    pub scalars: Vec<Variable>,
    /// Host-visible arrays in declaration order; position is the table index.
    pub arrays: Vec<Variable>,
    pub routines: Vec<Routine>,
    /// Variables of hidden groups (linkage only).
    pub hidden: Vec<Variable>,
    pub record_types: Vec<RecordType>,
    /// Visible groups followed by hidden groups, each in first-appearance order.
    pub groups: Vec<Group>,
    /// Lower-cased scalar name → scalar table index.
    scalar_dict: FxHashMap<String, usize>,
}

impl Classified {
    /// Table index of a local scalar, matched case-insensitively.
    pub fn scalar_index(&self, name: &str) -> Option<usize> {
        self.scalar_dict.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn scalar_dict(&self) -> &FxHashMap<String, usize> {
        &self.scalar_dict
    }

    /// Visible and hidden groups, in linkage order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    /// Scalars and arrays, then hidden variables, belonging to `group`.
    pub fn variables_in<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a Variable> {
        self.scalars
            .iter()
            .chain(self.arrays.iter())
            .chain(self.hidden.iter())
            .filter(move |v| v.group == group)
    }
}

/// Declare a `<routine>runtime` timer scalar for every routine that lacks one.
///
/// Timed wrappers accumulate CPU time into these scalars, so they must be in
/// the scalar table. New timers go into the `<module>timers` group.
pub fn add_timers(interface: &mut InterfaceDescription) {
    let existing: FxHashSet<String> = interface
        .declarations
        .iter()
        .filter_map(|d| match d {
            Declaration::Variable(v) if v.is_scalar() => Some(v.name.to_ascii_lowercase()),
            _ => None,
        })
        .collect();
    let group = format!("{}timers", interface.module);
    let timers: Vec<Declaration> = interface
        .declarations
        .iter()
        .filter_map(|d| match d {
            Declaration::Routine(r) => Some(format!("{}runtime", r.name)),
            Declaration::Variable(_) => None,
        })
        .filter(|name| !existing.contains(&name.to_ascii_lowercase()))
        .map(|name| {
            Variable::scalar(name, VarType::Double, group.as_str())
                .with_data("/0./")
                .with_comment("Run time of the routine, in seconds")
                .into()
        })
        .collect();
    interface.declarations.extend(timers);
}

/// Classify an interface description.
pub fn classify(interface: InterfaceDescription) -> Classified {
    let InterfaceDescription {
        module,
        declarations,
        hidden,
        record_types,
    } = interface;

    let mut scalars = Vec::new();
    let mut arrays = Vec::new();
    let mut routines = Vec::new();
    let mut groups = Vec::new();
    let mut seen = FxHashSet::default();

    for decl in declarations {
        match decl {
            Declaration::Variable(mut v) => {
                v.annotate();
                if seen.insert(v.group.clone()) {
                    groups.push(Group {
                        name: v.group.clone(),
                        hidden: false,
                    });
                }
                if v.is_scalar() {
                    scalars.push(v);
                } else {
                    arrays.push(v);
                }
            }
            Declaration::Routine(r) => routines.push(r),
        }
    }

    let hidden: Vec<Variable> = hidden
        .into_iter()
        .map(|mut v| {
            v.annotate();
            v
        })
        .collect();
    for v in &hidden {
        if seen.insert(v.group.clone()) {
            groups.push(Group {
                name: v.group.clone(),
                hidden: true,
            });
        }
    }

    let scalar_dict = scalars
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.to_ascii_lowercase(), i))
        .collect();

    log::debug!(
        "classified {}: {} scalars, {} arrays, {} routines, {} groups",
        module,
        scalars.len(),
        arrays.len(),
        routines.len(),
        groups.len()
    );

    Classified {
        module,
        scalars,
        arrays,
        routines,
        hidden,
        record_types,
        groups,
        scalar_dict,
    }
}
