//! Interface records: variables, routines and record types.
//!
//! These are produced once by the interface parser (an external collaborator)
//! and are read-only during generation, except that the classifier fills in
//! [`VarFlags`] exactly once.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::{DimBound, VarType};

bitflags! {
    /// Storage attributes of a variable, computed once during classification.
    ///
    /// Static storage is the absence of [`VarFlags::DYNAMIC`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VarFlags: u8 {
        /// Allocated or resized at run time; held through a foreign pointer.
        const DYNAMIC = 1 << 0;
        /// Pointer may be reassigned inside foreign code, which then reports
        /// the new shape back through the shape-sync entry point.
        const FASSIGN = 1 << 1;
        /// The variable is an instance of a record type.
        const RECORD = 1 << 2;
    }
}

impl VarFlags {
    /// Compute the flags from the parser's raw inputs.
    ///
    /// Attribute words are whitespace separated; only whole words count.
    pub fn from_parts(dynamic: bool, attributes: &str, ty: &VarType) -> Self {
        let mut flags = VarFlags::empty();
        if dynamic {
            flags |= VarFlags::DYNAMIC;
        }
        if attributes
            .split_whitespace()
            .any(|word| word.eq_ignore_ascii_case("fassign"))
        {
            flags |= VarFlags::FASSIGN;
        }
        if ty.is_record() {
            flags |= VarFlags::RECORD;
        }
        flags
    }
}

/// A module-level variable, scalar or array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub ty: VarType,
    /// Dimension bounds; empty for a scalar.
    pub dims: Vec<DimBound>,
    /// Group (foreign module) the variable lives in.
    pub group: String,
    /// Raw attribute string, kept verbatim for the descriptor tables.
    pub attributes: String,
    /// Whether the parser marked the variable as dynamically allocated.
    pub dynamic: bool,
    /// Shape text as written in the interface file, e.g. `(1:n,:)`.
    pub dimstring: String,
    /// Documentation text.
    pub comment: String,
    /// Literal initializer, including its delimiters (`/1.0/`).
    pub data: Option<String>,
    /// Record type this variable is a member of, if any.
    pub record_type: Option<String>,
    #[serde(skip)]
    pub flags: VarFlags,
}

impl Variable {
    /// Create a scalar.
    pub fn scalar(name: impl Into<String>, ty: VarType, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            dims: Vec::new(),
            group: group.into(),
            attributes: String::new(),
            dynamic: false,
            dimstring: String::new(),
            comment: String::new(),
            data: None,
            record_type: None,
            flags: VarFlags::empty(),
        }
    }

    /// Create an array. The shape text is derived from the bounds.
    pub fn array(
        name: impl Into<String>,
        ty: VarType,
        group: impl Into<String>,
        dims: Vec<DimBound>,
    ) -> Self {
        let dimstring = shape_text(&dims);
        Self {
            dims,
            dimstring,
            ..Self::scalar(name, ty, group)
        }
    }

    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Mark the variable as dynamically allocated.
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_dimstring(mut self, dimstring: impl Into<String>) -> Self {
        self.dimstring = dimstring.into();
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(VarFlags::DYNAMIC)
    }

    pub fn is_fassign(&self) -> bool {
        self.flags.contains(VarFlags::FASSIGN)
    }

    pub fn is_record(&self) -> bool {
        self.flags.contains(VarFlags::RECORD)
    }

    /// Recompute [`Variable::flags`] from the raw parser fields.
    pub fn annotate(&mut self) {
        self.flags = VarFlags::from_parts(self.dynamic, &self.attributes, &self.ty);
    }
}

/// Render bounds as Fortran shape text: `1:n` collapses to `n`, an assumed
/// extent becomes `:`.
pub fn shape_text(dims: &[DimBound]) -> String {
    if dims.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = dims
        .iter()
        .map(|d| {
            if d.is_assumed() {
                ":".to_string()
            } else if d.low.trim() == "1" {
                d.high.clone()
            } else {
                format!("{}:{}", d.low, d.high)
            }
        })
        .collect();
    format!("({})", parts.join(","))
}

// ============================================================================
// Routines
// ============================================================================

/// How a routine is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutineKind {
    /// Foreign routine; its symbol follows the toolchain's naming convention
    /// and array arguments are converted to foreign (column-major) order.
    #[default]
    Fortran,
    /// Plain C routine called by its own name with contiguous buffers.
    C,
}

/// A positional routine argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub ty: VarType,
    pub dims: Vec<DimBound>,
    /// 0-based position in the argument list.
    pub position: usize,
}

impl Argument {
    pub fn new(name: impl Into<String>, ty: VarType) -> Self {
        Self {
            name: name.into(),
            ty,
            dims: Vec::new(),
            position: 0,
        }
    }

    pub fn with_dims(mut self, dims: Vec<DimBound>) -> Self {
        self.dims = dims;
        self
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// An exported routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub name: String,
    /// Result type; `None` for a subroutine.
    pub result: Option<VarType>,
    pub kind: RoutineKind,
    pub args: Vec<Argument>,
    /// Signature text shown in the documentation string, e.g. `(x,n)`.
    pub dimstring: String,
    pub comment: String,
}

impl Routine {
    /// Create a subroutine with no arguments.
    pub fn subroutine(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: None,
            kind: RoutineKind::Fortran,
            args: Vec::new(),
            dimstring: String::new(),
            comment: String::new(),
        }
    }

    /// Create a function returning `result`.
    pub fn function(name: impl Into<String>, result: VarType) -> Self {
        Self {
            result: Some(result),
            ..Self::subroutine(name)
        }
    }

    /// Append an argument, assigning its position.
    pub fn arg(mut self, mut argument: Argument) -> Self {
        argument.position = self.args.len();
        self.args.push(argument);
        self.dimstring = format!(
            "({})",
            self.args
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        self
    }

    pub fn with_kind(mut self, kind: RoutineKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Number of character arguments, each of which needs a string descriptor.
    pub fn string_arg_count(&self) -> usize {
        self.args.iter().filter(|a| a.ty.is_character()).count()
    }

    /// Find an argument by name, case-insensitively.
    pub fn find_arg(&self, name: &str) -> Option<&Argument> {
        self.args.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

// ============================================================================
// Interface
// ============================================================================

/// One entry of the parser's flat record stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Variable(Variable),
    Routine(Routine),
}

impl From<Variable> for Declaration {
    fn from(v: Variable) -> Self {
        Declaration::Variable(v)
    }
}

impl From<Routine> for Declaration {
    fn from(r: Routine) -> Self {
        Declaration::Routine(r)
    }
}

/// A named record type with ordered members.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub members: Vec<Variable>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, members: Vec<Variable>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

/// A named aggregate of variables sharing one foreign module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group {
    pub name: String,
    /// Linkage-only; the group's variables are not visible to the host.
    pub hidden: bool,
}

/// Everything the parser hands over for one module.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDescription {
    /// Module (package) name, used as the prefix of every generated symbol.
    pub module: String,
    /// Host-visible variables and routines, in declaration order.
    pub declarations: Vec<Declaration>,
    /// Variables of hidden groups.
    pub hidden: Vec<Variable>,
    pub record_types: Vec<RecordType>,
}

impl InterfaceDescription {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn declare(mut self, declaration: impl Into<Declaration>) -> Self {
        self.declarations.push(declaration.into());
        self
    }

    pub fn hidden(mut self, variable: Variable) -> Self {
        self.hidden.push(variable);
        self
    }

    pub fn record_type(mut self, record: RecordType) -> Self {
        self.record_types.push(record);
        self
    }
}
