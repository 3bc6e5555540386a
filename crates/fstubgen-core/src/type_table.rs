//! Translation of semantic types into host and foreign spellings.
//!
//! The table is an external collaborator: projects with unusual kinds can
//! supply their own [`TypeTable`]. [`StandardTypes`] covers the built-in tags
//! with double-precision reals and 8-byte integers.

use crate::types::VarType;

/// Spellings of a semantic type on both sides of the boundary.
pub trait TypeTable {
    /// C type used in prototypes and locals (`long`, `double`, ...).
    fn c_type(&self, ty: &VarType) -> String;

    /// Host array element type code (`NPY_DOUBLE`, ...).
    fn array_type(&self, ty: &VarType) -> &'static str;

    /// Foreign type declaration (`real(kind=8)`, `type(part)`, ...).
    fn foreign_type(&self, ty: &VarType) -> String;

    /// `Py_BuildValue` format character for a returned value.
    fn build_format(&self, ty: &VarType) -> &'static str;
}

/// Default translation table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardTypes;

impl TypeTable for StandardTypes {
    fn c_type(&self, ty: &VarType) -> String {
        match ty {
            VarType::Integer | VarType::Logical => "long",
            VarType::Real | VarType::Double => "double",
            VarType::Complex => "Py_complex",
            VarType::Character => "FSTRING",
            VarType::Record(_) => "char",
        }
        .to_string()
    }

    fn array_type(&self, ty: &VarType) -> &'static str {
        match ty {
            VarType::Integer | VarType::Logical => "NPY_LONG",
            VarType::Real | VarType::Double => "NPY_DOUBLE",
            VarType::Complex => "NPY_CDOUBLE",
            VarType::Character => "NPY_STRING",
            VarType::Record(_) => "NPY_OBJECT",
        }
    }

    fn foreign_type(&self, ty: &VarType) -> String {
        match ty {
            VarType::Integer => "integer(kind=8)".to_string(),
            VarType::Logical => "logical(kind=8)".to_string(),
            VarType::Real | VarType::Double => "real(kind=8)".to_string(),
            VarType::Complex => "complex(kind=8)".to_string(),
            VarType::Character => "character".to_string(),
            VarType::Record(name) => format!("type({name})"),
        }
    }

    fn build_format(&self, ty: &VarType) -> &'static str {
        match ty {
            VarType::Integer | VarType::Logical => "l",
            VarType::Real | VarType::Double => "d",
            VarType::Complex => "D",
            VarType::Character => "s",
            VarType::Record(_) => "O",
        }
    }
}
