//! Call validation model.
//!
//! [`CallValidator`] performs the checks a generated wrapper performs, on
//! host values described by [`HostArg`]. It runs in two explicit phases:
//!
//! 1. [`CallValidator::convert`] type-checks every argument and produces a
//!    [`Buffer`] for each one;
//! 2. [`CallValidator::validate`] checks ranks and extents, evaluating bound
//!    expressions with the values of sizing arguments and module scalars.
//!
//! [`CallValidator::invoke`] runs both phases and then the call itself under
//! `catch_unwind`, so a panic inside the call is reported through the same
//! [`CallError`] channel as a validation failure.

use std::panic::{AssertUnwindSafe, catch_unwind};

use fstubgen_core::{Argument, CallError, CallErrorKind, Routine, VarType};

use crate::dims::evaluate;

/// A host value passed to a wrapper.
#[derive(Debug, Clone, PartialEq)]
pub enum HostArg {
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Text(String),
    /// An array of `element` values with the given extents.
    Array { element: VarType, shape: Vec<usize> },
    /// An instance of a record type.
    Record { type_name: String },
    /// A value with no array conversion at all.
    Unconvertible,
}

/// A converted argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    /// 0-based argument position.
    pub position: usize,
    /// 0 for a bare value.
    pub rank: usize,
    pub shape: Vec<usize>,
    /// Integer value of a bare numeric argument, used when it sizes another.
    pub value: Option<i64>,
}

/// Numeric widening order: logical and integer, then real, then complex.
fn numeric_level(ty: &VarType) -> Option<u8> {
    match ty {
        VarType::Integer | VarType::Logical => Some(0),
        VarType::Real | VarType::Double => Some(1),
        VarType::Complex => Some(2),
        VarType::Character | VarType::Record(_) => None,
    }
}

fn no_scalars(_: &str) -> Option<i64> {
    None
}

/// Validates calls to one routine.
pub struct CallValidator<'r> {
    routine: &'r Routine,
    scalars: &'r dyn Fn(&str) -> Option<i64>,
}

impl<'r> CallValidator<'r> {
    pub fn new(routine: &'r Routine) -> Self {
        Self {
            routine,
            scalars: &no_scalars,
        }
    }

    /// Values of module scalars named in bound expressions.
    pub fn with_scalars(mut self, scalars: &'r dyn Fn(&str) -> Option<i64>) -> Self {
        self.scalars = scalars;
        self
    }

    fn error(&self, argument: usize, kind: CallErrorKind) -> CallError {
        CallError::new(&self.routine.name, argument, kind)
    }

    // ==========================================================================
    // Phase 1
    // ==========================================================================

    /// Convert every argument, stopping at the first that cannot be.
    pub fn convert(&self, args: &[HostArg]) -> Result<Vec<Buffer>, CallError> {
        let expected = self.routine.args.len();
        if args.len() != expected {
            return Err(self.error(
                0,
                CallErrorKind::ArgumentCount {
                    expected,
                    given: args.len(),
                },
            ));
        }
        self.routine
            .args
            .iter()
            .zip(args)
            .map(|(declared, arg)| self.convert_one(declared, arg))
            .collect()
    }

    fn convert_one(&self, declared: &Argument, arg: &HostArg) -> Result<Buffer, CallError> {
        let k = declared.position + 1;
        let wrong_type = || self.error(k, CallErrorKind::WrongType);

        if let VarType::Record(expected) = &declared.ty {
            return match arg {
                HostArg::Record { type_name } if type_name == expected => Ok(Buffer {
                    position: declared.position,
                    rank: 0,
                    shape: Vec::new(),
                    value: None,
                }),
                _ => Err(wrong_type()),
            };
        }

        let (given, rank, shape, value) = match arg {
            HostArg::Unconvertible => return Err(self.error(k, CallErrorKind::Conversion)),
            HostArg::Int(v) => (Some(VarType::Integer), 0, Vec::new(), Some(*v)),
            HostArg::Float(v) => (Some(VarType::Real), 0, Vec::new(), Some(*v as i64)),
            HostArg::Complex(..) => (Some(VarType::Complex), 0, Vec::new(), None),
            HostArg::Text(s) => (Some(VarType::Character), 1, vec![s.len()], None),
            HostArg::Array { element, shape } => (Some(element.clone()), shape.len(), shape.clone(), None),
            HostArg::Record { .. } => (None, 0, Vec::new(), None),
        };
        let given = given.ok_or_else(wrong_type)?;

        let accepted = if declared.ty.is_character() {
            given.is_character()
        } else {
            match (numeric_level(&given), numeric_level(&declared.ty)) {
                (Some(g), Some(d)) => g <= d,
                _ => false,
            }
        };
        if !accepted {
            return Err(wrong_type());
        }
        Ok(Buffer {
            position: declared.position,
            rank,
            shape,
            value,
        })
    }

    // ==========================================================================
    // Phase 2
    // ==========================================================================

    /// Check ranks and extents of all buffers.
    ///
    /// Returns the argument number current at the end of the checks, which is
    /// the one a later fault is attributed to.
    pub fn validate(&self, buffers: &[Buffer]) -> Result<usize, CallError> {
        let routine = self.routine;
        let lookup = |name: &str| {
            routine
                .find_arg(name)
                .and_then(|a| buffers.get(a.position))
                .and_then(|b| b.value)
                .or_else(|| (self.scalars)(name))
        };

        let mut argno = buffers.len();
        for (declared, buffer) in routine.args.iter().zip(buffers) {
            if declared.dims.is_empty() || declared.ty.is_record() || declared.ty.is_character() {
                continue;
            }
            let k = declared.position + 1;
            argno = k;
            let rank = declared.rank();
            if !(buffer.rank == rank || (rank == 1 && buffer.rank == 0)) {
                return Err(self.error(k, CallErrorKind::WrongRank));
            }

            let conversion = || self.error(k, CallErrorKind::Conversion);
            let mut extents = Vec::with_capacity(rank);
            for dim in &declared.dims {
                if dim.is_assumed() {
                    extents.push(None);
                    continue;
                }
                let bound = |text: &str| {
                    evaluate(text, &lookup).map_err(|e| {
                        log::debug!("{}: {e}", routine.name);
                        conversion()
                    })
                };
                let extent = bound(&dim.high)?
                    .checked_sub(bound(&dim.low)?)
                    .and_then(|d| d.checked_add(1))
                    .ok_or_else(|| {
                        log::debug!("{}: extent of argument {k} overflows", routine.name);
                        conversion()
                    })?;
                extents.push(Some(extent));
            }

            // An empty array skips the per-dimension comparison.
            let total = extents
                .iter()
                .flatten()
                .try_fold(1i64, |acc, &e| acc.checked_mul(e))
                .ok_or_else(conversion)?;
            if total == 0 {
                continue;
            }
            for (j, extent) in extents.iter().enumerate() {
                let Some(extent) = *extent else { continue };
                // A negative extent never matches a host shape.
                let extent = usize::try_from(extent).ok();
                let matches = if rank == 1 {
                    buffer.rank == 0 || (extent.is_some() && buffer.shape.first().copied() == extent)
                } else {
                    extent.is_some() && buffer.shape.get(j).copied() == extent
                };
                if !matches {
                    return Err(self.error(k, CallErrorKind::WrongDimension { dimension: j + 1 }));
                }
            }
        }
        Ok(argno)
    }

    /// Both phases.
    pub fn check(&self, args: &[HostArg]) -> Result<Vec<Buffer>, CallError> {
        let buffers = self.convert(args)?;
        self.validate(&buffers)?;
        Ok(buffers)
    }

    /// Validate, then run `call`. A panic inside `call` becomes a
    /// [`CallErrorKind::ForeignFault`].
    pub fn invoke<R>(
        &self,
        args: &[HostArg],
        call: impl FnOnce(&[Buffer]) -> R,
    ) -> Result<R, CallError> {
        let buffers = self.convert(args)?;
        let argno = self.validate(&buffers)?;
        catch_unwind(AssertUnwindSafe(|| call(&buffers))).map_err(|_| {
            log::warn!("{} faulted; recovered", self.routine.name);
            self.error(argno, CallErrorKind::ForeignFault)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstubgen_core::DimBound;

    fn foo() -> Routine {
        Routine::subroutine("foo")
            .arg(Argument::new("x", VarType::Real).with_dims(vec![DimBound::new("1", "5")]))
    }

    fn vector(len: usize) -> HostArg {
        HostArg::Array {
            element: VarType::Real,
            shape: vec![len],
        }
    }

    #[test]
    fn declared_extent_is_enforced() {
        let f = foo();
        let v = CallValidator::new(&f);
        assert!(v.check(&[vector(5)]).is_ok());

        let err = v.check(&[vector(4)]).unwrap_err();
        assert_eq!(err.kind, CallErrorKind::WrongDimension { dimension: 1 });
        assert_eq!(err.argument, 1);
        assert_eq!(err.to_string(), "Dimension 1 of argument 1 in foo has the wrong size");
    }

    #[test]
    fn bare_value_accepted_for_rank_one() {
        let f = foo();
        let v = CallValidator::new(&f);
        assert!(v.check(&[HostArg::Float(2.0)]).is_ok());
        assert!(v.check(&[HostArg::Int(2)]).is_ok());
    }

    #[test]
    fn higher_ranks_must_match_exactly() {
        let f = Routine::subroutine("g").arg(
            Argument::new("a", VarType::Double).with_dims(vec![DimBound::upper("2"), DimBound::upper("3")]),
        );
        let v = CallValidator::new(&f);
        let matrix = |shape: Vec<usize>| HostArg::Array {
            element: VarType::Double,
            shape,
        };
        assert!(v.check(&[matrix(vec![2, 3])]).is_ok());
        assert_eq!(
            v.check(&[HostArg::Float(1.0)]).unwrap_err().kind,
            CallErrorKind::WrongRank
        );
        assert_eq!(
            v.check(&[matrix(vec![2, 4])]).unwrap_err().kind,
            CallErrorKind::WrongDimension { dimension: 2 }
        );
    }

    #[test]
    fn later_arguments_size_earlier_ones() {
        let f = Routine::subroutine("smooth")
            .arg(Argument::new("y", VarType::Real).with_dims(vec![DimBound::upper("n+1")]))
            .arg(Argument::new("n", VarType::Integer));
        let v = CallValidator::new(&f);
        assert!(v.check(&[vector(4), HostArg::Int(3)]).is_ok());
        let err = v.check(&[vector(4), HostArg::Int(4)]).unwrap_err();
        assert_eq!(err.argument, 1);
    }

    #[test]
    fn module_scalars_size_arguments() {
        let f = Routine::subroutine("load")
            .arg(Argument::new("z", VarType::Real).with_dims(vec![DimBound::upper("nz")]));
        let scalars = |name: &str| (name == "nz").then_some(3);
        let v = CallValidator::new(&f).with_scalars(&scalars);
        assert!(v.check(&[vector(3)]).is_ok());

        let unknown = CallValidator::new(&f).check(&[vector(3)]).unwrap_err();
        assert_eq!(unknown.kind, CallErrorKind::Conversion);
    }

    #[test]
    fn zero_extent_skips_dimension_checks() {
        let f = Routine::subroutine("empty")
            .arg(Argument::new("w", VarType::Real).with_dims(vec![DimBound::upper("n"), DimBound::upper("2")]))
            .arg(Argument::new("n", VarType::Integer));
        let v = CallValidator::new(&f);
        let odd = HostArg::Array {
            element: VarType::Real,
            shape: vec![2, 0],
        };
        assert!(v.check(&[odd, HostArg::Int(0)]).is_ok());
    }

    fn smooth() -> Routine {
        Routine::subroutine("smooth")
            .arg(Argument::new("y", VarType::Real).with_dims(vec![DimBound::upper("n+1")]))
            .arg(Argument::new("n", VarType::Integer))
    }

    #[test]
    fn oversized_sizing_argument_is_an_error() {
        let f = smooth();
        let v = CallValidator::new(&f);
        let err = v.check(&[vector(4), HostArg::Int(i64::MAX)]).unwrap_err();
        assert_eq!((err.argument, err.kind), (1, CallErrorKind::Conversion));

        let low = CallValidator::new(&f).check(&[vector(4), HostArg::Int(i64::MIN)]);
        assert_eq!(low.unwrap_err().kind, CallErrorKind::WrongDimension { dimension: 1 });

        let mut called = false;
        assert!(v.invoke(&[vector(4), HostArg::Int(i64::MAX)], |_| called = true).is_err());
        assert!(!called);
    }

    #[test]
    fn extent_near_the_integer_limit() {
        let f = smooth();
        let v = CallValidator::new(&f);
        // n+1 fits but no host array has that many elements.
        let err = v.check(&[vector(4), HostArg::Int(i64::MAX - 1)]).unwrap_err();
        assert_eq!(err.kind, CallErrorKind::WrongDimension { dimension: 1 });

        // high - low + 1 overflows even when both bounds fit.
        let wide = Routine::subroutine("wide").arg(
            Argument::new("a", VarType::Real).with_dims(vec![DimBound::new("lo", "hi")]),
        );
        let scalars = |name: &str| match name {
            "lo" => Some(i64::MIN),
            "hi" => Some(i64::MAX),
            _ => None,
        };
        let err = CallValidator::new(&wide)
            .with_scalars(&scalars)
            .check(&[vector(4)])
            .unwrap_err();
        assert_eq!(err.kind, CallErrorKind::Conversion);
    }

    #[test]
    fn extent_product_overflow_is_an_error() {
        let f = Routine::subroutine("block")
            .arg(Argument::new("b", VarType::Real).with_dims(vec![DimBound::upper("n"), DimBound::upper("n")]))
            .arg(Argument::new("n", VarType::Integer));
        let block = HostArg::Array {
            element: VarType::Real,
            shape: vec![2, 2],
        };
        let err = CallValidator::new(&f)
            .check(&[block, HostArg::Int(1 << 40)])
            .unwrap_err();
        assert_eq!((err.argument, err.kind), (1, CallErrorKind::Conversion));
    }

    #[test]
    fn negative_extent_never_matches() {
        let f = smooth();
        let v = CallValidator::new(&f);
        // n = -3 gives extent -2.
        let err = v.check(&[vector(2), HostArg::Int(-3)]).unwrap_err();
        assert_eq!(err.kind, CallErrorKind::WrongDimension { dimension: 1 });
        // A bare value still satisfies a rank-one argument.
        assert!(v.check(&[HostArg::Float(1.0), HostArg::Int(-3)]).is_ok());
    }

    #[test]
    fn type_mismatches_name_the_argument() {
        let f = Routine::subroutine("mix")
            .arg(Argument::new("i", VarType::Integer))
            .arg(Argument::new("p", VarType::Record("particle".into())))
            .arg(Argument::new("s", VarType::Character));
        let v = CallValidator::new(&f);
        let part = HostArg::Record {
            type_name: "particle".into(),
        };
        let text = HostArg::Text("abc".into());
        assert!(v.check(&[HostArg::Int(1), part.clone(), text.clone()]).is_ok());

        let err = v.check(&[HostArg::Float(1.5), part.clone(), text.clone()]).unwrap_err();
        assert_eq!((err.argument, err.kind), (1, CallErrorKind::WrongType));

        let other = HostArg::Record {
            type_name: "species".into(),
        };
        let err = v.check(&[HostArg::Int(1), other, text.clone()]).unwrap_err();
        assert_eq!(err.to_string(), "Argument 2 in mix has the wrong type");

        let err = v.check(&[HostArg::Int(1), part, HostArg::Unconvertible]).unwrap_err();
        assert_eq!(err.to_string(), "There is an error in argument 3 in mix");
    }

    #[test]
    fn argument_count_is_checked() {
        let f = foo();
        let err = CallValidator::new(&f).check(&[]).unwrap_err();
        assert_eq!(err.to_string(), "foo() takes exactly 1 arguments (0 given)");
    }

    #[test]
    fn faults_use_the_same_channel() {
        let f = foo();
        let v = CallValidator::new(&f);
        assert_eq!(v.invoke(&[vector(5)], |b| b.len()), Ok(1));

        let err = v
            .invoke(&[vector(5)], |_| -> usize { panic!("segfault in foo") })
            .unwrap_err();
        assert_eq!(err.kind, CallErrorKind::ForeignFault);
        assert_eq!(err.to_string(), "Argument 1 in foo has the wrong type");

        // Validation failures never reach the call.
        let mut called = false;
        let err = v.invoke(&[vector(4)], |_| called = true).unwrap_err();
        assert!(matches!(err.kind, CallErrorKind::WrongDimension { .. }));
        assert!(!called);
    }
}
