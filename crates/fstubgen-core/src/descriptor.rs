//! Descriptor tables and the pointer-binding protocol.
//!
//! Every generated module owns one scalar table and one array table. The
//! generator lays them out (assigning table indices) before any emitter runs,
//! and the emitted C code declares them as static data. At process start the
//! foreign side calls the binder entry points, which deposit foreign addresses
//! into the tables' data slots.
//!
//! [`Package`] is that aggregate. The generator uses it as the single source
//! of table indices and binder symbols; the binder operations implement the
//! same protocol the emitted C performs, so embedders and tests can exercise
//! it without a foreign toolchain.
//!
//! # Reentrancy
//!
//! Neither the tables nor the generated wrappers carry any locking. Two
//! wrappers touching the same descriptor state concurrently is undefined.

use thiserror::Error;

/// An address received from the foreign side.
///
/// The generator never dereferences it: the value is stored and later handed
/// back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignAddress(u64);

impl ForeignAddress {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Errors from the binder operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("scalar index {index} out of range (table has {len})")]
    ScalarOutOfRange { index: usize, len: usize },
    #[error("array index {index} out of range (table has {len})")]
    ArrayOutOfRange { index: usize, len: usize },
    #[error("array {name} has rank {rank}, got a shape of length {given}")]
    RankMismatch {
        name: String,
        rank: usize,
        given: usize,
    },
}

/// Metadata for one scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarDescriptor {
    /// Host element type code.
    pub type_code: String,
    /// Semantic type tag (record type name for records).
    pub type_name: String,
    pub name: String,
    pub group: String,
    pub attributes: String,
    pub comment: String,
    pub dynamic: bool,
    /// Foreign subroutine that rebinds the scalar (records, dynamic scalars).
    pub setter: Option<String>,
    /// Foreign subroutine that returns the current instance (dynamic records).
    pub getter: Option<String>,
    /// Filled at bind time.
    pub data: Option<ForeignAddress>,
}

/// Metadata for one array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDescriptor {
    pub type_code: String,
    pub name: String,
    pub group: String,
    pub attributes: String,
    pub comment: String,
    /// Shape text as declared.
    pub dimstring: String,
    pub dynamic: bool,
    pub rank: usize,
    /// Extents in host axis order (reverse of the foreign declaration).
    pub shape: Vec<i64>,
    /// Foreign subroutine that binds a freshly allocated buffer.
    pub setter: Option<String>,
    /// Foreign subroutine that reports a reassigned pointer and its shape.
    pub getter: Option<String>,
    /// Fill value applied when a dynamic array is allocated.
    pub initial_value: String,
    pub data: Option<ForeignAddress>,
}

impl ArrayDescriptor {
    /// Bind a buffer through a direct descriptor handle.
    pub fn bind(&mut self, address: ForeignAddress) {
        self.data = Some(address);
    }

    /// Store a shape given in foreign axis order, reversing it into host
    /// axis order.
    pub fn sync_shape(&mut self, foreign_shape: &[i64]) -> Result<(), BindError> {
        if foreign_shape.len() != self.rank {
            return Err(BindError::RankMismatch {
                name: self.name.clone(),
                rank: self.rank,
                given: foreign_shape.len(),
            });
        }
        self.shape = foreign_shape.iter().rev().copied().collect();
        Ok(())
    }

    /// Total element count, zero when any extent is zero or unknown.
    pub fn element_count(&self) -> i64 {
        if self.shape.len() != self.rank {
            return 0;
        }
        self.shape.iter().product()
    }
}

/// One module's descriptor tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    pub module: String,
    scalars: Vec<ScalarDescriptor>,
    arrays: Vec<ArrayDescriptor>,
}

impl Package {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            scalars: Vec::new(),
            arrays: Vec::new(),
        }
    }

    /// Append a scalar descriptor, returning its table index.
    pub fn push_scalar(&mut self, descriptor: ScalarDescriptor) -> usize {
        self.scalars.push(descriptor);
        self.scalars.len() - 1
    }

    /// Append an array descriptor, returning its table index.
    pub fn push_array(&mut self, descriptor: ArrayDescriptor) -> usize {
        self.arrays.push(descriptor);
        self.arrays.len() - 1
    }

    pub fn scalars(&self) -> &[ScalarDescriptor] {
        &self.scalars
    }

    pub fn arrays(&self) -> &[ArrayDescriptor] {
        &self.arrays
    }

    pub fn array_mut(&mut self, index: usize) -> Option<&mut ArrayDescriptor> {
        self.arrays.get_mut(index)
    }

    /// Table index of a scalar by name, case-insensitively.
    pub fn scalar_index(&self, name: &str) -> Option<usize> {
        self.scalars
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Table index of an array by name, case-insensitively.
    pub fn array_index(&self, name: &str) -> Option<usize> {
        self.arrays
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// C name of the scalar table.
    pub fn scalar_table(&self) -> String {
        format!("{}_fscalars", self.module)
    }

    /// C name of the array table.
    pub fn array_table(&self) -> String {
        format!("{}_farrays", self.module)
    }

    // ==========================================================================
    // Binder protocol
    // ==========================================================================

    /// Store the address of a scalar.
    pub fn bind_scalar(&mut self, index: usize, address: ForeignAddress) -> Result<(), BindError> {
        let len = self.scalars.len();
        let slot = self
            .scalars
            .get_mut(index)
            .ok_or(BindError::ScalarOutOfRange { index, len })?;
        slot.data = Some(address);
        Ok(())
    }

    /// Store the address of a record instance.
    ///
    /// The foreign side passes the location holding the instance's address,
    /// so one indirection is resolved here.
    pub fn bind_record(&mut self, index: usize, indirect: &ForeignAddress) -> Result<(), BindError> {
        self.bind_scalar(index, *indirect)
    }

    /// Store the address of an array buffer by table index. Binding through a
    /// descriptor handle is [`ArrayDescriptor::bind`].
    pub fn bind_array(&mut self, index: usize, address: ForeignAddress) -> Result<(), BindError> {
        let len = self.arrays.len();
        self.arrays
            .get_mut(index)
            .ok_or(BindError::ArrayOutOfRange { index, len })?
            .bind(address);
        Ok(())
    }

    /// Shape-sync entry point: store a foreign-order shape for an array.
    pub fn sync_shape(&mut self, index: usize, foreign_shape: &[i64]) -> Result<(), BindError> {
        let len = self.arrays.len();
        self.arrays
            .get_mut(index)
            .ok_or(BindError::ArrayOutOfRange { index, len })?
            .sync_shape(foreign_shape)
    }

    /// Clear the data slots of dynamic variables, as the nullify subroutine
    /// does for foreign pointers.
    pub fn nullify_dynamic(&mut self) {
        for s in self.scalars.iter_mut().filter(|s| s.dynamic) {
            s.data = None;
        }
        for a in self.arrays.iter_mut().filter(|a| a.dynamic) {
            a.data = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(name: &str, dynamic: bool) -> ScalarDescriptor {
        ScalarDescriptor {
            type_code: "NPY_LONG".into(),
            type_name: "integer".into(),
            name: name.into(),
            group: "g".into(),
            attributes: String::new(),
            comment: String::new(),
            dynamic,
            setter: None,
            getter: None,
            data: None,
        }
    }

    fn array(name: &str, rank: usize) -> ArrayDescriptor {
        ArrayDescriptor {
            type_code: "NPY_DOUBLE".into(),
            name: name.into(),
            group: "g".into(),
            attributes: String::new(),
            comment: String::new(),
            dimstring: String::new(),
            dynamic: true,
            rank,
            shape: Vec::new(),
            setter: None,
            getter: None,
            initial_value: "0".into(),
            data: None,
        }
    }

    #[test]
    fn bind_scalars_and_records() {
        let mut pkg = Package::new("m");
        let n = pkg.push_scalar(scalar("n", false));
        let r = pkg.push_scalar(scalar("part", false));
        pkg.bind_scalar(n, ForeignAddress::new(0x1000)).unwrap();
        pkg.bind_record(r, &ForeignAddress::new(0x2000)).unwrap();
        assert_eq!(pkg.scalars()[n].data, Some(ForeignAddress::new(0x1000)));
        assert_eq!(pkg.scalars()[r].data.map(ForeignAddress::raw), Some(0x2000));
        assert_eq!(
            pkg.bind_scalar(5, ForeignAddress::new(1)),
            Err(BindError::ScalarOutOfRange { index: 5, len: 2 })
        );
    }

    #[test]
    fn sync_shape_reverses_axes() {
        let mut pkg = Package::new("m");
        let i = pkg.push_array(array("field", 3));
        pkg.sync_shape(i, &[4, 5, 6]).unwrap();
        assert_eq!(pkg.arrays()[i].shape, vec![6, 5, 4]);
        assert_eq!(pkg.arrays()[i].element_count(), 120);

        let err = pkg.sync_shape(i, &[4, 5]).unwrap_err();
        assert!(matches!(err, BindError::RankMismatch { rank: 3, given: 2, .. }));
    }

    #[test]
    fn bind_array_by_index_and_handle() {
        let mut pkg = Package::new("m");
        let a = pkg.push_array(array("a", 1));
        let b = pkg.push_array(array("b", 1));
        pkg.bind_array(a, ForeignAddress::new(7)).unwrap();
        pkg.array_mut(b).unwrap().bind(ForeignAddress::new(9));
        assert_eq!(pkg.arrays()[a].data, Some(ForeignAddress::new(7)));
        assert_eq!(pkg.arrays()[b].data, Some(ForeignAddress::new(9)));

        pkg.nullify_dynamic();
        assert!(pkg.arrays().iter().all(|a| a.data.is_none()));
    }
}
