//! Persisted scalar index of a generated module.
//!
//! After a module is generated its scalar name→index map and ordered scalar
//! list are written to `<module>.scalars`. Dependent modules load these files
//! as external dictionaries to resolve dimension identifiers that they do not
//! declare themselves.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, GenerationResult};
use crate::variable::Variable;

/// Extension of persisted scalar indexes.
pub const SCALAR_INDEX_EXTENSION: &str = "scalars";

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\.scalars$").expect("static pattern is valid")
    })
}

/// A module's published scalar dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarIndex {
    /// Owning module; its descriptor table is `<module>_fscalars`.
    pub module: String,
    /// Lower-cased scalar name → position in `scalars`.
    pub index: BTreeMap<String, usize>,
    /// Scalars in table order.
    pub scalars: Vec<Variable>,
}

impl ScalarIndex {
    /// Build the index of `scalars`, which must be in table order.
    pub fn from_scalars(module: impl Into<String>, scalars: &[Variable]) -> Self {
        let index = scalars
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.to_ascii_lowercase(), i))
            .collect();
        Self {
            module: module.into(),
            index,
            scalars: scalars.to_vec(),
        }
    }

    /// Table index of a scalar, matched case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_ascii_lowercase()).copied()
    }

    /// The scalar stored at `index`.
    pub fn scalar(&self, index: usize) -> Option<&Variable> {
        self.scalars.get(index)
    }

    /// Name of the C descriptor table holding these scalars.
    pub fn table_name(&self) -> String {
        format!("{}_fscalars", self.module)
    }

    /// File name the index of `module` is persisted under.
    pub fn file_name(module: &str) -> String {
        format!("{module}.{SCALAR_INDEX_EXTENSION}")
    }

    /// Write the index into `dir`, returning the path written.
    pub fn save(&self, dir: &Path) -> GenerationResult<PathBuf> {
        let path = dir.join(Self::file_name(&self.module));
        let json = serde_json::to_string_pretty(self).map_err(|source| {
            GenerationError::ScalarIndexFormat {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(|e| GenerationError::io(&path, e))?;
        log::debug!("wrote scalar index {}", path.display());
        Ok(path)
    }

    /// Load an index from a `<module>.scalars` file.
    pub fn load(path: &Path) -> GenerationResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let module = file_name_pattern()
            .captures(file_name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| GenerationError::InvalidScalarIndexPath {
                path: path.to_path_buf(),
            })?;

        let text = fs::read_to_string(path).map_err(|e| GenerationError::io(path, e))?;
        let mut loaded: ScalarIndex =
            serde_json::from_str(&text).map_err(|source| GenerationError::ScalarIndexFormat {
                path: path.to_path_buf(),
                source,
            })?;

        if loaded.module != module {
            log::warn!(
                "scalar index {} belongs to module {}, not {}",
                path.display(),
                loaded.module,
                module
            );
        }
        for scalar in &mut loaded.scalars {
            scalar.annotate();
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VarType;
    use tempdir::TempDir;

    fn sample() -> ScalarIndex {
        let scalars = vec![
            Variable::scalar("nx", VarType::Integer, "grid"),
            Variable::scalar("NY", VarType::Integer, "grid"),
            Variable::scalar("dt", VarType::Real, "time"),
        ];
        ScalarIndex::from_scalars("mesh", &scalars)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let idx = sample();
        assert_eq!(idx.lookup("NX"), Some(0));
        assert_eq!(idx.lookup("ny"), Some(1));
        assert_eq!(idx.lookup("dt"), Some(2));
        assert_eq!(idx.lookup("nz"), None);
        assert_eq!(idx.table_name(), "mesh_fscalars");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new("scalar_index").unwrap();
        let idx = sample();
        let path = idx.save(dir.path()).unwrap();
        assert!(path.ends_with("mesh.scalars"));

        let loaded = ScalarIndex::load(&path).unwrap();
        assert_eq!(loaded.module, "mesh");
        assert_eq!(loaded.lookup("ny"), Some(1));
        assert_eq!(loaded.scalar(2).unwrap().group, "time");
    }

    #[test]
    fn load_rejects_other_extensions() {
        let dir = TempDir::new("scalar_index").unwrap();
        let path = dir.path().join("mesh.json");
        std::fs::write(&path, "{}").unwrap();
        let err = ScalarIndex::load(&path).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidScalarIndexPath { .. }));
    }
}
