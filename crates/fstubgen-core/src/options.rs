//! Generator configuration.
//!
//! Options are consumed, not owned: the command-line layer (or a config file)
//! fills a [`GeneratorOptions`] and hands it to the assembler.

use serde::Deserialize;

/// Source form of the emitted foreign code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Free-form source (`.F90`) with modules and pointer binders.
    #[default]
    Free,
    /// Fixed-form source (`.m`) with `Use(...)` macros and DATA statements.
    Fixed,
}

impl Dialect {
    /// Longest line the foreign compiler accepts.
    pub fn line_limit(self) -> usize {
        match self {
            Dialect::Free => 132,
            Dialect::Fixed => 72,
        }
    }

    /// Extension of the foreign linkage artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Dialect::Free => "F90",
            Dialect::Fixed => "m",
        }
    }
}

/// Identity of the foreign compiler.
///
/// Only a handful of emitted constructs depend on it: the storage-duration
/// attribute on module variables, runtime initialisation in module init, and
/// the number of trailing underscores on linker symbols.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Toolchain {
    name: Option<String>,
}

impl Toolchain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Identity string, empty when unknown.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Attribute appended to module variable declarations.
    pub fn save_attribute(&self) -> &'static str {
        if self.name() == "xlf" { ",SAVE" } else { "" }
    }

    /// Whether the compiler's runtime must be initialised from module init.
    pub fn needs_runtime_init(&self) -> bool {
        self.name() == "nag"
    }

    /// Whether symbols containing an underscore get a second trailing one.
    pub fn double_underscores(&self) -> bool {
        matches!(self.name(), "g77" | "g95")
    }

    /// C-visible name of a foreign symbol.
    pub fn link_name(&self, symbol: &str) -> String {
        let lower = symbol.to_ascii_lowercase();
        if self.name() == "xlf" {
            lower
        } else if self.double_underscores() && lower.contains('_') {
            format!("{lower}__")
        } else {
            format!("{lower}_")
        }
    }
}

/// Options for one generation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    pub dialect: Dialect,
    /// Emit foreign module declarations for each group.
    pub write_modules: bool,
    /// Accumulate CPU time spent in each routine into `<routine>runtime`.
    pub time_routines: bool,
    /// Allocate every dynamic group when the module is imported.
    pub initial_allocation: bool,
    pub toolchain: Toolchain,
    /// Calling convention passes character lengths after all arguments.
    pub string_lengths_at_end: bool,
    /// Integer kind used for indices and addresses on the foreign side.
    pub index_kind: u8,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::Free,
            write_modules: true,
            time_routines: false,
            initial_allocation: false,
            toolchain: Toolchain::default(),
            string_lengths_at_end: true,
            index_kind: 8,
        }
    }
}

impl GeneratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_write_modules(mut self, write_modules: bool) -> Self {
        self.write_modules = write_modules;
        self
    }

    pub fn with_time_routines(mut self, time_routines: bool) -> Self {
        self.time_routines = time_routines;
        self
    }

    pub fn with_initial_allocation(mut self, initial_allocation: bool) -> Self {
        self.initial_allocation = initial_allocation;
        self
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_string_lengths_at_end(mut self, at_end: bool) -> Self {
        self.string_lengths_at_end = at_end;
        self
    }

    pub fn is_free_form(&self) -> bool {
        self.dialect == Dialect::Free
    }

    /// `int(<value>,<kind>)`, the foreign spelling of an index literal.
    pub fn index_literal(&self, value: i64) -> String {
        format!("int({value},{})", self.index_kind)
    }
}
