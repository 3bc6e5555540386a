//! Linker-legal symbol names.
//!
//! Foreign linkers historically reject identifiers longer than 31 bytes.
//! Every cross-boundary routine name and every per-variable binder name goes
//! through [`NameMangler`], which keeps short names unchanged and folds long
//! ones into 31 bytes: the first 15 bytes of the full name followed by 16
//! letters derived from its MD5 digest.
//!
//! The scheme does not guarantee uniqueness. Two long names sharing their
//! first 15 characters whose digests map to the same letters would collide.
//! Dependent modules link against these names, so the algorithm must stay
//! exactly as it is.
//!
//! # Examples
//!
//! ```
//! use fstubgen_core::NameMangler;
//!
//! let mangler = NameMangler::new("wxy");
//! assert_eq!(mangler.symbol("setpointer", "nx"), "wxysetpointernx");
//!
//! let long = mangler.symbol("setpointer", "particle_velocity_history");
//! assert_eq!(long.len(), 31);
//! assert!(long.starts_with("wxysetpointerpa"));
//! ```

use md5::{Digest, Md5};

/// Longest symbol, in bytes, left untouched.
pub const MAX_SYMBOL_LEN: usize = 31;

/// Characters kept verbatim from a mangled name.
const KEPT_PREFIX: usize = 15;

const LOWERCASE: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Produces symbol names for one module.
#[derive(Debug, Clone)]
pub struct NameMangler {
    module: String,
}

impl NameMangler {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Symbol for `module + prefix + suffix`.
    pub fn symbol(&self, prefix: &str, suffix: &str) -> String {
        mangle(&format!("{}{}{}", self.module, prefix, suffix))
    }

    /// Name of the C wrapper for a routine or constructor: `module_name`.
    pub fn wrapper(&self, name: &str) -> String {
        format!("{}_{}", self.module, name)
    }
}

/// Fold `name` into at most 31 bytes.
///
/// Lengths are counted in bytes, which is what a linker sees. The kept prefix
/// is cut back to a character boundary, so a name with multi-byte characters
/// may come out shorter than 31 bytes.
pub fn mangle(name: &str) -> String {
    if name.len() <= MAX_SYMBOL_LEN {
        return name.to_string();
    }
    let mut end = KEPT_PREFIX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = name[..end].to_string();
    let digest = Md5::digest(name.as_bytes());
    out.extend(digest.iter().map(|&b| translate(b)));
    out
}

/// Map a digest byte through the 256-symbol table formed by repeating the
/// lowercase alphabet ten times and truncating to 256 entries.
fn translate(byte: u8) -> char {
    LOWERCASE[byte as usize % LOWERCASE.len()] as char
}
