use std::collections::BTreeMap;
use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::foundation::core::Fragment;

const XXH3_SEED: u64 = 0x4f49_545f_7368_6164;

/// Stable identifier of a gather-shader variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderId(u64);

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A shader program name plus the preprocessor-style defines it was specialized with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderVariant {
    name: &'static str,
    defines: BTreeMap<&'static str, String>,
}

impl ShaderVariant {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            defines: BTreeMap::new(),
        }
    }

    pub fn define(mut self, key: &'static str, value: impl ToString) -> Self {
        self.defines.insert(key, value.to_string());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn defines(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.defines.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Hash of name and defines; equal variants share an id.
    pub fn id(&self) -> ShaderId {
        let mut h = Xxh3::with_seed(XXH3_SEED);
        h.update(self.name.as_bytes());
        for (k, v) in &self.defines {
            h.update(&[0xff]);
            h.update(k.as_bytes());
            h.update(&[b'=']);
            h.update(v.as_bytes());
        }
        ShaderId(h.digest())
    }
}

impl fmt::Display for ShaderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.defines {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

/// Per-fragment body of a gather shader.
///
/// Invoked concurrently for every fragment of a draw call. Implementations write into their
/// backend's per-pixel storage.
pub trait FragmentProgram: Sync {
    fn invoke(&self, fragment: &Fragment);
}

#[cfg(test)]
#[path = "../../tests/unit/raster/shader.rs"]
mod tests;
