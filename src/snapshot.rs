//! Environment snapshot - the runtime-activation profile of the built image.
//!
//! Declarations are folded in order: a repeated name overwrites the value
//! but keeps the position of its first occurrence, so the persisted profile
//! is identical across runs for the same declarations.

use indexmap::IndexMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::common::write_atomic;
use crate::error::ProvisionError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: IndexMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Fold ordered declarations into a snapshot (last write wins).
    pub fn capture<I, K, V>(declared: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = IndexMap::new();
        for (name, value) in declared {
            // IndexMap::insert keeps the existing slot for a known key.
            vars.insert(name.into(), value.into());
        }
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Profile text: one `name=value` line per variable, in snapshot order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.vars {
            out.push_str(name);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Write the profile to `root/relative` atomically. Returns the full path.
    pub fn persist(&self, root: &Path, relative: &Path) -> Result<PathBuf, ProvisionError> {
        let path = root.join(relative);
        write_atomic(&path, self.render())?;
        tracing::info!(path = %path.display(), vars = self.len(), "persisted environment profile");
        Ok(path)
    }

    /// Read a previously persisted profile. `Ok(None)` if there is none.
    pub fn load(root: &Path, relative: &Path) -> Result<Option<Self>, ProvisionError> {
        let path = root.join(relative);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProvisionError::io("read profile", path, e)),
        };

        let pairs = content
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='));
        Ok(Some(Self::capture(pairs)))
    }
}
