//! Environment bindings
//!
//! Variables are collected from a `.env` file, the process environment and
//! explicit `KEY=VALUE` overrides, in that order of increasing precedence.
//! The resulting [`Environment`] feeds variable substitution in the
//! descriptor.

pub mod file;
pub mod interpolate;

pub use file::{EnvFile, DEFAULT_ENV_FILE};
pub use interpolate::{referenced_variables, Interpolator};

use crate::error::{Result, StackError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where a binding came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "path")]
pub enum Source {
    /// An env file on disk
    DotEnv(PathBuf),
    /// The env file compiled into the binary
    Embedded,
    /// The process environment
    Process,
    /// An explicit override
    Override,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::DotEnv(path) => write!(f, "{}", path.display()),
            Source::Embedded => write!(f, "embedded .env"),
            Source::Process => write!(f, "process"),
            Source::Override => write!(f, "override"),
        }
    }
}

/// A single variable binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub value: String,
    pub source: Source,
}

/// Set of variable bindings used for substitution
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: BTreeMap<String, Binding>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an environment from literal pairs, tagged as overrides
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::new();
        for (key, value) in pairs {
            env.set(key, value, Source::Override);
        }
        env
    }

    /// Set a variable, replacing any earlier binding
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, source: Source) {
        self.vars.insert(
            key.into(),
            Binding {
                value: value.into(),
                source,
            },
        );
    }

    /// Get a variable value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|b| b.value.as_str())
    }

    /// Get a variable together with its source
    pub fn binding(&self, key: &str) -> Option<&Binding> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Binding)> {
        self.vars.iter()
    }

    /// Apply parsed env file entries
    pub fn extend_entries(&mut self, entries: Vec<(String, String)>, source: Source) {
        for (key, value) in entries {
            self.set(key, value, source.clone());
        }
    }

    /// Load an env file from disk, returning its entries in file order
    pub fn load_dotenv(&mut self, path: &Path) -> Result<Vec<(String, String)>> {
        let entries = EnvFile::load(path)?;
        tracing::debug!("Loaded {} variables from {}", entries.len(), path.display());
        self.extend_entries(entries.clone(), Source::DotEnv(path.to_path_buf()));
        Ok(entries)
    }

    /// Load the env file compiled into the binary
    pub fn load_embedded(&mut self, content: &str) -> Result<()> {
        let entries = EnvFile::parse_str(content, Path::new(DEFAULT_ENV_FILE))?;
        self.extend_entries(entries, Source::Embedded);
        Ok(())
    }

    /// Overlay values from the process environment for the given keys.
    ///
    /// Process variables take precedence over env file values.
    pub fn overlay_process<'a, I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            if let Ok(value) = std::env::var(key) {
                tracing::debug!("Using {} from process environment", key);
                self.set(key, value, Source::Process);
            }
        }
    }

    /// Apply `KEY=VALUE` overrides
    pub fn apply_overrides(&mut self, overrides: &[String]) -> Result<()> {
        for item in overrides {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                StackError::InvalidConfig(format!("override '{}' must be KEY=VALUE", item))
            })?;
            if key.is_empty() {
                return Err(StackError::InvalidConfig(format!(
                    "override '{}' has an empty key",
                    item
                )));
            }
            self.set(key, value, Source::Override);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layering_order() {
        let mut env = Environment::new();
        env.load_embedded("A=1\nB=2\n").unwrap();
        env.apply_overrides(&["B=3".to_string()]).unwrap();

        assert_eq!(env.get("A"), Some("1"));
        assert_eq!(env.get("B"), Some("3"));
        assert_eq!(env.binding("A").unwrap().source, Source::Embedded);
        assert_eq!(env.binding("B").unwrap().source, Source::Override);
    }

    #[test]
    fn test_invalid_override() {
        let mut env = Environment::new();
        assert!(env.apply_overrides(&["NOEQUALS".to_string()]).is_err());
        assert!(env.apply_overrides(&["=x".to_string()]).is_err());
        env.apply_overrides(&["EMPTY=".to_string()]).unwrap();
        assert_eq!(env.get("EMPTY"), Some(""));
    }

    #[test]
    fn test_process_overlay_only_touches_requested_keys() {
        let mut env = Environment::from_pairs([("PATH", "from-file")]);
        env.overlay_process(["RAGSTACK_SURELY_UNSET_VARIABLE"]);

        assert_eq!(env.get("PATH"), Some("from-file"));
        assert!(!env.contains("RAGSTACK_SURELY_UNSET_VARIABLE"));
        assert_eq!(env.len(), 1);
    }
}
