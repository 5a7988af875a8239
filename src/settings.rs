//! Per-system plumbing consumed by external tooling: flat settings
//! descriptors and the save/load context shape. The core neither interprets
//! nor persists either; collaborators do.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

/// A typed setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Flat `key -> typed value` map a system exposes to control panels and
/// config tooling. Insertion order is preserved for display.
#[derive(Debug, Clone, Default)]
pub struct SettingsDescriptor {
    entries: Vec<(String, SettingValue)>,
}

impl SettingsDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chaining insert; an existing key is overwritten in place.
    pub fn with(mut self, key: impl Into<String>, value: SettingValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: SettingValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a system's persisted state lives, relative to a host-supplied base
/// directory, plus reader/writer factories over it.
#[derive(Debug, Clone)]
pub struct SaveContext {
    directory: String,
}

impl SaveContext {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Relative directory name for this system's state.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn open_reader(&self, base: &Path, file: &str) -> io::Result<Box<dyn Read>> {
        let path = base.join(&self.directory).join(file);
        Ok(Box::new(File::open(path)?))
    }

    pub fn open_writer(&self, base: &Path, file: &str) -> io::Result<Box<dyn Write>> {
        let dir = base.join(&self.directory);
        fs::create_dir_all(&dir)?;
        Ok(Box::new(File::create(dir.join(file))?))
    }
}
