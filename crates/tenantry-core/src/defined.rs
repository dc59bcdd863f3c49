//! "Defined fields" tracking for partial updates.
//!
//! Rust structs do not remember which fields the originating payload
//! actually carried. A record that stores a `DefinedFields` (via
//! `#[tenantry(defined_fields)]`) is persisted in partial mode: only the
//! named fields are written on update.

use std::collections::BTreeSet;

/// The set of field names explicitly present in a record's source payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinedFields {
    names: BTreeSet<String>,
}

impl DefinedFields {
    /// An empty set. A record carrying it writes no data columns on update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit field names.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Collect the top-level keys of a JSON object payload.
    ///
    /// Anything other than an object yields an empty set.
    #[must_use]
    pub fn from_json_keys(payload: &serde_json::Value) -> Self {
        match payload {
            serde_json::Value::Object(map) => Self::from_names(map.keys().cloned()),
            _ => Self::new(),
        }
    }

    /// Mark a field as defined.
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DefinedFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_names(iter)
    }
}
