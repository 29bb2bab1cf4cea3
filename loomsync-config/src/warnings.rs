//! Non-fatal configuration diagnostics surfaced during [`crate::load`].
//!
//! Spec.md §6: "unknown fields produce a warning and are ignored" rather
//! than failing the load. `ConfigWarning` keeps the structured path instead
//! of bindings flattening it into a single formatted string, so a caller
//! (e.g. `loomsyncd`'s startup log) can decide how to render it.

use std::fmt;

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigWarnings {
    items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>, hint: Option<String>) {
        self.items.push(ConfigWarning { message: message.into(), hint });
    }

    /// Records a warning for a TOML key under `prefix` (empty for top-level)
    /// that the config model doesn't recognize.
    pub fn push_unknown_field(&mut self, prefix: &str, key: &str) {
        self.items.push(ConfigWarning {
            message: format!("unrecognized configuration field `{prefix}{key}` was ignored"),
            hint: Some("check for a typo or a field from a newer schema version".to_string()),
        });
    }

    pub fn items(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
