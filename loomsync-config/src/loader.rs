//! Loads and validates the declarative project configuration (spec.md §6).
//!
//! The TOML document is parsed twice: once into a generic [`toml::Value`] so
//! unrecognized keys can be reported as warnings without failing the load,
//! and once into the strongly-typed [`Config`] so every recognized field is
//! validated by its own type (the "schema" in spec.md §9's "enumerated,
//! schema-validated configuration" design note — there is no separate JSON
//! Schema document to keep in sync with the Rust types).

use std::path::Path;

use toml::Value;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::model::{Config, KNOWN_TOP_LEVEL_KEYS};
use crate::warnings::ConfigWarnings;

const KNOWN_NAMING_CONVENTIONS_KEYS: &[&str] = &["fileNaming", "identifierNaming", "componentNaming"];
const KNOWN_FORMATTING_KEYS: &[&str] =
    &["indentSize", "useTabs", "lineWidth", "semicolons", "trailingComma", "singleQuote"];
const KNOWN_SYNC_KEYS: &[&str] = &["enabled", "debounceMs", "excludePatterns", "testSync"];
const KNOWN_CONVERSION_KEYS: &[&str] =
    &["preserveComments", "generateDocumentation", "strictTypeChecking", "fallbackBehavior"];
const KNOWN_VALIDATION_KEYS: &[&str] = &["validateIR", "validateGenerated"];

fn scan_unknown_keys(table: &Value, known: &[&str], prefix: &str, warnings: &mut ConfigWarnings) {
    let Some(table) = table.as_table() else { return };
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            warnings.push_unknown_field(prefix, key);
        }
    }
}

/// Parse, validate, and return `(Config, warnings)` for the document at
/// `path`. Unknown fields never fail the load; missing required fields
/// (`mode`, `rootA`, `rootB`) or a field of the wrong shape do.
pub fn load(path: &Path) -> Result<(Config, ConfigWarnings)> {
    let text = std::fs::read_to_string(path)?;
    load_str(&text, &path.display().to_string())
}

/// As [`load`], but parses an in-memory document — used by tests and by
/// callers that already hold the document's bytes.
pub fn load_str(text: &str, source_label: &str) -> Result<(Config, ConfigWarnings)> {
    let raw: Value = toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: source_label.to_string(),
        reason: e.to_string(),
    })?;

    let mut warnings = ConfigWarnings::default();
    scan_unknown_keys(&raw, KNOWN_TOP_LEVEL_KEYS, "", &mut warnings);
    if let Some(sub) = raw.get("namingConventions") {
        scan_unknown_keys(sub, KNOWN_NAMING_CONVENTIONS_KEYS, "namingConventions.", &mut warnings);
    }
    if let Some(sub) = raw.get("formatting") {
        scan_unknown_keys(sub, KNOWN_FORMATTING_KEYS, "formatting.", &mut warnings);
    }
    if let Some(sub) = raw.get("sync") {
        scan_unknown_keys(sub, KNOWN_SYNC_KEYS, "sync.", &mut warnings);
    }
    if let Some(sub) = raw.get("conversion") {
        scan_unknown_keys(sub, KNOWN_CONVERSION_KEYS, "conversion.", &mut warnings);
    }
    if let Some(sub) = raw.get("validation") {
        scan_unknown_keys(sub, KNOWN_VALIDATION_KEYS, "validation.", &mut warnings);
    }

    let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: source_label.to_string(),
        reason: e.to_string(),
    })?;
    validate(&config)?;

    debug!(source = source_label, warning_count = warnings.len(), "configuration parsed");

    Ok((config, warnings))
}

/// Cross-field invariants the type system can't express: the two watch
/// roots must actually differ, and an optional `customMappings` document
/// must exist if given.
fn validate(config: &Config) -> Result<()> {
    if config.root_a == config.root_b {
        return Err(ConfigError::Invariant(format!(
            "rootA and rootB must be different directories, both were {}",
            config.root_a.display()
        )));
    }
    if let Some(mappings) = &config.custom_mappings {
        if !mappings.exists() {
            return Err(ConfigError::Invariant(format!(
                "customMappings path {} does not exist",
                mappings.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
mode = "universal"
rootA = "/project/a"
rootB = "/project/b"
"#;

    #[test]
    fn minimal_document_loads_with_defaults() {
        let (config, warnings) = load_str(MINIMAL, "test.toml").unwrap();
        assert_eq!(config.storage_dir, Path::new("./.ir"));
        assert!(config.sync.enabled);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unknown_top_level_field_is_a_warning_not_an_error() {
        let text = format!("{MINIMAL}\nunknownThing = true\n");
        let (_config, warnings) = load_str(&text, "test.toml").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.items().next().unwrap().message.contains("unknownThing"));
    }

    #[test]
    fn unknown_nested_field_is_scoped_in_the_warning() {
        let text = format!("{MINIMAL}\n[sync]\nbogus = 1\n");
        let (_config, warnings) = load_str(&text, "test.toml").unwrap();
        assert!(warnings.items().any(|w| w.message.contains("sync.bogus")));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = load_str("mode = \"universal\"\nrootA = \"/a\"\n", "test.toml").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn identical_roots_are_rejected() {
        let text = "mode = \"universal\"\nrootA = \"/same\"\nrootB = \"/same\"\n";
        let err = load_str(text, "test.toml").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invariant);
    }

    #[test]
    fn formatting_and_naming_overrides_round_trip() {
        let text = format!(
            "{MINIMAL}\n[formatting]\nindentSize = 4\nsingleQuote = true\n\n[namingConventions]\nfileNaming = \"kebab-case\"\n"
        );
        let (config, _warnings) = load_str(&text, "test.toml").unwrap();
        assert_eq!(config.formatting.indent_size, 4);
        assert!(config.formatting.single_quote);
        assert_eq!(
            config.naming_conventions.file_naming,
            crate::model::NamingConventionValue::KebabCase
        );
    }
}
