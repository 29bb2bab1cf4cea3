//! Declarative project configuration (spec.md §6): a single TOML document
//! at the project root describing sync mode, watch roots, naming and
//! formatting conventions, and conversion/validation behavior.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use loomsync_core::mode::Mode;
use loomsync_core::paths::NamingConvention;

/// Wire representation of [`Mode`]; spec.md §6 fixes the literal strings
/// `A-first | B-first | universal`, which don't match `Mode`'s own
/// `kebab-case` derive (`a-first`/`b-first`), so this crate owns its own
/// serde mapping and converts at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeValue {
    #[serde(rename = "A-first")]
    AFirst,
    #[serde(rename = "B-first")]
    BFirst,
    #[serde(rename = "universal")]
    Universal,
}

impl From<ModeValue> for Mode {
    fn from(value: ModeValue) -> Self {
        match value {
            ModeValue::AFirst => Mode::AFirst,
            ModeValue::BFirst => Mode::BFirst,
            ModeValue::Universal => Mode::Universal,
        }
    }
}

/// Wire representation of [`NamingConvention`]; same rationale as
/// [`ModeValue`] — spec.md §6 fixes `snake_case | kebab-case | PascalCase |
/// camelCase` literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamingConventionValue {
    #[serde(rename = "snake_case")]
    SnakeCase,
    #[serde(rename = "kebab-case")]
    KebabCase,
    #[serde(rename = "PascalCase")]
    PascalCase,
    #[serde(rename = "camelCase")]
    CamelCase,
}

impl From<NamingConventionValue> for NamingConvention {
    fn from(value: NamingConventionValue) -> Self {
        match value {
            NamingConventionValue::SnakeCase => NamingConvention::SnakeCase,
            NamingConventionValue::KebabCase => NamingConvention::KebabCase,
            NamingConventionValue::PascalCase => NamingConvention::PascalCase,
            NamingConventionValue::CamelCase => NamingConvention::CamelCase,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackBehavior {
    Warn,
    Error,
    Ignore,
}

impl Default for FallbackBehavior {
    fn default() -> Self {
        FallbackBehavior::Warn
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamingConventionsConfig {
    #[serde(default = "default_file_naming")]
    pub file_naming: NamingConventionValue,
    #[serde(default = "default_identifier_naming")]
    pub identifier_naming: NamingConventionValue,
    #[serde(default = "default_component_naming")]
    pub component_naming: NamingConventionValue,
}

fn default_file_naming() -> NamingConventionValue {
    NamingConventionValue::SnakeCase
}
fn default_identifier_naming() -> NamingConventionValue {
    NamingConventionValue::CamelCase
}
fn default_component_naming() -> NamingConventionValue {
    NamingConventionValue::PascalCase
}

impl Default for NamingConventionsConfig {
    fn default() -> Self {
        Self {
            file_naming: default_file_naming(),
            identifier_naming: default_identifier_naming(),
            component_naming: default_component_naming(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingConfig {
    #[serde(default = "default_indent_size")]
    pub indent_size: u8,
    #[serde(default)]
    pub use_tabs: bool,
    #[serde(default = "default_line_width")]
    pub line_width: u32,
    #[serde(default = "default_true")]
    pub semicolons: bool,
    #[serde(default)]
    pub trailing_comma: bool,
    #[serde(default)]
    pub single_quote: bool,
}

fn default_indent_size() -> u8 {
    2
}
fn default_line_width() -> u32 {
    80
}
fn default_true() -> bool {
    true
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            indent_size: default_indent_size(),
            use_tabs: false,
            line_width: default_line_width(),
            semicolons: true,
            trailing_comma: false,
            single_quote: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub test_sync: bool,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { enabled: true, debounce_ms: default_debounce_ms(), exclude_patterns: Vec::new(), test_sync: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    #[serde(default = "default_true")]
    pub preserve_comments: bool,
    #[serde(default)]
    pub generate_documentation: bool,
    #[serde(default)]
    pub strict_type_checking: bool,
    #[serde(default)]
    pub fallback_behavior: FallbackBehavior,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    #[serde(default = "default_true", rename = "validateIR")]
    pub validate_ir: bool,
    #[serde(default = "default_true")]
    pub validate_generated: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { validate_ir: true, validate_generated: true }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./.ir")
}

/// Top-level declarative project configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mode: ModeValue,
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub custom_mappings: Option<PathBuf>,
    #[serde(default)]
    pub naming_conventions: NamingConventionsConfig,
    #[serde(default)]
    pub formatting: FormattingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// The fields this crate recognizes at the top level. Used by [`crate::load`]
/// to report unrecognized keys as warnings instead of failing the load
/// (spec.md §6: "unknown fields produce a warning and are ignored").
pub const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "mode",
    "rootA",
    "rootB",
    "storageDir",
    "customMappings",
    "namingConventions",
    "formatting",
    "sync",
    "conversion",
    "validation",
];
