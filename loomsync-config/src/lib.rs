//! Declarative configuration model, loader, and CLI surface for loomsync
//! (spec.md §6).

pub mod cli;
pub mod error;
pub mod loader;
pub mod model;
pub mod warnings;

pub use error::{ConfigError, ErrorKind, Result};
pub use loader::{load, load_str};
pub use model::Config;
pub use warnings::{ConfigWarning, ConfigWarnings};
