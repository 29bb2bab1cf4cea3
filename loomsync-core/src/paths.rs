//! Path mirroring between the two framework roots, and the naming-convention
//! conversions applied to file stems along the way (spec.md §6).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ir::Framework;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    SnakeCase,
    KebabCase,
    PascalCase,
    CamelCase,
}

impl NamingConvention {
    /// Split `stem` into words on case boundaries, `_`, and `-`, then
    /// re-join under this convention.
    pub fn convert(self, stem: &str) -> String {
        let words = split_words(stem);
        match self {
            NamingConvention::SnakeCase => words.join("_").to_lowercase(),
            NamingConvention::KebabCase => words.join("-").to_lowercase(),
            NamingConvention::PascalCase => words.iter().map(|w| capitalize(w)).collect(),
            NamingConvention::CamelCase => words
                .iter()
                .enumerate()
                .map(|(i, w)| if i == 0 { w.to_lowercase() } else { capitalize(w) })
                .collect(),
        }
    }
}

fn split_words(stem: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in stem.chars() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        prev_lower = ch.is_lowercase();
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Mirrors paths between the two framework roots, applying each side's
/// naming convention and extension to the translated file stem.
#[derive(Debug, Clone)]
pub struct PathMirror {
    pub root_a: PathBuf,
    pub root_b: PathBuf,
    pub naming_a: NamingConvention,
    pub naming_b: NamingConvention,
    pub ext_a: String,
    pub ext_b: String,
}

impl PathMirror {
    pub fn new(root_a: impl Into<PathBuf>, root_b: impl Into<PathBuf>) -> Self {
        Self {
            root_a: root_a.into(),
            root_b: root_b.into(),
            naming_a: NamingConvention::PascalCase,
            naming_b: NamingConvention::SnakeCase,
            ext_a: "tsx".to_string(),
            ext_b: "dart".to_string(),
        }
    }

    fn root(&self, framework: Framework) -> &Path {
        match framework {
            Framework::A => &self.root_a,
            Framework::B => &self.root_b,
        }
    }

    fn naming(&self, framework: Framework) -> NamingConvention {
        match framework {
            Framework::A => self.naming_a,
            Framework::B => self.naming_b,
        }
    }

    fn ext(&self, framework: Framework) -> &str {
        match framework {
            Framework::A => &self.ext_a,
            Framework::B => &self.ext_b,
        }
    }

    /// Compute the mirrored path for `path` (which must live under `from`'s
    /// root) on `from.other()`'s root.
    pub fn mirror(&self, path: &Path, from: Framework) -> Result<PathBuf> {
        let source_root = self.root(from);
        let relative = path.strip_prefix(source_root).map_err(|_| {
            CoreError::Invariant(format!(
                "{} is not under the {} watch root {}",
                path.display(),
                from,
                source_root.display()
            ))
        })?;

        let target = from.other();
        let stem = relative
            .file_stem()
            .ok_or_else(|| CoreError::Invariant(format!("{} has no file stem", path.display())))?
            .to_string_lossy();
        let converted_stem = self.naming(target).convert(&stem);

        let mut target_path = self.root(target).join(relative.parent().unwrap_or(Path::new("")));
        target_path.push(converted_stem);
        target_path.set_extension(self.ext(target));
        Ok(target_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_case_to_snake_case() {
        assert_eq!(NamingConvention::SnakeCase.convert("UserProfile"), "user_profile");
    }

    #[test]
    fn snake_case_to_pascal_case() {
        assert_eq!(NamingConvention::PascalCase.convert("user_profile"), "UserProfile");
    }

    #[test]
    fn kebab_and_camel_round_trip_words() {
        assert_eq!(NamingConvention::KebabCase.convert("UserProfile"), "user-profile");
        assert_eq!(NamingConvention::CamelCase.convert("user_profile"), "userProfile");
    }

    #[test]
    fn mirror_replaces_root_stem_case_and_extension() {
        let mirror = PathMirror::new("/project/a", "/project/b");
        let mirrored = mirror
            .mirror(Path::new("/project/a/screens/UserProfile.tsx"), Framework::A)
            .unwrap();
        assert_eq!(mirrored, PathBuf::from("/project/b/screens/user_profile.dart"));
    }

    #[test]
    fn mirror_rejects_paths_outside_the_source_root() {
        let mirror = PathMirror::new("/project/a", "/project/b");
        assert!(mirror
            .mirror(Path::new("/elsewhere/UserProfile.tsx"), Framework::A)
            .is_err());
    }
}
