//! Per-mode read-only enforcement and source-of-truth selection (C6).

use serde::{Deserialize, Serialize};

use crate::ir::Framework;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    AFirst,
    BFirst,
    Universal,
}

/// Answers the two questions every other component needs of the active
/// mode: whether a framework's sources are generated output right now, and
/// which framework a given change should regenerate.
#[derive(Debug, Clone, Copy)]
pub struct ModeController {
    mode: Mode,
}

impl ModeController {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// `true` if edits to `framework` are treated as generated output and
    /// should not be converted back into IR.
    pub fn is_read_only(&self, framework: Framework) -> bool {
        match self.mode {
            Mode::AFirst => framework == Framework::B,
            Mode::BFirst => framework == Framework::A,
            Mode::Universal => false,
        }
    }

    /// The framework a change on `source` should be regenerated into.
    pub fn target_framework(&self, source: Framework) -> Framework {
        source.other()
    }

    /// Conflict detection only makes sense when both sides are
    /// authoritative; in a `*-first` mode the read-only side can never
    /// race with the authoritative one.
    pub fn conflict_detection_enabled(&self) -> bool {
        matches!(self.mode, Mode::Universal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_first_treats_b_as_read_only() {
        let controller = ModeController::new(Mode::AFirst);
        assert!(controller.is_read_only(Framework::B));
        assert!(!controller.is_read_only(Framework::A));
        assert!(!controller.conflict_detection_enabled());
    }

    #[test]
    fn universal_has_no_read_only_side_and_enables_conflicts() {
        let controller = ModeController::new(Mode::Universal);
        assert!(!controller.is_read_only(Framework::A));
        assert!(!controller.is_read_only(Framework::B));
        assert!(controller.conflict_detection_enabled());
    }

    #[test]
    fn target_framework_is_always_the_opposite_side() {
        let controller = ModeController::new(Mode::Universal);
        assert_eq!(controller.target_framework(Framework::A), Framework::B);
        assert_eq!(controller.target_framework(Framework::B), Framework::A);
    }
}
