//! Which files may be edited in which phase.

use crate::format;
use crate::profile::Profile;
use crate::types::{FileClass, Phase};
use std::path::Path;

/// Classify `path` under `profile`.
///
/// Test patterns win over main patterns, since most toolchains keep tests
/// beside the code (`foo_test.go` also matches `*.go`). Anything matching the
/// profile's config pattern is `Other` so build files stay editable.
pub fn classify(path: &Path, profile: &Profile) -> FileClass {
    if profile.is_config(path) {
        FileClass::Other
    } else if profile.is_test_source(path) {
        FileClass::TestSource
    } else if profile.is_main_source(path) {
        FileClass::MainSource
    } else {
        FileClass::Other
    }
}

/// Whether `class` is editable in `phase`.
pub fn allows(phase: Phase, class: FileClass) -> bool {
    match (phase, class) {
        (_, FileClass::Other) => true,
        (Phase::Requirements, _) => false,
        (Phase::Interfaces, FileClass::MainSource) => true,
        (Phase::Interfaces, FileClass::TestSource) => false,
        (Phase::Tests, FileClass::MainSource) => false,
        (Phase::Tests, FileClass::TestSource) => true,
        (Phase::Implementation, _) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Block { reason: String, context: String },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Decide an edit of `path` in `phase`. Without a profile nothing is blocked.
pub fn decide(phase: Phase, path: &Path, profile: Option<&Profile>) -> GuardDecision {
    let Some(profile) = profile else {
        return GuardDecision::Allow;
    };
    if allows(phase, classify(path, profile)) {
        return GuardDecision::Allow;
    }
    GuardDecision::Block {
        reason: format::guard_reason(phase),
        context: format::guard_context(phase, path, profile.display_name()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
