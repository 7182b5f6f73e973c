use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One of the four ordered workflow stages.
///
/// Serialized as its number (1-4) in the state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Phase {
    Requirements,
    Interfaces,
    Tests,
    Implementation,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Requirements,
            Phase::Interfaces,
            Phase::Tests,
            Phase::Implementation,
        ]
    }

    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    pub fn from_number(n: u8) -> Option<Phase> {
        Phase::all().get(usize::from(n).checked_sub(1)?).copied()
    }

    pub fn next(self) -> Option<Phase> {
        Phase::from_number(self.number() + 1)
    }

    /// Key used in `completedPhases` and in `mark-complete` commands.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Requirements => "requirements",
            Phase::Interfaces => "interfaces",
            Phase::Tests => "tests",
            Phase::Implementation => "implementation",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Phase::Requirements => "Requirements",
            Phase::Interfaces => "Interfaces",
            Phase::Tests => "Tests",
            Phase::Implementation => "Implementation",
        }
    }

    /// Human-readable banner used in status and block messages.
    pub fn banner(self) -> &'static str {
        match self {
            Phase::Requirements => "Requirements Gathering",
            Phase::Interfaces => "Interface Design",
            Phase::Tests => "Test Writing",
            Phase::Implementation => "Implementation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Phase> for u8 {
    fn from(p: Phase) -> u8 {
        p.number()
    }
}

impl TryFrom<u8> for Phase {
    type Error = crate::error::WaypointsError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Phase::from_number(n).ok_or_else(|| crate::error::WaypointsError::InvalidPhase(n.to_string()))
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::WaypointsError;

    /// Accepts either the phase number or its name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return Phase::try_from(n);
        }
        match s.to_ascii_lowercase().as_str() {
            "requirements" => Ok(Phase::Requirements),
            "interfaces" => Ok(Phase::Interfaces),
            "tests" => Ok(Phase::Tests),
            "implementation" => Ok(Phase::Implementation),
            _ => Err(crate::error::WaypointsError::InvalidPhase(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FileClass
// ---------------------------------------------------------------------------

/// How the active profile classifies a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    MainSource,
    TestSource,
    Other,
}

impl FileClass {
    pub fn is_source(self) -> bool {
        !matches!(self, FileClass::Other)
    }
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileClass::MainSource => "main source",
            FileClass::TestSource => "test source",
            FileClass::Other => "other",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
