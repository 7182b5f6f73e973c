use crate::error::{Result, WaypointsError};
use crate::paths;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletedPhases {
    pub requirements: bool,
    pub interfaces: bool,
    pub tests: bool,
    pub implementation: bool,
}

impl CompletedPhases {
    pub fn get(&self, phase: Phase) -> bool {
        match phase {
            Phase::Requirements => self.requirements,
            Phase::Interfaces => self.interfaces,
            Phase::Tests => self.tests,
            Phase::Implementation => self.implementation,
        }
    }

    fn set(&mut self, phase: Phase) {
        match phase {
            Phase::Requirements => self.requirements = true,
            Phase::Interfaces => self.interfaces = true,
            Phase::Tests => self.tests = true,
            Phase::Implementation => self.implementation = true,
        }
    }
}

/// Free-text distillations carried from one phase into the later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summaries {
    pub requirements: String,
    pub interfaces: String,
    pub tests: String,
}

impl Summaries {
    pub fn get(&self, phase: Phase) -> Option<&str> {
        let s = match phase {
            Phase::Requirements => &self.requirements,
            Phase::Interfaces => &self.interfaces,
            Phase::Tests => &self.tests,
            Phase::Implementation => return None,
        };
        Some(s.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metadata {
    pub started_at: Option<DateTime<Utc>>,
    pub workflow_id: String,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_phase")]
    pub phase: Phase,
    #[serde(default)]
    pub completed_phases: CompletedPhases,
    #[serde(default)]
    pub summaries: Summaries,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_version() -> u32 {
    1
}

fn default_phase() -> Phase {
    Phase::Requirements
}

impl Default for SessionState {
    fn default() -> Self {
        Self::inactive()
    }
}

impl SessionState {
    /// The state of a session that has never started or has been cleaned up.
    pub fn inactive() -> Self {
        Self {
            version: default_version(),
            active: false,
            phase: Phase::Requirements,
            completed_phases: CompletedPhases::default(),
            summaries: Summaries::default(),
            metadata: Metadata::default(),
        }
    }

    /// A freshly started workflow in phase 1.
    pub fn start(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            active: true,
            metadata: Metadata {
                started_at: Some(now),
                workflow_id: now.format("%Y%m%d-%H%M%S").to_string(),
                session_id: session_id.to_string(),
            },
            ..Self::inactive()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Move forward to `target`. Phases never move backwards while active.
    pub fn advance_to(&mut self, target: Phase) -> Result<()> {
        if target < self.phase {
            return Err(WaypointsError::InvalidTransition {
                from: self.phase.number(),
                to: target.number(),
                reason: "phases only move forward; use reset to start over".to_string(),
            });
        }
        self.phase = target;
        Ok(())
    }

    /// Set the completion flag for `phase`. Only the current or an earlier
    /// phase can be completed.
    pub fn mark_complete(&mut self, phase: Phase) -> Result<()> {
        if phase > self.phase {
            return Err(WaypointsError::InvalidTransition {
                from: self.phase.number(),
                to: phase.number(),
                reason: format!("cannot complete {} before reaching it", phase.as_str()),
            });
        }
        self.completed_phases.set(phase);
        Ok(())
    }

    pub fn set_summary(&mut self, phase: Phase, text: impl Into<String>) -> Result<()> {
        let slot = match phase {
            Phase::Requirements => &mut self.summaries.requirements,
            Phase::Interfaces => &mut self.summaries.interfaces,
            Phase::Tests => &mut self.summaries.tests,
            Phase::Implementation => {
                return Err(WaypointsError::InvalidPhase(
                    "implementation has no summary".to_string(),
                ))
            }
        };
        *slot = text.into();
        Ok(())
    }

    /// Deactivate after a successful workflow. `implementation` stays set as
    /// the success indicator; metadata is kept.
    pub fn finish(&mut self) {
        self.active = false;
        self.phase = Phase::Requirements;
        self.completed_phases.requirements = false;
        self.completed_phases.interfaces = false;
        self.completed_phases.tests = false;
    }

    /// Abandon the workflow entirely. Metadata survives for the record.
    pub fn reset(&mut self) {
        let metadata = std::mem::take(&mut self.metadata);
        *self = Self {
            metadata,
            ..Self::inactive()
        };
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Persistence for session state. The orchestrator is the only writer.
pub trait StateStore {
    /// Missing state loads as [`SessionState::inactive`].
    fn load(&self, session_id: &str) -> Result<SessionState>;
    fn save(&self, session_id: &str, state: &SessionState) -> Result<()>;
    fn delete(&self, session_id: &str) -> Result<()>;
    /// Where the state lives, for user-facing messages.
    fn location(&self, session_id: &str) -> String;
}

/// Load state for a hook invocation: a corrupt file is logged and treated as
/// inactive so the host is never blocked by it.
pub fn load_lenient(store: &dyn StateStore, session_id: &str) -> Result<SessionState> {
    match store.load(session_id) {
        Err(WaypointsError::CorruptState { path, reason }) => {
            warn!(path = %path.display(), %reason, "ignoring corrupt state file");
            Ok(SessionState::inactive())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// FileStateStore
// ---------------------------------------------------------------------------

/// One `state.json` per session under `<state_root>/wp-<session_id>/`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    state_root: PathBuf,
}

impl FileStateStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        paths::state_path(&self.state_root, session_id)
    }

    pub fn display_dir(&self, session_id: &str) -> String {
        paths::display_with_tilde(&paths::session_dir(&self.state_root, session_id))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, session_id: &str) -> Result<SessionState> {
        let path = self.path_for(session_id);
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionState::inactive())
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|e| WaypointsError::CorruptState {
            path,
            reason: e.to_string(),
        })
    }

    fn save(&self, session_id: &str, state: &SessionState) -> Result<()> {
        crate::io::write_json(&self.path_for(session_id), state)
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let dir = paths::session_dir(&self.state_root, session_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self, session_id: &str) -> String {
        self.display_dir(session_id)
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(session_id: &str, state: SessionState) -> Self {
        let store = Self::new();
        store.sessions_mut().insert(session_id.to_string(), state);
        store
    }

    fn sessions_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionState>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions_mut().contains_key(session_id)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, session_id: &str) -> Result<SessionState> {
        Ok(self
            .sessions_mut()
            .get(session_id)
            .cloned()
            .unwrap_or_else(SessionState::inactive))
    }

    fn save(&self, session_id: &str, state: &SessionState) -> Result<()> {
        self.sessions_mut()
            .insert(session_id.to_string(), state.clone());
        Ok(())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions_mut().remove(session_id);
        Ok(())
    }

    fn location(&self, session_id: &str) -> String {
        format!("memory:{session_id}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
