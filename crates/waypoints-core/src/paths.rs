use crate::error::{Result, WaypointsError};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CLAUDE_DIR: &str = ".claude";
pub const INSTALL_DIR_NAME: &str = "waypoints";
pub const STATE_ROOT_NAME: &str = "tmp";
pub const SESSION_DIR_PREFIX: &str = "wp-";
pub const STATE_FILE: &str = "state.json";

pub const CONFIG_FILE: &str = "config/wp-config.json";
pub const OVERRIDE_FILE: &str = "wp-override.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LOG_DIR: &str = "logs";

pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `~/.claude`, the host application's configuration directory.
pub fn default_claude_dir() -> Result<PathBuf> {
    home::home_dir()
        .map(|h| h.join(CLAUDE_DIR))
        .ok_or(WaypointsError::HomeNotFound)
}

pub fn session_dir(state_root: &Path, session_id: &str) -> PathBuf {
    state_root.join(format!("{SESSION_DIR_PREFIX}{}", sanitize_session_id(session_id)))
}

pub fn state_path(state_root: &Path, session_id: &str) -> PathBuf {
    session_dir(state_root, session_id).join(STATE_FILE)
}

/// Session ids come from the host; keep them from escaping the state root.
fn sanitize_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Render `path` with the home directory collapsed to `~`.
pub fn display_with_tilde(path: &Path) -> String {
    if let Some(home) = home::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Resolved locations and limits for one process.
///
/// Built by the CLI from flags and environment; every field has a default
/// derived from `claude_dir`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub claude_dir: PathBuf,
    pub install_dir: PathBuf,
    pub config_file: PathBuf,
    pub override_file: PathBuf,
    pub state_root: PathBuf,
    pub default_profile: Option<String>,
    pub compile_timeout: Duration,
    pub test_timeout: Duration,
}

impl Settings {
    pub fn under(claude_dir: impl Into<PathBuf>) -> Self {
        let claude_dir = claude_dir.into();
        let install_dir = claude_dir.join(INSTALL_DIR_NAME);
        Self {
            config_file: install_dir.join(CONFIG_FILE),
            override_file: claude_dir.join(OVERRIDE_FILE),
            state_root: claude_dir.join(STATE_ROOT_NAME),
            install_dir,
            claude_dir,
            default_profile: None,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    /// Relocate the install root. The config file follows it.
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self.config_file = self.install_dir.join(CONFIG_FILE);
        self
    }

    pub fn settings_file(&self) -> PathBuf {
        self.claude_dir.join(SETTINGS_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.install_dir.join(LOG_DIR)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/claude/tmp");
        assert_eq!(
            state_path(root, "abc123"),
            PathBuf::from("/tmp/claude/tmp/wp-abc123/state.json")
        );
    }

    #[test]
    fn session_ids_cannot_escape_state_root() {
        let root = Path::new("/r");
        assert_eq!(session_dir(root, "../etc"), PathBuf::from("/r/wp-___etc"));
        assert_eq!(session_dir(root, ""), PathBuf::from("/r/wp-unknown"));
    }

    #[test]
    fn settings_defaults_follow_claude_dir() {
        let s = Settings::under("/c");
        assert_eq!(s.install_dir, PathBuf::from("/c/waypoints"));
        assert_eq!(s.config_file, PathBuf::from("/c/waypoints/config/wp-config.json"));
        assert_eq!(s.override_file, PathBuf::from("/c/wp-override.json"));
        assert_eq!(s.state_root, PathBuf::from("/c/tmp"));
        assert_eq!(s.settings_file(), PathBuf::from("/c/settings.json"));
    }

    #[test]
    fn install_dir_moves_config_file() {
        let s = Settings::under("/c").with_install_dir("/opt/wp");
        assert_eq!(s.config_file, PathBuf::from("/opt/wp/config/wp-config.json"));
        assert_eq!(s.log_dir(), PathBuf::from("/opt/wp/logs"));
    }
}
