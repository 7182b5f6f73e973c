//! Registering the hooks in the host's `settings.json`.
//!
//! The document is edited as a `serde_json::Value` so keys we do not know
//! about survive untouched.

use crate::error::{Result, WaypointsError};
use serde_json::{json, Map, Value};
use std::path::Path;

/// Lets the assistant run `true # wp:...` directives without a prompt.
pub const DIRECTIVE_PERMISSION: &str = "Bash(true # wp:*)";

const EDIT_MATCHER: &str = "Write|Edit|MultiEdit";
/// Seconds the host waits for hooks that never build anything.
const QUICK_TIMEOUT_SECS: u64 = 10;

/// (event, matcher, runs builds)
const HOOKS: &[(&str, Option<&str>, bool)] = &[
    ("PreToolUse", Some("Bash"), false),
    ("PreToolUse", Some(EDIT_MATCHER), false),
    ("PostToolUse", Some(EDIT_MATCHER), true),
    ("Stop", None, true),
    ("SessionEnd", None, false),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub hooks_changed: usize,
    pub permission_changed: bool,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.hooks_changed > 0 || self.permission_changed
    }
}

fn quote(arg: &str) -> String {
    if arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

/// The command line the host runs for every event.
pub fn hook_command(binary: &Path, global_args: &[String]) -> String {
    let mut parts = vec![quote(&binary.display().to_string())];
    parts.extend(global_args.iter().map(|a| quote(a)));
    parts.push("hook".to_string());
    parts.join(" ")
}

/// True for any command line that invokes a waypoints binary's `hook`
/// subcommand, wherever the binary lives.
pub fn is_waypoints_hook(command: &str) -> bool {
    let command = command.trim();
    let (program, args) = match command.strip_prefix('"') {
        Some(quoted) => match quoted.split_once('"') {
            Some(split) => split,
            None => return false,
        },
        None => command.split_once(char::is_whitespace).unwrap_or((command, "")),
    };
    let named_waypoints = Path::new(program)
        .file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with("waypoints"));
    named_waypoints && args.split_whitespace().last() == Some("hook")
}

fn root_object<'a>(settings: &'a mut Value, origin: &Path) -> Result<&'a mut Map<String, Value>> {
    settings
        .as_object_mut()
        .ok_or_else(|| WaypointsError::MalformedConfig {
            path: origin.to_path_buf(),
            reason: "expected a JSON object at the top level".to_string(),
        })
}

fn child_object<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
    origin: &Path,
) -> Result<&'a mut Map<String, Value>> {
    parent
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| WaypointsError::MalformedConfig {
            path: origin.to_path_buf(),
            reason: format!("'{key}' must be an object"),
        })
}

fn child_array<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
    origin: &Path,
) -> Result<&'a mut Vec<Value>> {
    parent
        .entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| WaypointsError::MalformedConfig {
            path: origin.to_path_buf(),
            reason: format!("'{key}' must be an array"),
        })
}

fn entry_commands(entry: &Value) -> impl Iterator<Item = &str> {
    entry
        .get("hooks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|h| h.get("command").and_then(Value::as_str))
}

fn entry_matcher(entry: &Value) -> Option<&str> {
    entry.get("matcher").and_then(Value::as_str)
}

/// Add the waypoints hooks and the directive permission. Entries already
/// present for the same event and matcher are left alone.
pub fn install_hooks(
    settings: &mut Value,
    command: &str,
    build_timeout_secs: u64,
    origin: &Path,
) -> Result<MergeReport> {
    let root = root_object(settings, origin)?;
    let mut report = MergeReport::default();

    let hooks = child_object(root, "hooks", origin)?;
    for (event, matcher, builds) in HOOKS {
        let entries = child_array(hooks, event, origin)?;
        let present = entries.iter().any(|e| {
            entry_matcher(e) == *matcher && entry_commands(e).any(is_waypoints_hook)
        });
        if present {
            continue;
        }
        let timeout = if *builds {
            build_timeout_secs
        } else {
            QUICK_TIMEOUT_SECS
        };
        let mut entry = json!({
            "hooks": [{ "type": "command", "command": command, "timeout": timeout }]
        });
        if let (Some(m), Some(obj)) = (matcher, entry.as_object_mut()) {
            obj.insert("matcher".to_string(), Value::String(m.to_string()));
        }
        entries.push(entry);
        report.hooks_changed += 1;
    }

    let permissions = child_object(root, "permissions", origin)?;
    let allow = child_array(permissions, "allow", origin)?;
    if !allow.iter().any(|p| p.as_str() == Some(DIRECTIVE_PERMISSION)) {
        allow.push(Value::String(DIRECTIVE_PERMISSION.to_string()));
        report.permission_changed = true;
    }
    Ok(report)
}

/// Remove every waypoints hook entry and the directive permission. Event
/// lists left empty are dropped.
pub fn uninstall_hooks(settings: &mut Value, origin: &Path) -> Result<MergeReport> {
    let root = root_object(settings, origin)?;
    let mut report = MergeReport::default();

    if let Some(hooks) = root.get_mut("hooks").and_then(Value::as_object_mut) {
        for entries in hooks.values_mut() {
            if let Some(list) = entries.as_array_mut() {
                let before = list.len();
                list.retain(|e| !entry_commands(e).any(is_waypoints_hook));
                report.hooks_changed += before - list.len();
            }
        }
        hooks.retain(|_, v| v.as_array().map_or(true, |a| !a.is_empty()));
    }

    if let Some(allow) = root
        .get_mut("permissions")
        .and_then(|p| p.get_mut("allow"))
        .and_then(Value::as_array_mut)
    {
        let before = allow.len();
        allow.retain(|p| p.as_str() != Some(DIRECTIVE_PERMISSION));
        report.permission_changed = allow.len() != before;
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CMD: &str = "/usr/local/bin/waypoints hook";

    fn origin() -> &'static Path {
        Path::new("settings.json")
    }

    #[test]
    fn recognises_hook_commands() {
        assert!(is_waypoints_hook(CMD));
        assert!(is_waypoints_hook("waypoints --claude-dir /x hook"));
        assert!(is_waypoints_hook("\"/Applications/My Tools/waypoints\" hook"));
        assert!(!is_waypoints_hook("waypoints status"));
        assert!(!is_waypoints_hook("python3 other-hook.py hook"));
        assert_eq!(
            hook_command(Path::new("/opt/my tools/waypoints"), &[]),
            "\"/opt/my tools/waypoints\" hook"
        );
        let cmd = hook_command(
            Path::new("/bin/waypoints"),
            &["--claude-dir".to_string(), "/home/me/.claude".to_string()],
        );
        assert_eq!(cmd, "/bin/waypoints --claude-dir /home/me/.claude hook");
        assert!(is_waypoints_hook(&cmd));
    }

    #[test]
    fn install_into_empty_document() {
        let mut doc = json!({});
        let report = install_hooks(&mut doc, CMD, 450, origin()).unwrap();
        assert_eq!(report.hooks_changed, 5);
        assert!(report.permission_changed);

        assert_eq!(doc["hooks"]["PreToolUse"].as_array().unwrap().len(), 2);
        assert_eq!(doc["hooks"]["PreToolUse"][0]["matcher"], "Bash");
        assert_eq!(doc["hooks"]["PostToolUse"][0]["hooks"][0]["timeout"], 450);
        assert_eq!(doc["hooks"]["Stop"][0]["hooks"][0]["command"], CMD);
        assert!(doc["hooks"]["Stop"][0].get("matcher").is_none());
        assert_eq!(doc["permissions"]["allow"][0], DIRECTIVE_PERMISSION);
    }

    #[test]
    fn install_is_idempotent_and_keeps_other_entries() {
        let mut doc = json!({
            "model": "opus",
            "hooks": {"Stop": [{"hooks": [{"type": "command", "command": "notify-send done"}]}]},
            "permissions": {"allow": ["Bash(ls:*)"]}
        });
        install_hooks(&mut doc, CMD, 450, origin()).unwrap();
        let again = install_hooks(&mut doc, CMD, 450, origin()).unwrap();
        assert!(!again.changed());

        assert_eq!(doc["model"], "opus");
        assert_eq!(doc["hooks"]["Stop"].as_array().unwrap().len(), 2);
        assert_eq!(doc["permissions"]["allow"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn uninstall_removes_only_ours() {
        let mut doc = json!({
            "hooks": {"Stop": [{"hooks": [{"type": "command", "command": "notify-send done"}]}]},
            "permissions": {"allow": ["Bash(ls:*)"]}
        });
        install_hooks(&mut doc, CMD, 450, origin()).unwrap();
        let report = uninstall_hooks(&mut doc, origin()).unwrap();
        assert_eq!(report.hooks_changed, 5);
        assert!(report.permission_changed);

        assert!(doc["hooks"].get("PreToolUse").is_none());
        assert_eq!(doc["hooks"]["Stop"].as_array().unwrap().len(), 1);
        assert_eq!(doc["permissions"]["allow"], json!(["Bash(ls:*)"]));
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let mut doc = json!([1, 2]);
        assert!(matches!(
            install_hooks(&mut doc, CMD, 1, origin()),
            Err(WaypointsError::MalformedConfig { .. })
        ));
        let mut doc = json!({"hooks": []});
        assert!(install_hooks(&mut doc, CMD, 1, origin()).is_err());
    }
}
