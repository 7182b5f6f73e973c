//! The host's hook protocol: one JSON object in on stdin, at most one JSON
//! decision out on stdout.

use crate::error::Result;
use crate::types::Phase;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

pub const UNKNOWN_SESSION: &str = "unknown";

const EDIT_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit"];

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolInput {
    pub file_path: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub hook_event_name: String,
    pub tool_name: String,
    #[serde(deserialize_with = "lenient_tool_input")]
    pub tool_input: ToolInput,
    pub cwd: Option<PathBuf>,
    pub session_id: String,
    pub stop_hook_active: bool,
}

/// Tools we do not handle may send any shape of `tool_input`. Only an
/// object is read; serde would otherwise accept an array positionally.
fn lenient_tool_input<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<ToolInput, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    if !value.is_object() {
        return Ok(ToolInput::default());
    }
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl Default for HookInput {
    fn default() -> Self {
        Self {
            hook_event_name: String::new(),
            tool_name: String::new(),
            tool_input: ToolInput::default(),
            cwd: None,
            session_id: UNKNOWN_SESSION.to_string(),
            stop_hook_active: false,
        }
    }
}

impl HookInput {
    /// Parse the stdin payload. Blank input is an empty event.
    pub fn parse(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut input: HookInput = serde_json::from_str(data)?;
        if input.session_id.trim().is_empty() {
            input.session_id = UNKNOWN_SESSION.to_string();
        }
        Ok(input)
    }

    fn is_edit_tool(&self) -> bool {
        EDIT_TOOLS.contains(&self.tool_name.as_str())
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.tool_input
            .file_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
    }

    /// The event this input represents, or `None` when it is not ours.
    pub fn event(&self) -> Option<HookEvent> {
        match self.hook_event_name.as_str() {
            "PreToolUse" if self.tool_name == "Bash" => self
                .tool_input
                .command
                .as_deref()
                .and_then(Directive::find)
                .map(HookEvent::Command),
            "PreToolUse" if self.is_edit_tool() => Some(HookEvent::PreEdit {
                file_path: self.file_path(),
            }),
            "PostToolUse" if self.is_edit_tool() => Some(HookEvent::PostEdit {
                file_path: self.file_path(),
            }),
            "Stop" | "SubagentStop" => Some(HookEvent::TurnBoundary {
                stop_hook_active: self.stop_hook_active,
            }),
            "SessionEnd" => Some(HookEvent::SessionEnd),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    PreEdit { file_path: Option<PathBuf> },
    PostEdit { file_path: Option<PathBuf> },
    Command(Directive),
    TurnBoundary { stop_hook_active: bool },
    SessionEnd,
}

impl HookEvent {
    /// Host event name echoed back in `hookSpecificOutput`.
    pub fn host_name(&self) -> &'static str {
        match self {
            HookEvent::PreEdit { .. } | HookEvent::Command(_) => "PreToolUse",
            HookEvent::PostEdit { .. } => "PostToolUse",
            HookEvent::TurnBoundary { .. } => "Stop",
            HookEvent::SessionEnd => "SessionEnd",
        }
    }
}

/// A `# wp:<verb> [arg]` comment embedded in a shell command, e.g.
/// `true # wp:mark-complete requirements`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Init,
    Status,
    Reset { full: bool },
    MarkComplete(Phase),
    SetPhase(u8),
    /// Recognised as ours but not understood; carries the reason.
    Invalid(String),
}

static DIRECTIVE_RE: OnceLock<Regex> = OnceLock::new();

fn directive_re() -> &'static Regex {
    DIRECTIVE_RE.get_or_init(|| Regex::new(r"#\s*wp:([A-Za-z-]+)(?:[ \t]+([^\s#]+))?").unwrap())
}

impl Directive {
    /// Find the first directive in `command`.
    pub fn find(command: &str) -> Option<Directive> {
        let caps = directive_re().captures(command)?;
        let verb = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let arg = caps.get(2).map(|m| m.as_str());
        Some(Self::from_parts(verb, arg))
    }

    fn from_parts(verb: &str, arg: Option<&str>) -> Directive {
        match (verb, arg) {
            ("init", _) => Directive::Init,
            ("status", _) => Directive::Status,
            ("reset", arg) => Directive::Reset {
                full: arg == Some("--full"),
            },
            ("mark-complete", Some(name)) => match name.parse::<Phase>() {
                Ok(phase) if name.parse::<u8>().is_err() => Directive::MarkComplete(phase),
                _ => Directive::Invalid(format!(
                    "unknown phase '{name}': expected requirements, interfaces, tests or implementation"
                )),
            },
            ("mark-complete", None) => {
                Directive::Invalid("mark-complete needs a phase name".to_string())
            }
            ("set-phase", Some(n)) => match n.parse::<u8>().ok().filter(|n| (1..=4).contains(n)) {
                Some(n) => Directive::SetPhase(n),
                None => Directive::Invalid(format!("set-phase expects 1-4, got '{n}'")),
            },
            ("set-phase", None) => Directive::Invalid("set-phase needs a phase number".to_string()),
            (other, _) => Directive::Invalid(format!("unknown waypoints command 'wp:{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Block,
    Approve,
}

/// A decision for the host. Returning no output at all means "allow".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutput {
    pub decision: Decision,
    pub reason: String,
    pub context: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookSpecificOutput<'a> {
    hook_event_name: &'a str,
    additional_context: &'a str,
}

#[derive(Serialize)]
struct WireOutput<'a> {
    decision: Decision,
    reason: &'a str,
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    hook_specific_output: Option<HookSpecificOutput<'a>>,
}

impl HookOutput {
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Block,
            reason: reason.into(),
            context: None,
        }
    }

    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Approve,
            reason: reason.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_block(&self) -> bool {
        self.decision == Decision::Block
    }

    /// Serialize for the host, tagging the context with `hook_event_name`.
    pub fn to_json(&self, hook_event_name: &str) -> Result<String> {
        let wire = WireOutput {
            decision: self.decision,
            reason: &self.reason,
            hook_specific_output: self.context.as_deref().map(|ctx| HookSpecificOutput {
                hook_event_name,
                additional_context: ctx,
            }),
        };
        Ok(serde_json::to_string_pretty(&wire)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
