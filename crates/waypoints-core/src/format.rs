//! Markdown messages returned to the host in hook decisions.
//!
//! Everything here is a pure function of its arguments.

use crate::build::BuildOutcome;
use crate::state::SessionState;
use crate::types::Phase;
use std::path::Path;

/// Lines of compile output shown after an edit.
pub const COMPILE_HEAD_LINES: usize = 20;
/// Lines of test output shown after an edit. Test runners summarise at the end.
pub const TEST_TAIL_LINES: usize = 30;
/// Characters of build output carried in a turn-boundary block.
pub const BLOCK_OUTPUT_CHARS: usize = 2000;

pub fn truncate_head(output: &str, max_lines: usize) -> String {
    output
        .trim()
        .lines()
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn truncate_tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// The first `max_chars` characters of `output`.
pub fn clip(output: &str, max_chars: usize) -> &str {
    match output.char_indices().nth(max_chars) {
        Some((idx, _)) => &output[..idx],
        None => output,
    }
}

fn mark_command(phase: Phase) -> String {
    format!("true # wp:mark-complete {}", phase.as_str())
}

pub fn phase_heading(phase: Phase) -> String {
    format!("WP Phase {}: {}", phase.number(), phase.banner())
}

fn fenced(body: &str) -> String {
    format!("```\n{body}\n```")
}

// ---------------------------------------------------------------------------
// Phase guard
// ---------------------------------------------------------------------------

/// Short reason for a blocked edit.
pub fn guard_reason(phase: Phase) -> String {
    let what = match phase {
        Phase::Requirements => "cannot edit source files during requirements gathering",
        Phase::Interfaces => "cannot write tests during interface design",
        Phase::Tests => "cannot edit implementation during test writing",
        Phase::Implementation => "edits are allowed",
    };
    format!("Waypoints Phase {}: {what}", phase.number())
}

/// Full guidance attached to a blocked edit.
pub fn guard_context(phase: Phase, file: &Path, profile: &str) -> String {
    let (rule, todo) = match phase {
        Phase::Requirements => (
            "No source code changes are allowed yet.",
            "Gather the requirements, resolve open questions with the user and get their confirmation.",
        ),
        Phase::Interfaces => (
            "Test files cannot be edited yet.",
            "Write type and function signatures in main sources with placeholder bodies, make them compile and have the user approve them.",
        ),
        Phase::Tests => (
            "Implementation files cannot be edited yet.",
            "Write tests against the approved interfaces. They are expected to fail until Phase 4. Have the user approve them.",
        ),
        Phase::Implementation => ("All files are editable.", "Make the tests pass."),
    };
    let next = match phase.next() {
        Some(next) => format!(
            "Then mark the phase complete to move on to Phase {} ({}):\n{}",
            next.number(),
            next.title(),
            fenced(&mark_command(phase))
        ),
        None => String::new(),
    };
    format!(
        "## {} ({profile})\n\n**Blocked:** cannot edit `{}`\n\nYou are in **Phase {} ({})**. {rule}\n\n{todo}\n\n{next}",
        phase_heading(phase),
        file.display(),
        phase.number(),
        phase.title(),
    )
    .trim_end()
    .to_string()
}

// ---------------------------------------------------------------------------
// Post-edit feedback
// ---------------------------------------------------------------------------

pub fn edit_compile_failure(phase: Option<Phase>, file: &Path, profile: &str, output: &str) -> String {
    let heading = match phase {
        Some(Phase::Implementation) => format!("{}: compilation FAILED", phase_heading(Phase::Implementation)),
        _ => "COMPILATION FAILED".to_string(),
    };
    format!(
        "## {heading} ({profile})\n\n**File:** {}\n\n**Errors:**\n{}\n\nFix the compilation errors before continuing.",
        file.display(),
        fenced(&truncate_head(output, COMPILE_HEAD_LINES)),
    )
}

pub fn edit_test_failure(file: &Path, profile: &str, output: &str) -> String {
    format!(
        "## {}: compilation passed, tests FAILED ({profile})\n\n**File:** {}\n\n**Test results:**\n{}\n\nReview the failing tests and keep implementing.",
        phase_heading(Phase::Implementation),
        file.display(),
        fenced(&truncate_tail(output, TEST_TAIL_LINES)),
    )
}

// ---------------------------------------------------------------------------
// Turn-boundary blocks
// ---------------------------------------------------------------------------

fn outcome_body(outcome: &BuildOutcome) -> String {
    let output = fenced(clip(&outcome.output, BLOCK_OUTPUT_CHARS));
    if !outcome.timed_out {
        return output;
    }
    let secs = outcome.duration_ms / 1000;
    if outcome.output.trim().is_empty() {
        format!("Command timed out after {secs}s.")
    } else {
        format!("Command timed out after {secs}s.\n{output}")
    }
}

pub fn compile_failure_block(phase: Phase, profile: &str, command: &str, outcome: &BuildOutcome) -> String {
    let what = if phase == Phase::Tests {
        "Test compilation FAILED"
    } else {
        "Compilation FAILED"
    };
    format!(
        "## {} ({profile})\n\n**{what}** running `{command}`\n\n{}\n\nFix the compilation errors and try again.",
        phase_heading(phase),
        outcome_body(outcome),
    )
}

pub fn test_failure_block(profile: &str, command: &str, outcome: &BuildOutcome) -> String {
    format!(
        "## {} ({profile})\n\n**Tests FAILED** running `{command}`\n\n{}\n\nImplement -> compile -> test -> fix, then try again.",
        phase_heading(Phase::Implementation),
        outcome_body(outcome),
    )
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// What to do in `phase`, shown when a session starts or advances.
pub fn phase_guidance(phase: Phase) -> String {
    let body = match phase {
        Phase::Requirements => "Clarify the request with the user: edge cases, error behaviour, expected results. Source files stay read-only until the user confirms the requirements.",
        Phase::Interfaces => "Design the types and signatures in main sources. Bodies stay unimplemented. The code must compile before the phase can be completed.",
        Phase::Tests => "Write tests against the approved interfaces. They will fail for now. The tests must compile before the phase can be completed.",
        Phase::Implementation => "Implement until the tests pass. Every turn ends with a compile and test run; the workflow finishes on its own once both pass.",
    };
    let next = match phase {
        Phase::Implementation => String::new(),
        _ => format!("\n\nWhen the user approves, run:\n{}", fenced(&mark_command(phase))),
    };
    format!("## {}\n\n{body}{next}", phase_heading(phase))
}

pub fn session_started(profile: Option<&str>) -> String {
    let profile = match profile {
        Some(p) => format!("Profile: {p}."),
        None => "No technology profile detected; builds will not be verified.".to_string(),
    };
    format!(
        "Waypoints workflow initialized. {profile}\n\n{}",
        phase_guidance(Phase::Requirements)
    )
}

pub fn status_report(state: &SessionState, location: &str, profile: Option<&str>) -> String {
    if !state.is_active() {
        let done = if state.completed_phases.implementation {
            " Last workflow completed."
        } else {
            ""
        };
        return format!("Waypoints is not active for this session.{done}\nState: {location}");
    }
    let mut out = format!(
        "## {}\n\nProfile: {}\nState: {location}\n\n",
        phase_heading(state.phase),
        profile.unwrap_or("none"),
    );
    for phase in Phase::all() {
        let mark = if state.completed_phases.get(*phase) {
            "x"
        } else {
            " "
        };
        out.push_str(&format!("- [{mark}] {}. {}\n", phase.number(), phase.title()));
    }
    out.trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(output: &str) -> BuildOutcome {
        BuildOutcome {
            exit_code: Some(1),
            output: output.to_string(),
            timed_out: false,
            duration_ms: 10,
        }
    }

    #[test]
    fn head_and_tail_truncation() {
        let out: String = (1..=50).map(|i| format!("line {i}\n")).collect();
        let head = truncate_head(&out, 20);
        assert!(head.starts_with("line 1\n"));
        assert!(head.ends_with("line 20"));
        let tail = truncate_tail(&out, 30);
        assert!(tail.starts_with("line 21\n"));
        assert!(tail.ends_with("line 50"));
        assert_eq!(truncate_tail("a\nb", 30), "a\nb");
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("abc", 10), "abc");
    }

    #[test]
    fn guard_context_names_file_and_next_step() {
        let msg = guard_context(Phase::Requirements, Path::new("main.go"), "Go");
        assert!(msg.contains("`main.go`"));
        assert!(msg.contains("true # wp:mark-complete requirements"));
        assert!(msg.contains("Phase 2 (Interfaces)"));
        assert!(guard_reason(Phase::Tests).contains("Phase 3"));
    }

    #[test]
    fn compile_block_carries_output() {
        let msg = compile_failure_block(
            Phase::Interfaces,
            "Java (Maven)",
            "mvn compile",
            &outcome("[ERROR] Cannot find symbol"),
        );
        assert!(msg.contains("Cannot find symbol"));
        assert!(msg.contains("WP Phase 2"));
    }

    #[test]
    fn block_output_is_capped() {
        let long = "x".repeat(5000);
        let msg = test_failure_block("Go", "go test ./...", &outcome(&long));
        assert!(msg.len() < 2300);
    }

    #[test]
    fn status_lists_completion_flags() {
        let mut state = SessionState::start("s");
        state.mark_complete(Phase::Requirements).unwrap();
        state.advance_to(Phase::Interfaces).unwrap();
        let msg = status_report(&state, "~/.claude/tmp/wp-s", Some("go"));
        assert!(msg.contains("WP Phase 2: Interface Design"));
        assert!(msg.contains("- [x] 1. Requirements"));
        assert!(msg.contains("- [ ] 2. Interfaces"));

        let idle = status_report(&SessionState::inactive(), "here", None);
        assert!(idle.contains("not active"));
    }
}
