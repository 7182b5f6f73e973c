//! The workflow state machine, driven by host events.
//!
//! One `handle` call per hook invocation: load state, decide, save, reply.
//! Phases 1-3 are left only once the user has marked them complete (phases 2
//! and 3 also need a clean compile). Phase 4 ends on its own when the project
//! compiles and its tests pass.

use crate::build::{self, BuildRunner, Ran};
use crate::error::Result;
use crate::format;
use crate::guard::{self, GuardDecision};
use crate::hook::{Directive, HookEvent, HookOutput};
use crate::paths::Settings;
use crate::profile::{has_placeholder, Profile, ProfileResolver};
use crate::state::{load_lenient, SessionState, StateStore};
use crate::types::Phase;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const REASON: &str = "Waypoints";

/// Where an event came from.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub session_id: String,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub compile: Duration,
    pub test: Duration,
}

impl Timeouts {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            compile: settings.compile_timeout,
            test: settings.test_timeout,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            compile: crate::paths::DEFAULT_COMPILE_TIMEOUT,
            test: crate::paths::DEFAULT_TEST_TIMEOUT,
        }
    }
}

/// Result of checking the current phase's exit condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing changed.
    Stay,
    /// The session moved into this phase.
    Advanced(Phase),
    /// A build failed; the message explains why.
    Blocked(String),
    /// Phase 4 passed and the session was deactivated.
    Finished,
}

pub struct Orchestrator<'a> {
    store: &'a dyn StateStore,
    runner: &'a dyn BuildRunner,
    resolver: &'a ProfileResolver,
    timeouts: Timeouts,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        runner: &'a dyn BuildRunner,
        resolver: &'a ProfileResolver,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            store,
            runner,
            resolver,
            timeouts,
        }
    }

    pub fn handle(&self, ctx: &HookContext, event: &HookEvent) -> Result<Option<HookOutput>> {
        debug!(session = %ctx.session_id, ?event, "handling hook event");
        match event {
            HookEvent::TurnBoundary { stop_hook_active } => {
                self.on_turn_boundary(ctx, *stop_hook_active)
            }
            HookEvent::PreEdit { file_path } => match file_path {
                Some(path) => self.on_pre_edit(ctx, path),
                None => Ok(None),
            },
            HookEvent::PostEdit { file_path } => match file_path {
                Some(path) => self.on_post_edit(ctx, path),
                None => Ok(None),
            },
            HookEvent::Command(directive) => self.on_command(ctx, directive).map(Some),
            HookEvent::SessionEnd => {
                self.store.delete(&ctx.session_id)?;
                info!(session = %ctx.session_id, "session ended, state removed");
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Turn boundary
    // -----------------------------------------------------------------------

    fn on_turn_boundary(&self, ctx: &HookContext, stop_hook_active: bool) -> Result<Option<HookOutput>> {
        // The host is already continuing because of an earlier block.
        if stop_hook_active {
            return Ok(None);
        }
        let mut state = load_lenient(self.store, &ctx.session_id)?;
        if !state.is_active() {
            return Ok(None);
        }
        match self.evaluate(ctx, &mut state)? {
            Verdict::Stay => Ok(None),
            Verdict::Blocked(message) => Ok(Some(HookOutput::block(message))),
            Verdict::Advanced(_) | Verdict::Finished => {
                self.store.save(&ctx.session_id, &state)?;
                Ok(None)
            }
        }
    }

    /// Check the exit condition of the current phase and apply any transition
    /// to `state`. The caller persists `state`.
    pub fn evaluate(&self, ctx: &HookContext, state: &mut SessionState) -> Result<Verdict> {
        let profile = self.resolver.resolve()?;
        let phase = state.phase;
        let flagged = state.completed_phases.get(phase);

        if phase != Phase::Requirements {
            if let Some(profile) = profile {
                if !ctx.cwd.is_dir() {
                    warn!(cwd = %ctx.cwd.display(), "project directory missing, skipping build checks");
                    return Ok(Verdict::Stay);
                }
                if let Some(message) = self.verify(phase, profile, &ctx.cwd) {
                    info!(session = %ctx.session_id, phase = phase.number(), "build check failed");
                    return Ok(Verdict::Blocked(message));
                }
            }
        }

        match phase.next() {
            Some(next) if flagged => {
                state.advance_to(next)?;
                info!(session = %ctx.session_id, phase = next.number(), "advanced to next phase");
                Ok(Verdict::Advanced(next))
            }
            Some(_) => Ok(Verdict::Stay),
            None => {
                // Phase 4 only exits through a test run that actually happened.
                let tested = profile
                    .and_then(|p| p.test.as_deref())
                    .is_some_and(|t| !t.trim().is_empty() && !has_placeholder(t));
                if !tested {
                    return Ok(Verdict::Stay);
                }
                state.mark_complete(Phase::Implementation)?;
                state.finish();
                info!(session = %ctx.session_id, "all builds and tests pass, workflow complete");
                Ok(Verdict::Finished)
            }
        }
    }

    /// Run the builds `phase` requires. `Some(message)` on the first failure.
    fn verify(&self, phase: Phase, profile: &Profile, cwd: &Path) -> Option<String> {
        let name = profile.display_name();
        let compile_failure = |ran: Ran| {
            (!ran.outcome.passed())
                .then(|| format::compile_failure_block(phase, name, &ran.command, &ran.outcome))
        };
        match phase {
            Phase::Requirements => None,
            Phase::Interfaces => {
                build::compile(self.runner, profile, cwd, None, self.timeouts.compile)
                    .and_then(compile_failure)
            }
            Phase::Tests => build::test_compile(self.runner, profile, cwd, self.timeouts.compile)
                .and_then(compile_failure),
            Phase::Implementation => {
                if let Some(message) =
                    build::compile(self.runner, profile, cwd, None, self.timeouts.compile)
                        .and_then(compile_failure)
                {
                    return Some(message);
                }
                let ran = build::test(self.runner, profile, cwd, None, self.timeouts.test)?;
                (!ran.outcome.passed())
                    .then(|| format::test_failure_block(name, &ran.command, &ran.outcome))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    fn on_pre_edit(&self, ctx: &HookContext, path: &Path) -> Result<Option<HookOutput>> {
        let state = load_lenient(self.store, &ctx.session_id)?;
        if !state.is_active() {
            return Ok(None);
        }
        match guard::decide(state.phase, path, self.resolver.resolve()?) {
            GuardDecision::Allow => Ok(None),
            GuardDecision::Block { reason, context } => {
                info!(session = %ctx.session_id, phase = state.phase.number(), file = %path.display(), "edit blocked");
                Ok(Some(HookOutput::block(reason).with_context(context)))
            }
        }
    }

    /// Compile after each source edit, and in phase 4 also run the tests.
    /// Failures are reported as context, never as a block.
    fn on_post_edit(&self, ctx: &HookContext, path: &Path) -> Result<Option<HookOutput>> {
        let Some(profile) = self.resolver.resolve()? else {
            return Ok(None);
        };
        if !guard::classify(path, profile).is_source() || !ctx.cwd.is_dir() {
            return Ok(None);
        }
        let state = load_lenient(self.store, &ctx.session_id)?;
        let phase = state.is_active().then_some(state.phase);
        let name = profile.display_name();

        if let Some(ran) = build::compile(self.runner, profile, &ctx.cwd, Some(path), self.timeouts.compile) {
            if !ran.outcome.passed() {
                return Ok(Some(
                    HookOutput::approve("Compilation failed").with_context(format::edit_compile_failure(
                        phase,
                        path,
                        name,
                        &ran.outcome.output,
                    )),
                ));
            }
        }
        if phase != Some(Phase::Implementation) {
            return Ok(None);
        }
        if let Some(ran) = build::test(self.runner, profile, &ctx.cwd, Some(path), self.timeouts.test) {
            if !ran.outcome.passed() {
                return Ok(Some(
                    HookOutput::approve("Tests failed")
                        .with_context(format::edit_test_failure(path, name, &ran.outcome.output)),
                ));
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Directives
    // -----------------------------------------------------------------------

    fn on_command(&self, ctx: &HookContext, directive: &Directive) -> Result<HookOutput> {
        let message = self.run_directive(ctx, directive)?;
        Ok(HookOutput::approve(REASON).with_context(message))
    }

    /// Apply `directive` to the session and describe the result.
    pub fn run_directive(&self, ctx: &HookContext, directive: &Directive) -> Result<String> {
        let id = &ctx.session_id;
        let mut state = load_lenient(self.store, id)?;
        let profile_name = || -> Result<Option<String>> {
            Ok(self.resolver.resolve()?.map(|p| p.display_name().to_string()))
        };

        let not_active = || "Waypoints is not active. Start it with:\n```\ntrue # wp:init\n```".to_string();

        match directive {
            Directive::Init => {
                if state.is_active() {
                    return Ok(format!(
                        "Waypoints is already active.\n\n{}",
                        format::status_report(&state, &self.store.location(id), profile_name()?.as_deref())
                    ));
                }
                let state = SessionState::start(id);
                self.store.save(id, &state)?;
                info!(session = %id, workflow = %state.metadata.workflow_id, "workflow started");
                Ok(format::session_started(profile_name()?.as_deref()))
            }
            Directive::Status => Ok(format::status_report(
                &state,
                &self.store.location(id),
                profile_name()?.as_deref(),
            )),
            Directive::Reset { full } => {
                if *full {
                    self.store.delete(id)?;
                } else {
                    state.reset();
                    self.store.save(id, &state)?;
                }
                info!(session = %id, full, "workflow reset");
                Ok("Waypoints workflow reset.".to_string())
            }
            Directive::MarkComplete(Phase::Implementation) => Ok(
                "Implementation cannot be marked complete by hand. It completes when the project compiles and all tests pass.".to_string(),
            ),
            Directive::MarkComplete(phase) => {
                if !state.is_active() {
                    return Ok(not_active());
                }
                if let Err(e) = state.mark_complete(*phase) {
                    return Ok(e.to_string());
                }
                // Persist the approval first: this runs under the Bash hook's
                // short host timeout, so builds are left to the turn boundary.
                self.store.save(id, &state)?;
                info!(session = %id, phase = phase.number(), "phase marked complete");
                let done = format!("{} marked complete.", phase.title());

                if state.phase == Phase::Requirements {
                    // Phase 1 has no build gate and advances right away.
                    if let Verdict::Advanced(next) = self.evaluate(ctx, &mut state)? {
                        self.store.save(id, &state)?;
                        return Ok(format!("{done}\n\n{}", format::phase_guidance(next)));
                    }
                }
                if *phase == state.phase {
                    return Ok(format!(
                        "{done} {} ends at the next turn boundary once the build passes.",
                        format::phase_heading(state.phase)
                    ));
                }
                Ok(format!("{done} Still in {}.", format::phase_heading(state.phase)))
            }
            Directive::SetPhase(n) => {
                if !state.is_active() {
                    return Ok(not_active());
                }
                let Some(target) = Phase::from_number(*n) else {
                    return Ok(format!("set-phase expects 1-4, got {n}"));
                };
                if let Err(e) = state.advance_to(target) {
                    return Ok(e.to_string());
                }
                self.store.save(id, &state)?;
                info!(session = %id, phase = target.number(), "phase set");
                Ok(format!("Moved to phase {n}.\n\n{}", format::phase_guidance(target)))
            }
            Directive::Invalid(reason) => Ok(reason.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
