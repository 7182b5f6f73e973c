use crate::output::print_json;
use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use waypoints_core::build::ShellRunner;
use waypoints_core::format;
use waypoints_core::hook::Directive;
use waypoints_core::orchestrator::{HookContext, Orchestrator, Timeouts};
use waypoints_core::paths::Settings;
use waypoints_core::profile::ProfileResolver;
use waypoints_core::state::{FileStateStore, SessionState, StateStore};
use waypoints_core::types::Phase;
use waypoints_core::WaypointsError;

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Session identifier, as sent by the host in `session_id`
    #[arg(long, env = "CLAUDE_SESSION_ID", default_value = "default")]
    pub session_id: String,

    /// Project directory for profile detection and builds (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

struct Session {
    ctx: HookContext,
    store: FileStateStore,
    resolver: ProfileResolver,
    timeouts: Timeouts,
}

impl Session {
    fn open(settings: &Settings, args: &SessionArgs) -> anyhow::Result<Self> {
        let cwd = match &args.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("failed to determine working directory")?,
        };
        Ok(Self {
            ctx: HookContext {
                session_id: args.session_id.clone(),
                cwd: cwd.clone(),
            },
            store: FileStateStore::new(&settings.state_root),
            resolver: ProfileResolver::from_settings(settings, cwd),
            timeouts: Timeouts::from_settings(settings),
        })
    }

    fn id(&self) -> &str {
        &self.ctx.session_id
    }

    /// Strict load: a corrupt state file is an error here, unlike in hooks.
    fn load(&self) -> anyhow::Result<SessionState> {
        self.store
            .load(self.id())
            .with_context(|| format!("failed to load state for session '{}'", self.id()))
    }

    fn load_active(&self) -> anyhow::Result<SessionState> {
        let state = self.load()?;
        if !state.is_active() {
            return Err(WaypointsError::NotActive(self.id().to_string()).into());
        }
        Ok(state)
    }

    fn directive(&self, directive: Directive) -> anyhow::Result<String> {
        let orchestrator = Orchestrator::new(&self.store, &ShellRunner, &self.resolver, self.timeouts);
        Ok(orchestrator.run_directive(&self.ctx, &directive)?)
    }

    fn profile_name(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .resolver
            .resolve()
            .context("failed to resolve profile")?
            .map(|p| p.name.clone()))
    }

    fn report(&self, message: &str, json: bool) -> anyhow::Result<()> {
        if json {
            let state = self.load()?;
            print_json(&Report {
                session_id: self.id(),
                state_dir: self.store.display_dir(self.id()),
                message,
                state: &state,
            })
        } else {
            println!("{message}");
            Ok(())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    session_id: &'a str,
    state_dir: String,
    message: &'a str,
    state: &'a SessionState,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub fn init(settings: &Settings, args: &SessionArgs, json: bool) -> anyhow::Result<()> {
    let session = Session::open(settings, args)?;
    let message = session.directive(Directive::Init)?;
    session.report(&message, json)
}

pub fn status(settings: &Settings, args: &SessionArgs, json: bool) -> anyhow::Result<()> {
    let session = Session::open(settings, args)?;
    let state = session.load()?;
    let profile = session.profile_name()?;

    if json {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusOutput<'a> {
            session_id: &'a str,
            state_dir: String,
            profile: Option<&'a str>,
            state: &'a SessionState,
        }
        return print_json(&StatusOutput {
            session_id: session.id(),
            state_dir: session.store.display_dir(session.id()),
            profile: profile.as_deref(),
            state: &state,
        });
    }

    println!(
        "{}",
        format::status_report(&state, &session.store.display_dir(session.id()), profile.as_deref())
    );
    Ok(())
}

pub fn mark_complete(settings: &Settings, args: &SessionArgs, phase: &str, json: bool) -> anyhow::Result<()> {
    let phase: Phase = phase.parse()?;
    if phase == Phase::Implementation {
        bail!("implementation completes on its own once the project compiles and all tests pass");
    }
    let session = Session::open(settings, args)?;
    let mut state = session.load_active()?;
    state.mark_complete(phase)?;

    let message = session.directive(Directive::MarkComplete(phase))?;
    session.report(&message, json)
}

pub fn set_phase(settings: &Settings, args: &SessionArgs, phase: u8, json: bool) -> anyhow::Result<()> {
    let target: Phase = phase.try_into()?;
    let session = Session::open(settings, args)?;
    let mut state = session.load_active()?;
    state.advance_to(target)?;

    let message = session.directive(Directive::SetPhase(phase))?;
    session.report(&message, json)
}

pub fn summary(
    settings: &Settings,
    args: &SessionArgs,
    phase: &str,
    text: &str,
    json: bool,
) -> anyhow::Result<()> {
    let phase: Phase = phase.parse()?;
    let session = Session::open(settings, args)?;
    let mut state = session.load_active()?;
    state.set_summary(phase, text)?;
    session
        .store
        .save(session.id(), &state)
        .context("failed to save state")?;
    session.report(&format!("Saved {phase} summary."), json)
}

pub fn reset(settings: &Settings, args: &SessionArgs, full: bool, json: bool) -> anyhow::Result<()> {
    let session = Session::open(settings, args)?;
    let message = session.directive(Directive::Reset { full })?;
    session.report(&message, json)
}
