use anyhow::Context;
use std::io::Read;
use tracing::{debug, warn};
use waypoints_core::build::ShellRunner;
use waypoints_core::hook::HookInput;
use waypoints_core::orchestrator::{HookContext, Orchestrator, Timeouts};
use waypoints_core::paths::Settings;
use waypoints_core::profile::ProfileResolver;
use waypoints_core::state::FileStateStore;

/// Read one hook event from stdin and print the decision, if any.
///
/// Unreadable input is logged and ignored so a host protocol change never
/// wedges the session; configuration errors fail the invocation.
pub fn run(settings: &Settings) -> anyhow::Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read hook input")?;

    let input = match HookInput::parse(&raw) {
        Ok(input) => input,
        Err(e) => {
            warn!(error = %e, "ignoring malformed hook input");
            return Ok(());
        }
    };
    let Some(event) = input.event() else {
        debug!(event = %input.hook_event_name, tool = %input.tool_name, "event not handled");
        return Ok(());
    };

    let cwd = match input.cwd.clone().filter(|c| !c.as_os_str().is_empty()) {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("failed to determine working directory")?,
    };
    let ctx = HookContext {
        session_id: input.session_id.clone(),
        cwd: cwd.clone(),
    };

    let store = FileStateStore::new(&settings.state_root);
    let resolver = ProfileResolver::from_settings(settings, &cwd);
    let orchestrator = Orchestrator::new(&store, &ShellRunner, &resolver, Timeouts::from_settings(settings));

    let output = orchestrator
        .handle(&ctx, &event)
        .with_context(|| format!("failed to handle {} event", event.host_name()))?;

    if let Some(output) = output {
        let name = if input.hook_event_name.is_empty() {
            event.host_name()
        } else {
            input.hook_event_name.as_str()
        };
        println!("{}", output.to_json(name)?);
    }
    Ok(())
}
