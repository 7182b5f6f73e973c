mod cmd;
mod logging;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::state::SessionArgs;
use std::path::PathBuf;
use std::time::Duration;
use waypoints_core::paths::{self, Settings};

#[derive(Parser)]
#[command(
    name = "waypoints",
    about = "Four-phase development workflow (requirements, interfaces, tests, implementation) enforced through assistant hooks",
    version,
    propagate_version = true
)]
struct Cli {
    /// Host configuration directory (default: ~/.claude)
    #[arg(long, global = true, env = "CLAUDE_CONFIG_DIR")]
    claude_dir: Option<PathBuf>,

    /// Installation root (default: <claude-dir>/waypoints)
    #[arg(long = "dir", global = true, env = "WP_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Profile configuration file (default: <dir>/config/wp-config.json)
    #[arg(long, global = true, env = "WP_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Profile override file (default: <claude-dir>/wp-override.json)
    #[arg(long, global = true, env = "WP_OVERRIDE_FILE")]
    override_file: Option<PathBuf>,

    /// Profile used when none is forced or detected
    #[arg(long, global = true, env = "WP_DEFAULT_PROFILE")]
    default_profile: Option<String>,

    /// Compile timeout in seconds
    #[arg(long, global = true, env = "WP_COMPILE_TIMEOUT", value_name = "SECS")]
    compile_timeout: Option<u64>,

    /// Test timeout in seconds
    #[arg(long, global = true, env = "WP_TEST_TIMEOUT", value_name = "SECS")]
    test_timeout: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one hook event (JSON on stdin, decision on stdout)
    Hook,

    /// Start a workflow in phase 1
    Init {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Show the current phase and completion flags
    Status {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Mark requirements, interfaces or tests as approved
    MarkComplete {
        /// Phase name or number
        phase: String,
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Move forward to a phase (1-4)
    SetPhase {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        phase: u8,
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Record the summary of a completed phase
    Summary {
        /// requirements, interfaces or tests
        phase: String,
        text: String,
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Abandon the workflow
    Reset {
        /// Delete the session directory instead of resetting the state
        #[arg(long)]
        full: bool,
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Show which profile applies to a project and why
    Detect {
        /// Project directory (default: current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },

    /// Write the profile config and register the hooks in settings.json
    Install,

    /// Remove the hooks from settings.json
    Uninstall {
        /// Also delete the installation root
        #[arg(long)]
        purge: bool,
    },
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let claude_dir = match &self.claude_dir {
            Some(dir) => dir.clone(),
            None => paths::default_claude_dir()?,
        };
        let mut settings = Settings::under(claude_dir);
        if let Some(dir) = &self.install_dir {
            settings = settings.with_install_dir(dir);
        }
        if let Some(file) = &self.config {
            settings.config_file = file.clone();
        }
        if let Some(file) = &self.override_file {
            settings.override_file = file.clone();
        }
        settings.default_profile = self
            .default_profile
            .clone()
            .filter(|p| !p.trim().is_empty());
        if let Some(secs) = self.compile_timeout {
            settings.compile_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.test_timeout {
            settings.test_timeout = Duration::from_secs(secs);
        }
        Ok(settings)
    }

    /// Settings given at install time, repeated on the hook command line so
    /// the host runs the hook with the same directories, profiles and
    /// timeouts the hook entries were sized for.
    fn hook_args(&self) -> Vec<String> {
        let paths = [
            ("--claude-dir", &self.claude_dir),
            ("--dir", &self.install_dir),
            ("--config", &self.config),
            ("--override-file", &self.override_file),
        ];
        let mut args: Vec<String> = paths
            .into_iter()
            .filter_map(|(flag, value)| value.as_ref().map(|v| [flag.to_string(), v.display().to_string()]))
            .flatten()
            .collect();
        if let Some(profile) = self.default_profile.as_deref().filter(|p| !p.trim().is_empty()) {
            args.extend(["--default-profile".to_string(), profile.to_string()]);
        }
        let timeouts = [
            ("--compile-timeout", self.compile_timeout),
            ("--test-timeout", self.test_timeout),
        ];
        for (flag, secs) in timeouts {
            if let Some(secs) = secs {
                args.extend([flag.to_string(), secs.to_string()]);
            }
        }
        args
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = cli.settings().context("failed to resolve settings")?;
    let json = cli.json;

    let log_file = matches!(cli.command, Commands::Hook).then(|| settings.log_dir().join("waypoints.log"));
    logging::init(log_file.as_deref());

    match cli.command {
        Commands::Hook => cmd::hook::run(&settings),
        Commands::Init { ref session } => cmd::state::init(&settings, session, json),
        Commands::Status { ref session } => cmd::state::status(&settings, session, json),
        Commands::MarkComplete {
            ref phase,
            ref session,
        } => cmd::state::mark_complete(&settings, session, phase, json),
        Commands::SetPhase { phase, ref session } => {
            cmd::state::set_phase(&settings, session, phase, json)
        }
        Commands::Summary {
            ref phase,
            ref text,
            ref session,
        } => cmd::state::summary(&settings, session, phase, text, json),
        Commands::Reset { full, ref session } => cmd::state::reset(&settings, session, full, json),
        Commands::Detect { ref project } => cmd::detect::run(&settings, project.as_deref(), json),
        Commands::Install => cmd::install::install(&settings, &cli.hook_args(), json),
        Commands::Uninstall { purge } => cmd::install::uninstall(&settings, purge, json),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_args_repeat_install_settings() {
        let cli = Cli::parse_from([
            "waypoints",
            "--claude-dir",
            "/home/me/.claude",
            "--config",
            "/etc/wp/profiles.json",
            "--default-profile",
            "rust",
            "--compile-timeout",
            "600",
            "install",
        ]);
        let args = cli.hook_args();
        let pairs: Vec<[&str; 2]> = args
            .chunks(2)
            .map(|c| [c[0].as_str(), c[1].as_str()])
            .collect();
        for expected in [
            ["--claude-dir", "/home/me/.claude"],
            ["--config", "/etc/wp/profiles.json"],
            ["--default-profile", "rust"],
            ["--compile-timeout", "600"],
        ] {
            assert!(pairs.contains(&expected), "{expected:?} missing from {args:?}");
        }
    }
}
