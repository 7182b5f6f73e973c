use crate::output::print_json;
use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use waypoints_core::io::{read_json_config, write_if_missing, write_json};
use waypoints_core::paths::{display_with_tilde, Settings};
use waypoints_core::profile::BUILTIN_PROFILES;
use waypoints_core::settings::{hook_command, install_hooks, uninstall_hooks, MergeReport};
use waypoints_core::WaypointsError;

/// Extra seconds the host allows beyond the build timeouts before giving up
/// on a hook.
const HOOK_TIMEOUT_SLACK_SECS: u64 = 30;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstallOutput {
    install_dir: String,
    settings_file: String,
    hook_command: Option<String>,
    config_written: bool,
    hooks_changed: usize,
    permission_changed: bool,
}

fn load_settings_doc(settings: &Settings) -> anyhow::Result<Option<Value>> {
    Ok(read_json_config::<Value>(&settings.settings_file())?)
}

pub fn install(settings: &Settings, hook_args: &[String], json: bool) -> anyhow::Result<()> {
    if let Some(parent) = settings.install_dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(WaypointsError::MissingDirectory(parent.to_path_buf()).into());
        }
    }
    let settings_path = settings.settings_file();
    // Validate before touching anything on disk.
    let mut doc = load_settings_doc(settings)?.unwrap_or_else(|| json!({}));

    let config_written = write_if_missing(&settings.config_file, BUILTIN_PROFILES.as_bytes())
        .with_context(|| format!("failed to write {}", settings.config_file.display()))?;
    waypoints_core::io::ensure_dir(&settings.log_dir())?;

    let binary = std::env::current_exe().context("failed to locate the waypoints binary")?;
    let command = hook_command(&binary, hook_args);
    let build_timeout = settings.compile_timeout.as_secs()
        + settings.test_timeout.as_secs()
        + HOOK_TIMEOUT_SLACK_SECS;
    let report = install_hooks(&mut doc, &command, build_timeout, &settings_path)?;
    if report.changed() {
        write_json(&settings_path, &doc)
            .with_context(|| format!("failed to write {}", settings_path.display()))?;
    }

    if json {
        return print_json(&InstallOutput {
            install_dir: settings.install_dir.display().to_string(),
            settings_file: settings_path.display().to_string(),
            hook_command: Some(command),
            config_written,
            hooks_changed: report.hooks_changed,
            permission_changed: report.permission_changed,
        });
    }

    println!("Installed waypoints in {}", display_with_tilde(&settings.install_dir));
    if config_written {
        println!("  wrote profile config {}", display_with_tilde(&settings.config_file));
    }
    print_merge("registered", &report, &settings_path);
    println!("  hook command: {command}");
    Ok(())
}

pub fn uninstall(settings: &Settings, purge: bool, json: bool) -> anyhow::Result<()> {
    let settings_path = settings.settings_file();
    let report = match load_settings_doc(settings)? {
        Some(mut doc) => {
            let report = uninstall_hooks(&mut doc, &settings_path)?;
            if report.changed() {
                write_json(&settings_path, &doc)
                    .with_context(|| format!("failed to write {}", settings_path.display()))?;
            }
            report
        }
        None => MergeReport::default(),
    };

    if purge && settings.install_dir.exists() {
        std::fs::remove_dir_all(&settings.install_dir)
            .with_context(|| format!("failed to remove {}", settings.install_dir.display()))?;
    }

    if json {
        return print_json(&InstallOutput {
            install_dir: settings.install_dir.display().to_string(),
            settings_file: settings_path.display().to_string(),
            hook_command: None,
            config_written: false,
            hooks_changed: report.hooks_changed,
            permission_changed: report.permission_changed,
        });
    }

    println!("Uninstalled waypoints");
    print_merge("removed", &report, &settings_path);
    if purge {
        println!("  deleted {}", display_with_tilde(&settings.install_dir));
    }
    Ok(())
}

fn print_merge(verb: &str, report: &MergeReport, path: &std::path::Path) {
    if report.changed() {
        println!(
            "  {verb} {} hook entr{} in {}",
            report.hooks_changed,
            if report.hooks_changed == 1 { "y" } else { "ies" },
            display_with_tilde(path)
        );
    } else {
        println!("  {} already up to date", display_with_tilde(path));
    }
}
