use crate::output::{print_json, print_table};
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use waypoints_core::paths::Settings;
use waypoints_core::profile::{ProfileConfig, ProfileResolver, ResolvedBy};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectOutput<'a> {
    project: String,
    profile: Option<&'a str>,
    resolved_by: Option<ResolvedBy>,
    scores: &'a BTreeMap<String, u32>,
}

pub fn run(settings: &Settings, project: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let project = match project {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().context("failed to determine working directory")?,
    };
    let config = ProfileConfig::load(&settings.config_file).context("failed to load profile config")?;
    let report = config.detect(&project);
    let resolver = ProfileResolver::from_settings(settings, &project);
    let resolution = resolver.resolution().context("failed to resolve profile")?;

    if json {
        return print_json(&DetectOutput {
            project: project.display().to_string(),
            profile: resolution.map(|r| r.profile.name.as_str()),
            resolved_by: resolution.map(|r| r.via),
            scores: &report.scores,
        });
    }

    match resolution {
        Some(r) => println!(
            "profile: {} ({}), {}",
            r.profile.name,
            r.profile.display_name(),
            match r.via {
                ResolvedBy::Override => "forced by override file",
                ResolvedBy::Detected => "detected",
                ResolvedBy::Default => "default profile",
                ResolvedBy::Fixed => "fixed",
            }
        ),
        None => println!("profile: none (builds are not verified and edits are not guarded)"),
    }
    println!();

    let mut rows: Vec<(&String, &u32)> = report.scores.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    print_table(
        &["PROFILE", "SCORE"],
        rows.into_iter()
            .map(|(name, score)| vec![name.clone(), score.to_string()])
            .collect(),
    );
    Ok(())
}
