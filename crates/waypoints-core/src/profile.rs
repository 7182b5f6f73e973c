//! Technology profiles and per-project profile detection.
//!
//! A profile names the compile/test commands of a toolchain and the globs
//! that separate main sources from test sources. The profile for a project is
//! chosen in this order: the override file, auto-detection, then the
//! configured default. Detection never guesses: a tie for the best score
//! selects nothing.

use crate::error::{Result, WaypointsError};
use crate::io::read_json_config;
use crate::pattern::PatternSet;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The profile set shipped with the binary, written to the install root by
/// `waypoints install`.
pub const BUILTIN_PROFILES: &str = include_str!("../config/profiles.json");

const MARKER_SCORE: u32 = 10;
const PATTERN_SCORE: u32 = 1;

const PLACEHOLDERS: &[&str] = &["{file}", "{testClass}", "{testName}", "{testFile}"];

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Detection {
    /// Files that must exist directly in the project directory.
    #[serde(default, alias = "files")]
    pub markers: Vec<String>,
    /// Globs matched against every file below the project directory.
    #[serde(default)]
    pub patterns: PatternSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Key of this profile in the config document.
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub detection: Detection,
    #[serde(default)]
    pub compile: Option<String>,
    #[serde(default)]
    pub test_compile: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    pub main_source_pattern: PatternSet,
    pub test_source_pattern: PatternSet,
    /// Build and configuration files; always editable.
    #[serde(default)]
    pub config_pattern: PatternSet,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_main_source(&self, path: &Path) -> bool {
        self.main_source_pattern.matches_any(path)
    }

    pub fn is_test_source(&self, path: &Path) -> bool {
        self.test_source_pattern.matches_any(path)
    }

    pub fn is_config(&self, path: &Path) -> bool {
        self.config_pattern.matches_any(path)
    }

    /// Command used to check that test sources compile.
    pub fn test_compile_command(&self) -> Option<&str> {
        self.test_compile.as_deref().or(self.compile.as_deref())
    }
}

/// Substitute `{file}` in a profile command.
pub fn command_with_file(command: &str, file: &Path) -> String {
    command.replace("{file}", &file.display().to_string())
}

/// True when `command` still needs a per-file argument and so cannot run at a
/// turn boundary.
pub fn has_placeholder(command: &str) -> bool {
    PLACEHOLDERS.iter().any(|p| command.contains(p))
}

// ---------------------------------------------------------------------------
// ProfileConfig
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigDocument {
    Wrapped { profiles: BTreeMap<String, Profile> },
    Bare(BTreeMap<String, Profile>),
}

/// All configured profiles, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProfileConfig {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileConfig {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_PROFILES, Path::new("<builtin>"))
    }

    /// Load from `path`, falling back to the built-in set when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        match read_json_config::<ConfigDocument>(path)? {
            Some(doc) => Ok(Self::from_document(doc)),
            None => {
                debug!(path = %path.display(), "profile config not found, using built-in profiles");
                Self::builtin()
            }
        }
    }

    pub fn parse(data: &str, origin: &Path) -> Result<Self> {
        let doc: ConfigDocument =
            serde_json::from_str(data).map_err(|e| WaypointsError::MalformedConfig {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: ConfigDocument) -> Self {
        let mut profiles = match doc {
            ConfigDocument::Wrapped { profiles } | ConfigDocument::Bare(profiles) => profiles,
        };
        for (name, profile) in profiles.iter_mut() {
            profile.name = name.clone();
        }
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Score every profile against `project_dir` and pick the unambiguous winner.
    pub fn detect(&self, project_dir: &Path) -> DetectionReport {
        let mut scores: BTreeMap<String, u32> = BTreeMap::new();

        for (name, profile) in &self.profiles {
            let markers = profile
                .detection
                .markers
                .iter()
                .filter(|m| project_dir.join(m).exists())
                .count() as u32;
            scores.insert(name.clone(), markers * MARKER_SCORE);
        }

        // (profile, glob) pairs still waiting for a matching file.
        let mut pending: Vec<(&str, &crate::pattern::Glob)> = self
            .profiles
            .iter()
            .flat_map(|(name, p)| p.detection.patterns.iter().map(move |g| (name.as_str(), g)))
            .collect();
        if !pending.is_empty() {
            walk_files(project_dir, &mut |rel: &Path| {
                pending.retain(|(name, glob)| {
                    if glob.matches_path(rel) {
                        *scores.entry((*name).to_string()).or_default() += PATTERN_SCORE;
                        false
                    } else {
                        true
                    }
                });
                !pending.is_empty()
            });
        }

        let selected = pick_unambiguous(&scores);
        DetectionReport { scores, selected }
    }
}

fn pick_unambiguous(scores: &BTreeMap<String, u32>) -> Option<String> {
    let best = scores.values().copied().max().filter(|&s| s > 0)?;
    let mut top = scores.iter().filter(|(_, s)| **s == best);
    let (name, _) = top.next()?;
    if top.next().is_some() {
        return None;
    }
    Some(name.clone())
}

/// Dependency and build output directories; never a signal for detection.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "build", "dist", "__pycache__"];

/// Visit every regular file below `root`, skipping hidden entries, anything
/// `.gitignore` excludes, and [`SKIPPED_DIRS`]. `visit` receives the path
/// relative to `root` and returns false to stop.
fn walk_files(root: &Path, visit: &mut dyn FnMut(&Path) -> bool) {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false)
        .parents(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.depth() > 0 && SKIPPED_DIRS.iter().any(|d| entry.file_name() == *d))
        });
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !visit(rel) {
            return;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub scores: BTreeMap<String, u32>,
    pub selected: Option<String>,
}

// ---------------------------------------------------------------------------
// ProfileResolver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Override,
    Detected,
    Default,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: Profile,
    pub via: ResolvedBy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideDocument {
    #[serde(default)]
    active_profile: Option<String>,
}

#[derive(Debug)]
enum Source {
    Files {
        config_file: PathBuf,
        override_file: PathBuf,
        default_profile: Option<String>,
        project_dir: PathBuf,
    },
    Fixed(Option<Profile>),
}

/// Resolves the active profile for one project directory, once.
#[derive(Debug)]
pub struct ProfileResolver {
    source: Source,
    cache: OnceCell<Option<Resolution>>,
}

impl ProfileResolver {
    pub fn new(
        config_file: impl Into<PathBuf>,
        override_file: impl Into<PathBuf>,
        default_profile: Option<String>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: Source::Files {
                config_file: config_file.into(),
                override_file: override_file.into(),
                default_profile,
                project_dir: project_dir.into(),
            },
            cache: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &crate::paths::Settings, project_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            &settings.config_file,
            &settings.override_file,
            settings.default_profile.clone(),
            project_dir,
        )
    }

    /// A resolver that always yields `profile`, for tests and embedding.
    pub fn fixed(profile: Option<Profile>) -> Self {
        Self {
            source: Source::Fixed(profile),
            cache: OnceCell::new(),
        }
    }

    pub fn resolve(&self) -> Result<Option<&Profile>> {
        Ok(self.resolution()?.map(|r| &r.profile))
    }

    pub fn resolution(&self) -> Result<Option<&Resolution>> {
        if self.cache.get().is_none() {
            let resolved = self.resolve_uncached()?;
            let _ = self.cache.set(resolved);
        }
        Ok(self.cache.get().and_then(Option::as_ref))
    }

    fn resolve_uncached(&self) -> Result<Option<Resolution>> {
        let (config_file, override_file, default_profile, project_dir) = match &self.source {
            Source::Fixed(p) => {
                return Ok(p.clone().map(|profile| Resolution {
                    profile,
                    via: ResolvedBy::Fixed,
                }))
            }
            Source::Files {
                config_file,
                override_file,
                default_profile,
                project_dir,
            } => (config_file, override_file, default_profile, project_dir),
        };

        let config = ProfileConfig::load(config_file)?;
        let lookup = |name: &str, via: ResolvedBy| -> Result<Option<Resolution>> {
            config
                .get(name)
                .cloned()
                .map(|profile| Some(Resolution { profile, via }))
                .ok_or_else(|| WaypointsError::UnknownProfile(name.to_string()))
        };

        if let Some(doc) = read_json_config::<OverrideDocument>(override_file)? {
            if let Some(name) = doc.active_profile.filter(|n| !n.trim().is_empty()) {
                debug!(profile = %name, "profile forced by override file");
                return lookup(&name, ResolvedBy::Override);
            }
        }

        let report = config.detect(project_dir);
        if let Some(name) = report.selected {
            debug!(profile = %name, "profile detected");
            return lookup(&name, ResolvedBy::Detected);
        }
        if report.scores.values().any(|&s| s > 0) {
            warn!(scores = ?report.scores, "profile detection is ambiguous");
        }

        if let Some(name) = default_profile.as_deref().filter(|n| !n.trim().is_empty()) {
            debug!(profile = %name, "using default profile");
            return lookup(name, ResolvedBy::Default);
        }

        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "").unwrap();
    }

    fn two_profile_config() -> ProfileConfig {
        ProfileConfig::parse(
            r#"{
              "alpha": {
                "detection": {"markers": ["alpha.toml"], "patterns": ["*.a"]},
                "mainSourcePattern": "*.a", "testSourcePattern": "*_test.a"
              },
              "beta": {
                "detection": {"markers": ["beta.toml"], "patterns": ["*.b"]},
                "mainSourcePattern": "*.b", "testSourcePattern": "*_test.b"
              }
            }"#,
            Path::new("test.json"),
        )
        .unwrap()
    }

    #[test]
    fn builtin_profiles_parse() {
        let config = ProfileConfig::builtin().unwrap();
        let go = config.get("go").unwrap();
        assert_eq!(go.name, "go");
        assert_eq!(go.display_name(), "Go");
        assert!(go.is_test_source(Path::new("pkg/x_test.go")));
        assert!(config.names().count() >= 5);
    }

    #[test]
    fn wrapped_document_is_accepted() {
        let config = ProfileConfig::parse(
            r#"{"profiles": {"x": {"mainSourcePattern": "*.x", "testSourcePattern": "*.tx",
                "detection": {"files": ["x.cfg"]}}}}"#,
            Path::new("w.json"),
        )
        .unwrap();
        assert_eq!(config.get("x").unwrap().detection.markers, vec!["x.cfg"]);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let err = ProfileConfig::parse("{\"x\": 3}", Path::new("bad.json")).unwrap_err();
        assert!(matches!(err, WaypointsError::MalformedConfig { .. }));
    }

    #[test]
    fn go_project_detects_go() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "go.mod");
        touch(dir.path(), "main.go");
        touch(dir.path(), "internal/util/strings.go");

        let report = ProfileConfig::builtin().unwrap().detect(dir.path());
        assert_eq!(report.selected.as_deref(), Some("go"));
        assert_eq!(report.scores["go"], MARKER_SCORE + PATTERN_SCORE);
    }

    #[test]
    fn marker_outweighs_patterns() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "alpha.toml");
        touch(dir.path(), "src/one.b");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.selected.as_deref(), Some("alpha"));
    }

    #[test]
    fn tied_scores_select_nothing() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "src/one.a");
        touch(dir.path(), "src/two.b");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.scores["alpha"], report.scores["beta"]);
        assert_eq!(report.selected, None);

        touch(dir.path(), "alpha.toml");
        touch(dir.path(), "beta.toml");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.selected, None);
    }

    #[test]
    fn empty_directory_selects_nothing() {
        let dir = TempDir::new().unwrap();
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.selected, None);
        assert!(report.scores.values().all(|&s| s == 0));
    }

    #[test]
    fn hidden_directories_are_not_scanned() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), ".cache/stuff.a");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.scores["alpha"], 0);
    }

    #[test]
    fn dependency_and_ignored_directories_are_not_scanned() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "node_modules/pkg/index.a");
        touch(dir.path(), "target/debug/gen.a");
        touch(dir.path(), "generated/out.a");
        std::fs::write(dir.path().join(".gitignore"), "generated/\n").unwrap();
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.scores["alpha"], 0);

        touch(dir.path(), "src/lib.a");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.scores["alpha"], 1);
    }

    #[test]
    fn markers_are_not_searched_recursively() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "nested/alpha.toml");
        let report = two_profile_config().detect(dir.path());
        assert_eq!(report.scores["alpha"], 0);
    }

    fn resolver(dir: &TempDir, default: Option<&str>) -> ProfileResolver {
        ProfileResolver::new(
            dir.path().join("missing-config.json"),
            dir.path().join("override.json"),
            default.map(str::to_string),
            dir.path().join("project"),
        )
    }

    #[test]
    fn override_beats_detection_and_default() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "project/go.mod");
        touch(dir.path(), "project/main.go");
        std::fs::write(
            dir.path().join("override.json"),
            r#"{"activeProfile": "python"}"#,
        )
        .unwrap();

        let r = resolver(&dir, Some("rust"));
        assert_eq!(r.resolve().unwrap().unwrap().name, "python");
        assert_eq!(r.resolution().unwrap().unwrap().via, ResolvedBy::Override);
    }

    #[test]
    fn detection_beats_default() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "project/go.mod");
        let r = resolver(&dir, Some("rust"));
        assert_eq!(r.resolve().unwrap().unwrap().name, "go");
    }

    #[test]
    fn default_used_when_nothing_detected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("project")).unwrap();
        let r = resolver(&dir, Some("rust"));
        let res = r.resolution().unwrap().unwrap();
        assert_eq!(res.profile.name, "rust");
        assert_eq!(res.via, ResolvedBy::Default);

        assert!(resolver(&dir, None).resolve().unwrap().is_none());
    }

    #[test]
    fn empty_override_falls_through() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "project/Cargo.toml");
        std::fs::write(dir.path().join("override.json"), r#"{"activeProfile": ""}"#).unwrap();
        assert_eq!(resolver(&dir, None).resolve().unwrap().unwrap().name, "rust");
    }

    #[test]
    fn unknown_override_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("override.json"),
            r#"{"activeProfile": "cobol"}"#,
        )
        .unwrap();
        let err = resolver(&dir, None).resolve().unwrap_err();
        assert!(matches!(err, WaypointsError::UnknownProfile(ref n) if n == "cobol"));
    }

    #[test]
    fn malformed_override_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("override.json"), "{oops").unwrap();
        assert!(matches!(
            resolver(&dir, None).resolve(),
            Err(WaypointsError::MalformedConfig { .. })
        ));
    }

    #[test]
    fn placeholders() {
        assert!(has_placeholder("javac {file}"));
        assert!(has_placeholder("mvn test -Dtest={testClass}"));
        assert!(!has_placeholder("go build ./..."));
        assert_eq!(
            command_with_file("javac {file}", Path::new("src/A.java")),
            "javac src/A.java"
        );
    }
}
