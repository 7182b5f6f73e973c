//! Glob patterns used by profiles to classify source files.
//!
//! `**/` matches zero or more directories, `**` matches anything, `*`
//! matches within one path segment and `?` matches a single non-separator
//! character. A pattern matches when it matches a suffix of the path that
//! starts at a segment boundary, so `*.go` matches `cmd/server/main.go`.

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Deserializer};
use std::path::Path;

/// Compile `pattern` so it may match any trailing run of path segments.
fn build(pattern: &str) -> Result<globset::Glob, globset::Error> {
    let anchored = if pattern.starts_with("**") {
        pattern.to_string()
    } else {
        format!("**/{}", pattern.trim_start_matches('/'))
    };
    GlobBuilder::new(&anchored)
        .literal_separator(true)
        .backslash_escape(false)
        .build()
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

// ---------------------------------------------------------------------------
// Glob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Glob {
    matcher: GlobMatcher,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        Ok(Self {
            matcher: build(pattern)?.compile_matcher(),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(normalize(path))
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        self.matches(&path.to_string_lossy())
    }
}

// ---------------------------------------------------------------------------
// PatternSet
// ---------------------------------------------------------------------------

/// One or more globs. Config accepts either a single string or an array.
#[derive(Debug, Clone)]
pub struct PatternSet {
    globs: Vec<Glob>,
    set: GlobSet,
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            globs: Vec::new(),
            set: GlobSet::empty(),
        }
    }
}

impl PatternSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut globs = Vec::new();
        for pattern in patterns {
            let glob = build(pattern.as_ref())?;
            globs.push(Glob {
                matcher: glob.compile_matcher(),
            });
            builder.add(glob);
        }
        Ok(Self {
            globs,
            set: builder.build()?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Glob> {
        self.globs.iter()
    }

    pub fn matches_any(&self, path: &Path) -> bool {
        self.set.is_match(normalize(&path.to_string_lossy()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for PatternSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        };
        PatternSet::new(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, path: &str) -> bool {
        Glob::new(pattern).unwrap().matches(path)
    }

    #[test]
    fn single_star_stays_in_segment() {
        assert!(m("*.go", "main.go"));
        assert!(m("*.go", "cmd/server/main.go"));
        assert!(m("src/*.rs", "src/lib.rs"));
        assert!(!m("src/*.rs", "src/nested/lib.rs"));
    }

    #[test]
    fn double_star_spans_directories() {
        assert!(m("src/main/**/*.java", "src/main/java/com/acme/App.java"));
        assert!(m("src/main/**/*.java", "/abs/project/src/main/App.java"));
        assert!(!m("src/main/**/*.java", "src/test/java/AppTest.java"));
        assert!(m("tests/**", "tests/a/b/c.py"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(m("?.c", "a.c"));
        assert!(!m("?.c", "ab.c"));
        assert!(!m("a?b", "a/b"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(m("*_test.go", "pkg/main_test.go"));
        assert!(!m("*.go", "maingo"));
        assert!(m("(x)+.txt", "(x)+.txt"));
        assert!(m("a.b$", "dir/a.b$"));
    }

    #[test]
    fn leading_double_star_is_kept() {
        assert!(m("**/*.rs", "lib.rs"));
        assert!(m("**/tests/*.rs", "crate/tests/it.rs"));
        assert!(m("/src/*.rs", "proj/src/lib.rs"));
    }

    #[test]
    fn pattern_must_start_at_segment_boundary() {
        assert!(m("test_*.py", "tests/test_app.py"));
        assert!(!m("test_*.py", "tests/mytest_app.py"));
    }

    #[test]
    fn backslashes_are_normalized() {
        assert!(m("src/*.rs", "src\\lib.rs"));
    }

    #[test]
    fn pattern_set_accepts_string_or_array() {
        let one: PatternSet = serde_json::from_str("\"*.rs\"").unwrap();
        assert!(one.matches_any(Path::new("a/b.rs")));

        let many: PatternSet = serde_json::from_str("[\"*.ts\", \"*.tsx\"]").unwrap();
        assert!(many.matches_any(Path::new("ui/App.tsx")));
        assert!(!many.matches_any(Path::new("ui/App.js")));
    }

    #[test]
    fn pattern_set_agrees_with_its_globs() {
        let set = PatternSet::new(["src/main/**/*.java", "*.kt"]).unwrap();
        for path in ["src/main/java/App.java", "a/B.kt", "src/test/java/AppTest.java", "x.java"] {
            let any = set.iter().any(|g| g.matches(path));
            assert_eq!(set.matches_any(Path::new(path)), any, "{path}");
        }
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn empty_pattern_set_matches_nothing() {
        assert!(!PatternSet::default().matches_any(Path::new("anything")));
    }
}
