//! Gitignore-style path exclusion.
//!
//! Rules come from two places: patterns handed over by configuration, and
//! `.gitignore` files discovered under each repository root. Each source is
//! compiled with the `ignore` crate's gitignore matcher; sources are then
//! consulted in order (configured first, shallower files before deeper
//! ones) and the last one with an opinion decides, so a nested
//! `!keep.log` can re-include what a configured `*.log` excluded.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories never descended into while looking for `.gitignore` files.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "vendor"];

const IGNORE_FILE: &str = ".gitignore";

/// Compiled rules anchored at one directory.
#[derive(Debug, Clone)]
struct Layer {
    base: PathBuf,
    rules: Gitignore,
}

impl Layer {
    fn from_patterns(base: &Path, patterns: &[String]) -> Option<Self> {
        let mut builder = GitignoreBuilder::new(base);
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                warn!("Invalid ignore pattern {:?}: {}", pattern, e);
            }
        }
        Self::build(base, builder)
    }

    fn from_file(file: &Path) -> Option<Self> {
        let base = file.parent()?;
        let mut builder = GitignoreBuilder::new(base);
        if let Some(e) = builder.add(file) {
            warn!("Problem reading {}: {}", file.display(), e);
        }
        Self::build(base, builder)
    }

    fn build(base: &Path, builder: GitignoreBuilder) -> Option<Self> {
        match builder.build() {
            Ok(rules) if rules.is_empty() => None,
            Ok(rules) => Some(Self {
                base: base.to_path_buf(),
                rules,
            }),
            Err(e) => {
                warn!("Failed to compile ignore rules for {}: {}", base.display(), e);
                None
            }
        }
    }

    /// `Some(true)` to exclude, `Some(false)` to re-include, `None` when no
    /// rule here applies. A path inside an excluded directory is excluded.
    fn decide(&self, path: &Path, is_dir: bool) -> Option<bool> {
        if path == self.base || !path.starts_with(&self.base) {
            return None;
        }
        match self.rules.matched_path_or_any_parents(path, is_dir) {
            Match::None => None,
            Match::Ignore(_) => Some(true),
            Match::Whitelist(_) => Some(false),
        }
    }
}

/// Ordered exclusion rules for a group of repository roots.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    roots: Vec<PathBuf>,
    patterns: Vec<String>,
    /// Configured patterns anchored at each root.
    configured: Vec<Layer>,
    /// Configured patterns for paths outside every root.
    outside: Option<Layer>,
    discovered: Vec<Layer>,
    sources: Vec<PathBuf>,
}

impl IgnoreMatcher {
    /// Creates a matcher holding only the configured patterns. Call
    /// [`load`](Self::load) to pick up `.gitignore` files.
    pub fn new(roots: Vec<PathBuf>, patterns: Vec<String>) -> Self {
        let configured = roots
            .iter()
            .filter_map(|root| Layer::from_patterns(root, &patterns))
            .collect();
        let outside = Layer::from_patterns(Path::new("/"), &patterns);
        Self {
            roots,
            patterns,
            configured,
            outside,
            discovered: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Re-reads every `.gitignore` under each root. Shallower files are
    /// consulted before deeper ones.
    pub fn load(&mut self) {
        let mut files: Vec<PathBuf> = Vec::new();
        for root in &self.roots {
            let walker = WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || !(e.file_type().is_dir()
                            && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
                });
            files.extend(
                walker
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file() && e.file_name() == IGNORE_FILE)
                    .map(|e| e.into_path()),
            );
        }
        files.sort_by_key(|f| f.components().count());

        self.discovered = files
            .iter()
            .filter_map(|file| {
                let layer = Layer::from_file(file)?;
                debug!(
                    "Loaded {} rules from {}",
                    layer.rules.num_ignores() + layer.rules.num_whitelists(),
                    file.display()
                );
                Some(layer)
            })
            .collect();
        self.sources = files;
    }

    /// Whether `path` is excluded. Asks the filesystem whether it is a
    /// directory; paths that no longer exist count as files.
    pub fn is_match(&self, path: &Path) -> bool {
        self.matched(path, path.is_dir())
    }

    /// Whether `path` is excluded, given its kind. Directory-only rules
    /// (`build/`) apply to directories and to everything below them.
    pub fn matched(&self, path: &Path, is_dir: bool) -> bool {
        let inside = self.roots.iter().any(|root| path.starts_with(root));
        let configured = if inside {
            self.configured.iter().collect::<Vec<_>>()
        } else {
            self.outside.iter().collect()
        };

        configured
            .into_iter()
            .chain(&self.discovered)
            .fold(false, |excluded, layer| {
                layer.decide(path, is_dir).unwrap_or(excluded)
            })
    }

    /// `.gitignore` files found by the last [`load`](Self::load).
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn matcher(root: &Path, patterns: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::new(
            vec![root.to_path_buf()],
            patterns.iter().map(|p| p.to_string()).collect(),
        )
    }

    #[test]
    fn test_name_patterns_match_at_any_depth() {
        let root = Path::new("/repo");
        let m = matcher(root, &["*.log", "build"]);

        assert!(m.matched(&root.join("debug.log"), false));
        assert!(m.matched(&root.join("a/b/trace.log"), false));
        assert!(m.matched(&root.join("build/out.rs"), false));
        assert!(m.matched(&root.join("sub/build"), true));
        assert!(!m.matched(&root.join("src/main.rs"), false));
    }

    #[test]
    fn test_negation_last_match_wins() {
        let root = Path::new("/repo");
        let m = matcher(root, &["*.log", "!important.log"]);

        assert!(m.matched(&root.join("debug.log"), false));
        assert!(!m.matched(&root.join("important.log"), false));
        assert!(!m.matched(&root.join("logs/important.log"), false));

        let m = matcher(root, &["!important.log", "*.log"]);
        assert!(m.matched(&root.join("important.log"), false));
    }

    #[test]
    fn test_double_star() {
        let root = Path::new("/repo");
        let m = matcher(root, &["**/vendor/**"]);

        assert!(m.matched(&root.join("vendor/lib.go"), false));
        assert!(m.matched(&root.join("svc/vendor/x/y.go"), false));
        assert!(!m.matched(&root.join("vendored/lib.go"), false));

        let m = matcher(root, &["docs/**/*.md"]);
        assert!(m.matched(&root.join("docs/a.md"), false));
        assert!(m.matched(&root.join("docs/x/y/a.md"), false));
        assert!(!m.matched(&root.join("src/a.md"), false));
    }

    #[test]
    fn test_slash_pattern_is_anchored() {
        let root = Path::new("/repo");
        let m = matcher(root, &["gen/*.rs", "/out"]);

        assert!(m.matched(&root.join("gen/api.rs"), false));
        assert!(!m.matched(&root.join("gen/deep/api.rs"), false));
        assert!(!m.matched(&root.join("src/gen/api.rs"), false));
        assert!(m.matched(&root.join("out"), true));
        assert!(!m.matched(&root.join("src/out"), true));
    }

    #[test]
    fn test_dir_only_rules_skip_files() {
        let root = Path::new("/repo");
        let m = matcher(root, &["cache/"]);

        assert!(m.matched(&root.join("cache"), true));
        assert!(m.matched(&root.join("cache/entry.rs"), false));
        assert!(!m.matched(&root.join("src/cache"), false));

        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/cache")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/cache"), "").unwrap();
        let m = matcher(dir.path(), &["cache/"]);
        assert!(m.is_match(&dir.path().join("a/cache")));
        assert!(!m.is_match(&dir.path().join("b/cache")));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let root = Path::new("/repo");
        let m = matcher(root, &["[unclosed", "*.tmp"]);

        assert!(!m.matched(&root.join("[unclosed"), false));
        assert!(m.matched(&root.join("x.tmp"), false));
    }

    #[test]
    fn test_discovered_rules_are_scoped_to_their_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("api/gen")).unwrap();
        fs::create_dir_all(root.join("web")).unwrap();
        fs::write(
            root.join("api/.gitignore"),
            "# generated code\n\n*.pb.rs\ngen/\n!keep.pb.rs\n",
        )
        .unwrap();

        let mut m = matcher(root, &[]);
        m.load();

        assert_eq!(m.sources(), &[root.join("api/.gitignore")]);
        assert!(m.is_match(&root.join("api/types.pb.rs")));
        assert!(m.is_match(&root.join("api/gen/x.rs")));
        assert!(!m.is_match(&root.join("api/keep.pb.rs")));
        assert!(!m.is_match(&root.join("web/types.pb.rs")));
    }

    #[test]
    fn test_nested_gitignore_overrides_configured_patterns() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("logs")).unwrap();
        fs::write(root.join("logs/.gitignore"), "!audit.log\n").unwrap();

        let mut m = matcher(root, &["*.log"]);
        m.load();

        assert!(m.is_match(&root.join("app.log")));
        assert!(m.is_match(&root.join("logs/app.log")));
        assert!(!m.is_match(&root.join("logs/audit.log")));
    }

    #[test]
    fn test_discovery_skips_vendor_and_git() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("vendor/dep")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("vendor/dep/.gitignore"), "*.rs\n").unwrap();
        fs::write(root.join(".git/.gitignore"), "*.rs\n").unwrap();
        fs::write(root.join(".gitignore"), "*.tmp\n").unwrap();

        let mut m = matcher(root, &["target"]);
        m.load();

        assert_eq!(m.sources(), &[root.join(".gitignore")]);
        assert_eq!(m.patterns(), &["target".to_string()]);
        assert!(!m.is_match(&root.join("vendor/dep/lib.rs")));
        assert!(m.is_match(&root.join("scratch.tmp")));
    }

    #[test]
    fn test_configured_rules_ignore_components_above_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("build").join("project");
        let m = matcher(&root, &["build"]);

        assert!(!m.matched(&root.join("src/lib.rs"), false));
        assert!(m.matched(&root.join("build/lib.rs"), false));
        assert!(m.matched(Path::new("/elsewhere/build/lib.rs"), false));
    }
}
