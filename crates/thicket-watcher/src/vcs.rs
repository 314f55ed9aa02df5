//! Version control queries used by sync.

use crate::error::VcsError;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Paths changed between a revision and the working head, relative to the
/// repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

pub trait VersionControl: Send + Sync {
    fn is_repository(&self, path: &Path) -> bool;

    fn current_revision(&self, repo: &Path) -> Result<String, VcsError>;

    fn current_branch(&self, repo: &Path) -> Result<String, VcsError>;

    fn changed_since(&self, repo: &Path, revision: &str) -> Result<ChangeSet, VcsError>;

    /// Local branch names.
    fn list_branches(&self, repo: &Path) -> Result<Vec<String>, VcsError>;
}

/// Shells out to the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    /// Runs git with paths printed verbatim and returns raw stdout.
    fn output(&self, repo: &Path, args: &[&str]) -> Result<String, VcsError> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["-c", "core.quotePath=false"])
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(VcsError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run(&self, repo: &Path, args: &[&str]) -> Result<String, VcsError> {
        Ok(self.output(repo, args)?.trim().to_string())
    }
}

impl VersionControl for GitCli {
    fn is_repository(&self, path: &Path) -> bool {
        path.join(".git").is_dir()
    }

    fn current_revision(&self, repo: &Path) -> Result<String, VcsError> {
        self.run(repo, &["rev-parse", "HEAD"])
    }

    fn current_branch(&self, repo: &Path) -> Result<String, VcsError> {
        self.run(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn changed_since(&self, repo: &Path, revision: &str) -> Result<ChangeSet, VcsError> {
        let output = self.output(repo, &["diff", "--name-status", "-z", revision, "HEAD"])?;
        Ok(parse_name_status(&output))
    }

    fn list_branches(&self, repo: &Path) -> Result<Vec<String>, VcsError> {
        let output = self.run(repo, &["branch", "--format=%(refname:short)"])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Parses `git diff --name-status -z`: NUL-separated fields, a status
/// followed by one path, or by two for renames and copies. Renames count as
/// a deletion of the old path plus an addition of the new one; copies as an
/// addition.
pub fn parse_name_status(output: &str) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut fields = output.split('\0').filter(|f| !f.is_empty());
    while let Some(status) = fields.next() {
        let Some(kind) = status.chars().next() else {
            continue;
        };
        let paired = matches!(kind, 'R' | 'C');
        let Some(first) = fields.next() else {
            debug!("Truncated diff entry: {}", status);
            break;
        };
        let second = if paired { fields.next() } else { None };

        match (kind, second) {
            ('A', _) => changes.added.push(first.to_string()),
            ('M' | 'T', _) => changes.modified.push(first.to_string()),
            ('D', _) => changes.deleted.push(first.to_string()),
            ('R', Some(to)) => {
                changes.deleted.push(first.to_string());
                changes.added.push(to.to_string());
            }
            ('C', Some(to)) => changes.added.push(to.to_string()),
            _ => debug!("Ignoring diff entry: {} {}", status, first),
        }
    }
    changes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    pub(crate) fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub(crate) fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .output()
            .unwrap()
            .status;
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_parse_name_status() {
        let output = "A\0new.rs\0M\0src/lib.rs\0D\0old.rs\0R100\0from.rs\0to.rs\0C75\0base.rs\0copy.rs\0M\0with\ttab.rs\0";
        let changes = parse_name_status(output);

        assert_eq!(changes.added, vec!["new.rs", "to.rs", "copy.rs"]);
        assert_eq!(changes.modified, vec!["src/lib.rs", "with\ttab.rs"]);
        assert_eq!(changes.deleted, vec!["old.rs", "from.rs"]);
        assert!(parse_name_status("").is_empty());
    }

    #[test]
    fn test_git_cli_against_real_repository() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let repo = dir.path();
        git(repo, &["init", "-q", "-b", "main"]);
        fs::write(repo.join("a.rs"), "fn a() {}").unwrap();
        fs::write(repo.join("b.rs"), "fn b() {}").unwrap();
        git(repo, &["add", "."]);
        git(repo, &["commit", "-q", "-m", "first"]);

        let git_cli = GitCli;
        assert!(git_cli.is_repository(repo));
        let first = git_cli.current_revision(repo).unwrap();
        assert_eq!(first.len(), 40);
        assert_eq!(git_cli.current_branch(repo).unwrap(), "main");

        fs::write(repo.join("a.rs"), "fn a2() {}").unwrap();
        fs::remove_file(repo.join("b.rs")).unwrap();
        fs::write(repo.join("c.rs"), "struct Config { port: u16 }").unwrap();
        git(repo, &["add", "-A"]);
        git(repo, &["commit", "-q", "-m", "second"]);
        git(repo, &["branch", "feature"]);

        let changes = git_cli.changed_since(repo, &first).unwrap();
        assert_eq!(changes.added, vec!["c.rs"]);
        assert_eq!(changes.modified, vec!["a.rs"]);
        assert_eq!(changes.deleted, vec!["b.rs"]);

        assert_eq!(git_cli.list_branches(repo).unwrap(), vec!["feature", "main"]);
        assert!(git_cli.changed_since(repo, "not-a-revision").is_err());
        assert!(!git_cli.is_repository(&repo.join("missing")));
    }

    #[test]
    fn test_non_ascii_paths_are_not_quoted() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let repo = dir.path();
        git(repo, &["init", "-q", "-b", "main"]);
        fs::write(repo.join("café.rs"), "fn old_fn() {}").unwrap();
        fs::write(repo.join("naïve.rs"), "fn gone() {}").unwrap();
        git(repo, &["add", "."]);
        git(repo, &["commit", "-q", "-m", "first"]);
        let first = GitCli.current_revision(repo).unwrap();

        fs::write(repo.join("café.rs"), "fn new_fn() {}").unwrap();
        fs::remove_file(repo.join("naïve.rs")).unwrap();
        git(repo, &["add", "-A"]);
        git(repo, &["commit", "-q", "-m", "second"]);

        let changes = GitCli.changed_since(repo, &first).unwrap();
        assert_eq!(changes.modified, vec!["café.rs"]);
        assert_eq!(changes.deleted, vec!["naïve.rs"]);
    }
}
