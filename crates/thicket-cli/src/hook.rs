//! Git `post-commit` hook that keeps the graph synced after each commit.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HOOK_NAME: &str = "post-commit";
const SHEBANG: &str = "#!/bin/sh\n";
const BEGIN_MARKER: &str = "# BEGIN thicket hook";
const END_MARKER: &str = "# END thicket hook";
const SECTION: &str = "# BEGIN thicket hook\nthicket sync 2>/dev/null &\n# END thicket hook\n";

#[derive(Error, Debug)]
pub enum HookError {
    #[error("not inside a git repository: {0}")]
    NoRepository(PathBuf),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installed {
    Created,
    Appended,
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    Deleted,
    Stripped,
    NoHook,
    NotInstalled,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HookError + '_ {
    move |source| HookError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Walks up from `start` to the repository's git directory. A `.git` file
/// (worktrees, submodules) is followed to the directory it points at.
pub fn find_git_dir(start: &Path) -> Result<PathBuf, HookError> {
    for dir in start.ancestors() {
        let candidate = dir.join(".git");
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if candidate.is_file() {
            let content = fs::read_to_string(&candidate).map_err(io_err(&candidate))?;
            if let Some(target) = content.trim().strip_prefix("gitdir:") {
                return Ok(dir.join(target.trim()));
            }
        }
    }
    Err(HookError::NoRepository(start.to_path_buf()))
}

pub fn hook_path(git_dir: &Path) -> PathBuf {
    git_dir.join("hooks").join(HOOK_NAME)
}

fn read_hook(path: &Path) -> Result<Option<String>, HookError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

fn write_hook(path: &Path, content: &str) -> Result<(), HookError> {
    fs::write(path, content).map_err(io_err(path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_err(path))?;
    }
    Ok(())
}

/// Adds the sync section to the `post-commit` hook, keeping whatever the
/// hook already runs.
pub fn install(git_dir: &Path) -> Result<Installed, HookError> {
    let hooks = git_dir.join("hooks");
    fs::create_dir_all(&hooks).map_err(io_err(&hooks))?;

    let path = hook_path(git_dir);
    let (content, installed) = match read_hook(&path)? {
        Some(existing) if existing.contains(BEGIN_MARKER) => return Ok(Installed::AlreadyPresent),
        Some(existing) if !existing.is_empty() => {
            let mut content = existing;
            if !content.ends_with('\n') {
                content.push('\n');
            }
            content.push('\n');
            content.push_str(SECTION);
            (content, Installed::Appended)
        }
        _ => (format!("{}\n{}", SHEBANG, SECTION), Installed::Created),
    };

    write_hook(&path, &content)?;
    Ok(installed)
}

/// Takes the sync section back out. A hook left with nothing but a
/// shebang is deleted.
pub fn remove(git_dir: &Path) -> Result<Removed, HookError> {
    let path = hook_path(git_dir);
    let Some(content) = read_hook(&path)? else {
        return Ok(Removed::NoHook);
    };
    if !content.contains(BEGIN_MARKER) {
        return Ok(Removed::NotInstalled);
    }

    let cleaned = strip_section(&content);
    let rest = cleaned.trim();
    if rest.is_empty() || rest == SHEBANG.trim() {
        fs::remove_file(&path).map_err(io_err(&path))?;
        return Ok(Removed::Deleted);
    }

    write_hook(&path, &cleaned)?;
    Ok(Removed::Stripped)
}

fn strip_section(content: &str) -> String {
    let mut inside = false;
    let mut kept = Vec::new();
    for line in content.split('\n') {
        match line.trim() {
            BEGIN_MARKER => inside = true,
            END_MARKER => inside = false,
            _ if !inside => kept.push(line),
            _ => {}
        }
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_find_git_dir_walks_up() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("src/deep")).unwrap();

        let found = find_git_dir(&dir.path().join("src/deep")).unwrap();
        assert_eq!(found, dir.path().join(".git"));

        let worktree = dir.path().join("src/wt");
        fs::create_dir_all(&worktree).unwrap();
        fs::write(worktree.join(".git"), "gitdir: ../../.git/worktrees/wt\n").unwrap();
        assert_eq!(
            find_git_dir(&worktree).unwrap(),
            worktree.join("../../.git/worktrees/wt")
        );
    }

    #[test]
    fn test_find_git_dir_outside_repository() {
        let dir = tempdir().unwrap();
        // tempdirs may live under a git checkout; only check the error shape
        // when nothing above has a .git.
        if dir.path().ancestors().any(|p| p.join(".git").exists()) {
            return;
        }
        assert!(matches!(
            find_git_dir(dir.path()),
            Err(HookError::NoRepository(_))
        ));
    }

    #[test]
    fn test_install_and_remove_fresh_hook() {
        let dir = tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(&git_dir).unwrap();

        assert_eq!(install(&git_dir).unwrap(), Installed::Created);
        let path = hook_path(&git_dir);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#!/bin/sh\n"));
        assert!(content.contains("thicket sync 2>/dev/null &"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        assert_eq!(install(&git_dir).unwrap(), Installed::AlreadyPresent);
        assert_eq!(fs::read_to_string(&path).unwrap(), content);

        assert_eq!(remove(&git_dir).unwrap(), Removed::Deleted);
        assert!(!path.exists());
        assert_eq!(remove(&git_dir).unwrap(), Removed::NoHook);
    }

    #[test]
    fn test_existing_hook_is_preserved() {
        let dir = tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        fs::create_dir_all(git_dir.join("hooks")).unwrap();
        let path = hook_path(&git_dir);
        fs::write(&path, "#!/bin/sh\nmake lint").unwrap();

        assert_eq!(remove(&git_dir).unwrap(), Removed::NotInstalled);
        assert_eq!(install(&git_dir).unwrap(), Installed::Appended);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("#!/bin/sh\nmake lint\n\n# BEGIN thicket hook\n"));

        assert_eq!(remove(&git_dir).unwrap(), Removed::Stripped);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("make lint"));
        assert!(!content.contains("thicket"));
    }
}
