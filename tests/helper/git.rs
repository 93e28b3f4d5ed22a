//! Local git repository test utilities

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(["-c", "user.name=monler", "-c", "user.email=monler@example.com"])
        .args(["-c", "init.defaultBranch=main", "-c", "tag.gpgSign=false"])
        .args(["-c", "commit.gpgSign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Creates a work tree with the given files committed once per tag, each
/// commit tagged with an annotated tag.
pub fn create_test_git_repo(files: &[(&str, &str)], tags: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "--quiet"]);
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    git(dir.path(), &["add", "--all"]);
    git(dir.path(), &["commit", "--quiet", "--allow-empty", "-m", "initial"]);
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            let message = format!("release {tag}");
            git(dir.path(), &["commit", "--quiet", "--allow-empty", "-m", &message]);
        }
        git(dir.path(), &["tag", "-a", tag, "-m", tag]);
    }
    dir
}

/// Creates a bare repository without any commits.
pub fn create_empty_git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "--quiet", "--bare"]);
    dir
}

/// `file://` remote for a local repository.
pub fn file_remote(dir: &TempDir) -> String {
    format!("file://{}", dir.path().display())
}
