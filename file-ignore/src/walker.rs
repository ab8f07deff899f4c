//! Repository traversal with VCS-aware enumeration.
//!
//! Prefers `git ls-files` when the root is a repository so the VCS ignore
//! rules apply, and falls back to a raw directory walk otherwise. Nested
//! repositories discovered during traversal are enumerated through their
//! own tracked-files listing.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use crate::rules::IgnoreRules;

/// File walker for a single search root.
///
/// Follows symlinks to files and directories. Each directory is resolved
/// to its canonical path and recorded in a visited set, so symlink cycles
/// terminate and diamond-shaped symlink layouts yield each file once.
/// Broken symlinks and permission errors are silently skipped.
pub struct FileWalker {
    rules: IgnoreRules,
}

impl FileWalker {
    pub fn new(rules: IgnoreRules) -> Self {
        Self { rules }
    }

    /// Build a walker with pattern rules loaded from `root`.
    pub fn for_root(root: &Path, custom_patterns: &[String]) -> Self {
        Self::new(IgnoreRules::new(root, custom_patterns))
    }

    /// The ignore rules backing this walker.
    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    /// Enumerate indexable files under the root, absolute paths.
    pub fn files(&self) -> Vec<PathBuf> {
        let root = self.rules.root().to_path_buf();
        let mut state = WalkState::default();
        if let Ok(canonical) = root.canonicalize() {
            state.visited_dirs.insert(canonical);
        }
        self.visit_subtree(&root, true, &mut state);
        state.out
    }

    /// Visit a subtree, preferring VCS enumeration when `dir` is a repo
    /// root. `apply_patterns` is false inside nested repositories, whose
    /// own listing replaces the outer pattern rules.
    fn visit_subtree(&self, dir: &Path, apply_patterns: bool, state: &mut WalkState) {
        if is_repo_root(dir) {
            if let Some(listing) = git_ls_files(dir) {
                if listing.is_empty() {
                    // Known to happen on very large repositories.
                    tracing::debug!(dir = %dir.display(), "Empty VCS listing, falling back to raw traversal");
                } else {
                    for path in listing {
                        if self.excluded(&path, apply_patterns) {
                            continue;
                        }
                        // Tracked-but-deleted entries have no file behind them.
                        if path.is_file() {
                            self.emit(path, state);
                        }
                    }
                    self.scan_for_nested_repos(dir, state);
                    return;
                }
            }
        }
        self.visit_raw(dir, apply_patterns, state);
    }

    /// Raw directory walk used outside repositories and as the fallback
    /// for empty VCS listings.
    fn visit_raw(&self, dir: &Path, apply_patterns: bool, state: &mut WalkState) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_hidden_name(&entry.file_name()) {
                continue;
            }
            // Follows symlinks; broken links and unreadable entries drop out here.
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            if metadata.is_file() {
                if !self.excluded(&path, apply_patterns) {
                    self.emit(path, state);
                }
            } else if metadata.is_dir() {
                if apply_patterns && self.rules.is_ignored(&path) {
                    continue;
                }
                if !self.enter_dir(&path, state) {
                    continue;
                }
                if is_repo_root(&path) {
                    self.visit_subtree(&path, false, state);
                } else {
                    self.visit_raw(&path, apply_patterns, state);
                }
            }
        }
    }

    /// Directory-only scan below a VCS-enumerated repo, looking for nested
    /// repositories the listing cannot see into.
    fn scan_for_nested_repos(&self, dir: &Path, state: &mut WalkState) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_hidden_name(&entry.file_name()) {
                continue;
            }
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            if !metadata.is_dir() {
                continue;
            }
            if !self.enter_dir(&path, state) {
                continue;
            }
            if is_repo_root(&path) {
                self.visit_subtree(&path, false, state);
            } else {
                self.scan_for_nested_repos(&path, state);
            }
        }
    }

    /// Record a directory in the visited set; false if already seen or
    /// unresolvable.
    fn enter_dir(&self, dir: &Path, state: &mut WalkState) -> bool {
        match dir.canonicalize() {
            Ok(canonical) => state.visited_dirs.insert(canonical),
            Err(_) => false,
        }
    }

    fn excluded(&self, path: &Path, apply_patterns: bool) -> bool {
        if apply_patterns {
            self.rules.is_ignored(path)
        } else {
            self.rules.has_hidden_segment(path)
        }
    }

    /// Emit a file, deduplicated by canonical path so symlink aliases of
    /// the same file appear once.
    fn emit(&self, path: PathBuf, state: &mut WalkState) {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if state.seen_files.insert(canonical) {
            state.out.push(path);
        }
    }
}

#[derive(Default)]
struct WalkState {
    visited_dirs: HashSet<PathBuf>,
    seen_files: HashSet<PathBuf>,
    out: Vec<PathBuf>,
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn is_repo_root(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Tracked plus untracked-unignored files, absolute paths.
///
/// Returns None when git is unavailable or the command fails, which sends
/// the caller down the raw traversal path.
fn git_ls_files(repo_root: &Path) -> Option<Vec<PathBuf>> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_root)
        .args(["ls-files", "-z", "--cached", "--others", "--exclude-standard"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let mut files = Vec::new();
    for raw in output.stdout.split(|b| *b == 0) {
        if raw.is_empty() {
            continue;
        }
        let rel = String::from_utf8_lossy(raw);
        files.push(repo_root.join(rel.as_ref()));
    }
    Some(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn walker_in(dir: &TempDir) -> FileWalker {
        FileWalker::for_root(dir.path(), &[])
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn relative_sorted(dir: &TempDir, files: &[PathBuf]) -> Vec<String> {
        let mut rel: Vec<String> = files
            .iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        rel.sort();
        rel
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn walks_plain_tree() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, "src/lib.rs", "pub fn lib() {}");
        write(&dir, "README.md", "# readme");

        let files = walker_in(&dir).files();
        assert_eq!(
            relative_sorted(&dir, &files),
            vec!["README.md", "src/lib.rs", "src/main.rs"]
        );
    }

    #[test]
    fn skips_hidden_directories_and_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, ".cache/blob", "x");
        write(&dir, "src/.secret", "x");

        let files = walker_in(&dir).files();
        assert_eq!(relative_sorted(&dir, &files), vec!["src/main.rs"]);
    }

    #[test]
    fn respects_osgrepignore() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".osgrepignore", "vendor/\n");
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, "vendor/lib.rs", "x");

        let files = walker_in(&dir).files();
        assert_eq!(relative_sorted(&dir, &files), vec!["src/main.rs"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_aliases_yield_each_file_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "real/code.rs", "fn a() {}");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias_one")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias_two")).unwrap();

        let files = walker_in(&dir).files();
        assert_eq!(files.len(), 1, "expected one entry, got {files:?}");
    }

    #[cfg(unix)]
    #[test]
    fn self_referential_symlink_terminates() {
        let dir = TempDir::new().unwrap();
        write(&dir, "loop/code.rs", "fn a() {}");
        std::os::unix::fs::symlink(dir.path().join("loop"), dir.path().join("loop/again")).unwrap();

        let files = walker_in(&dir).files();
        assert_eq!(files.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn broken_symlinks_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/main.rs", "fn main() {}");
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling")).unwrap();

        let files = walker_in(&dir).files();
        assert_eq!(relative_sorted(&dir, &files), vec!["src/main.rs"]);
    }

    #[test]
    fn vcs_listing_preferred_when_repo() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, "build/out.bin", "x");
        write(&dir, ".gitignore", "build/\n");
        assert!(
            Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .arg("init")
                .arg("-q")
                .status()
                .unwrap()
                .success()
        );

        let files = walker_in(&dir).files();
        // .gitignore'd build output is excluded by the VCS listing.
        assert_eq!(relative_sorted(&dir, &files), vec!["src/main.rs"]);
    }

    #[test]
    fn nested_repo_uses_its_own_listing() {
        if !git_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        write(&dir, "app.rs", "fn app() {}");
        write(&dir, "third_party/dep/src/dep.rs", "fn dep() {}");
        write(&dir, "third_party/dep/.gitignore", "secret.txt\n");
        write(&dir, "third_party/dep/secret.txt", "x");
        assert!(
            Command::new("git")
                .arg("-C")
                .arg(dir.path().join("third_party/dep"))
                .arg("init")
                .arg("-q")
                .status()
                .unwrap()
                .success()
        );

        let files = relative_sorted(&dir, &walker_in(&dir).files());
        assert!(files.contains(&"app.rs".to_string()));
        assert!(files.contains(&"third_party/dep/src/dep.rs".to_string()));
        assert!(!files.contains(&"third_party/dep/secret.txt".to_string()));
    }
}
