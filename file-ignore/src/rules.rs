//! Ignore rules: hidden segments, custom patterns, `.osgrepignore`.
//!
//! Precedence (first match wins): hidden path segments, then custom
//! patterns and `.osgrepignore` entries interpreted with gitignore syntax.
//! VCS rules are applied separately by the walker through tracked-files
//! enumeration.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;

/// Name of the per-repository ignore file at the search root.
pub const OSGREP_IGNORE_FILE: &str = ".osgrepignore";

/// Pattern-based ignore rules rooted at a search root.
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Build rules for `root`, combining `custom_patterns` with
    /// `<root>/.osgrepignore` if present.
    ///
    /// Invalid patterns are skipped with a warning rather than failing
    /// construction.
    pub fn new(root: &Path, custom_patterns: &[String]) -> Self {
        let root = normalize(root);
        let mut builder = GitignoreBuilder::new(&root);

        let ignore_file = root.join(OSGREP_IGNORE_FILE);
        if ignore_file.is_file()
            && let Some(e) = builder.add(&ignore_file)
        {
            tracing::warn!(file = %ignore_file.display(), error = %e, "Failed to parse ignore file");
        }

        for pattern in custom_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid ignore pattern");
            }
        }

        let matcher = builder.build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignore matcher unavailable; pattern rules disabled");
            Gitignore::empty()
        });

        Self { root, matcher }
    }

    /// The normalized search root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` is excluded from indexing.
    ///
    /// The root itself is never ignored. Paths resolving outside the root
    /// (via `..`) are always ignored. Otherwise hidden segments win over
    /// pattern rules.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        };

        if absolute == self.root {
            return false;
        }

        let Ok(rel) = absolute.strip_prefix(&self.root) else {
            return true;
        };

        if has_hidden_component(rel) {
            return true;
        }

        let is_dir = absolute.is_dir();
        self.matcher
            .matched_path_or_any_parents(rel, is_dir)
            .is_ignore()
    }

    /// Hidden-segment check only, relative to the root.
    ///
    /// Used by the walker inside nested repositories, where the nested
    /// listing replaces pattern rules but hidden segments still apply.
    pub fn has_hidden_segment(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.root.join(path))
        };
        match absolute.strip_prefix(&self.root) {
            Ok(rel) => has_hidden_component(rel),
            Err(_) => true,
        }
    }
}

/// Lexically normalize a path: fold `.` away and resolve `..` against the
/// preceding segment. Does not touch the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn has_hidden_component(rel: &Path) -> bool {
    rel.components().any(|c| {
        matches!(
            c,
            Component::Normal(name) if name.to_string_lossy().starts_with('.')
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rules_in(dir: &TempDir, patterns: &[&str]) -> IgnoreRules {
        let patterns: Vec<String> = patterns.iter().copied().map(String::from).collect();
        IgnoreRules::new(dir.path(), &patterns)
    }

    #[test]
    fn hidden_segments_are_ignored() {
        let dir = TempDir::new().unwrap();
        let rules = rules_in(&dir, &[]);

        assert!(rules.is_ignored(&dir.path().join(".git/config")));
        assert!(rules.is_ignored(&dir.path().join("src/.hidden/file.rs")));
        assert!(rules.is_ignored(&dir.path().join(".env")));
        assert!(!rules.is_ignored(&dir.path().join("src/main.rs")));
    }

    #[test]
    fn root_is_never_ignored() {
        let dir = TempDir::new().unwrap();
        let rules = rules_in(&dir, &[]);

        assert!(!rules.is_ignored(dir.path()));
        assert!(!rules.is_ignored(&dir.path().join(".")));
    }

    #[test]
    fn paths_escaping_the_root_are_ignored() {
        let dir = TempDir::new().unwrap();
        let rules = rules_in(&dir, &[]);

        assert!(rules.is_ignored(&dir.path().join("..")));
        assert!(rules.is_ignored(&dir.path().join("../sibling/file.rs")));
        assert!(rules.is_ignored(&dir.path().join("src/../../outside.rs")));
    }

    #[test]
    fn custom_patterns_use_gitignore_syntax() {
        let dir = TempDir::new().unwrap();
        let rules = rules_in(&dir, &["*.log", "target/"]);

        assert!(rules.is_ignored(&dir.path().join("debug.log")));
        assert!(rules.is_ignored(&dir.path().join("deep/nested/trace.log")));
        assert!(!rules.is_ignored(&dir.path().join("src/lib.rs")));
    }

    #[test]
    fn osgrepignore_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(OSGREP_IGNORE_FILE), "generated/\n*.min.js\n").unwrap();
        let rules = rules_in(&dir, &[]);

        assert!(rules.is_ignored(&dir.path().join("generated/out.rs")));
        assert!(rules.is_ignored(&dir.path().join("web/app.min.js")));
        assert!(!rules.is_ignored(&dir.path().join("web/app.js")));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let dir = TempDir::new().unwrap();
        let rules = rules_in(&dir, &["a/**b//[", "*.log"]);

        // The valid pattern still applies.
        assert!(rules.is_ignored(&dir.path().join("x.log")));
    }

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
        assert_eq!(normalize(Path::new("/a/..")), PathBuf::from("/"));
    }
}
