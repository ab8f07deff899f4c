//! Ignore rules and repository traversal for osgrep indexing.
//!
//! Decides which files are indexable: hidden segments are always excluded,
//! `.osgrepignore` patterns (gitignore syntax) apply next, and VCS
//! repositories are enumerated through their own tracked-files listing.

pub mod rules;
pub mod walker;

pub use rules::IgnoreRules;
pub use rules::OSGREP_IGNORE_FILE;
pub use walker::FileWalker;
