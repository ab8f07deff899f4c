//! Incremental indexing: change detection and the index pipeline.

pub mod change_detector;
pub mod indexer;

pub use change_detector::ChangeSet;
pub use change_detector::detect_changes;
pub use indexer::IndexStats;
pub use indexer::Indexer;
