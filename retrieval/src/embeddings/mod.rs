//! Embedding-side helpers: the bounded encoding cache.

pub mod vector_cache;

pub use vector_cache::VectorCache;
