//! Query-side encoding.

pub mod encoder;

pub use encoder::QueryEncoder;
