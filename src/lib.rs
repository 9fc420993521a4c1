//! Journal memos library
//!
//! This library reads, appends, edits and deletes short timestamped memos
//! stored as fenced `memos` blocks inside daily markdown notes, and
//! aggregates them into a recent stream and a per-day activity heatmap.

pub mod date;
pub mod memo;

mod cache;
mod cli;
mod config;
mod document;
mod draft;
mod errors;
mod helper;
mod resolver;
mod service;
mod storage;
mod types;

// Re-export key components
pub use cache::*;
pub use cli::*;
pub use config::*;
pub use document::*;
pub use draft::*;
pub use errors::*;
pub use helper::*;
pub use resolver::*;
pub use service::*;
pub use storage::*;
pub use types::*;
