//! Configuration for TreeSync
//!
//! CLI arguments, the optional JSON option file, and the resolved
//! `SyncOptions` consumed by the engine.

mod settings;

pub use settings::*;
