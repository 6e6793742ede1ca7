//! Core modules for the audit-and-anchor pipeline.
//!
//! Pure domain logic (classification, scoring, certification, sequencing) and the shared
//! primitives (errors, config, local state, tracing) live here. Anything that talks to
//! the outside world sits behind a trait in `plugins`.

pub mod certify;
pub mod config;
pub mod consensus;
pub mod db;
pub mod error;
pub mod json_extract;
pub mod nonce;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod schemas;
pub mod silo;
pub mod specdoc;
pub mod store;
pub mod time;
pub mod trace;
pub mod tui;
