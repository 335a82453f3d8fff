#![forbid(unsafe_code)]
//! E2Walk public API facade.
//!
//! Re-exports `e2w-core` through a stable external interface. The CLI and
//! the harness depend on this crate.

pub use e2w_core::*;
