// Rust guideline compliant 2026-08-22

//! Adapters (secondary ports) for the playledger binaries.
//!
//! Each sub-module implements one or more hexagonal port traits defined in
//! the `domain` crate. Adapters are intentionally isolated from component
//! logic; swapping one never touches the component crates.

pub mod eval_queue;
pub mod memory_store;
