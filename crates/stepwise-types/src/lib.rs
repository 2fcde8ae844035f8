//! Shared domain types for Stepwise.
//!
//! This crate contains the serializable types exchanged between the engine,
//! its checkpoint stores, and callers: workflow identifiers, step results,
//! checkpoints, status records, execution results, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod workflow;
