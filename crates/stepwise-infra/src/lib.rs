//! Infrastructure layer for Stepwise.
//!
//! Contains implementations of the checkpoint store port defined in
//! `stepwise-core` (a thread-safe in-memory store and a JSON-lines file
//! store) and the engine configuration loader.

pub mod checkpoint;
pub mod config;
