//! Workflow engine and port definitions for Stepwise.
//!
//! This crate defines the checkpoint store "port" that the infrastructure
//! layer implements, plus the engine that drives a workflow's steps through
//! retry, state merging, and checkpointing. It depends only on
//! `stepwise-types` -- never on `stepwise-infra` or any storage crate.

pub mod repository;
pub mod workflow;
