//! Workflow engine core: definitions, sequential execution, and durable checkpointing.
//!
//! This module contains the "brain" of the workflow engine:
//! - `step` -- Step execution contract, object-safe wrapper, closure adapter
//! - `definition` -- Workflow/step definitions, builder, validation
//! - `context` -- Per-execution shared state and snapshots
//! - `retry` -- Retry budget and backoff delays
//! - `checkpoint` -- Checkpoint manager over the store port
//! - `status` -- Workflow status registry
//! - `executor` -- Sequential executor with retry, cancellation, and checkpoints

pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod executor;
pub mod retry;
pub mod status;
pub mod step;
