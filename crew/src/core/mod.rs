//! Deterministic, pure logic shared by the crew stores and the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod conversation;
pub mod decision;
pub mod invariants;
pub mod names;
pub mod selector;
pub mod state_update;
pub mod task;
pub mod types;
