//! Shared test utilities for installer integration tests.
//!
//! This module provides:
//! - `TestHarness` with in-memory hosts and a ledger in a temp directory
//! - Builders for registrations and installer configs

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
