//! Shared test utilities for reportflow integration tests.
//!
//! This module provides:
//! - `StubModel`, a scripted language model that records concurrency
//! - `TestHarness` for isolated runs with temp documents and an in-memory audit sink
//! - Builders for plans and stage replies

#![allow(unused_imports)]

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{StubModel, TestHarness};
