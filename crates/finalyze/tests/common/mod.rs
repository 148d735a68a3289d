//! Shared test utilities for finalyze integration tests.

pub mod harness;

pub use harness::{dispatcher_settings, processor_settings, CountingAnalyzer, TestHarness};
