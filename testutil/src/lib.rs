/// Testing utilities for the sidecar workspace
///
/// Provides:
/// - Random test data generators
/// - Deterministic byte fixtures for cross-node tests

pub mod fixtures;
pub mod generators;

pub use generators::*;
