//! Test utilities for querybench.
//!
//! See the modules for all available utilities.

pub mod tracing;
pub mod worker;
