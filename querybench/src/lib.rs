//! A benchmark for running many queries over a single message channel.
//!
//! `querybench run` dispatches a batch of generated `SELECT` queries to a worker without waiting
//! for any reply, then collects the replies in whatever order they arrive, matching each to its
//! query by correlation id. `querybench worker` serves a loopback worker to benchmark against.
//!
//! The dispatching itself lives in [`querybench_protocol`]; this crate adds configuration, query
//! generation, reporting and the worker.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod benchmark;
pub mod cli;
pub mod config;
pub mod observability;
pub mod remote;
pub mod worker;
pub mod workload;
