//! # xfi_engine
//!
//! Rule evaluation engine and fact runtime for x-fidelity.
//!
//! This crate provides:
//! - The per-file `FileAlmanac` with memoized, on-demand fact evaluation
//! - The shared fact metrics store
//! - The builtin comparison operators
//! - The exemption matcher
//! - The `Engine` that attaches facts, operators, and (possibly rewritten)
//!   rules and evaluates condition trees per file
//!
//! Evaluation of a single file is strictly sequential and left-to-right so
//! short-circuiting is deterministic; the `Engine` itself is immutable
//! after build and safe to share across worker threads.

mod almanac;
mod engine;
mod exemptions;
mod metrics;
mod operators;

pub use almanac::{FileAlmanac, GlobalFactCache, canonical_params};
pub use engine::{Engine, EngineBuilder, RuleOutcome};
pub use exemptions::is_exempt;
pub use metrics::FactMetricsStore;
pub use operators::builtin_operators;
