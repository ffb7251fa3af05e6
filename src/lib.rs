//! # pagefan
//!
//! Concurrent fan-out/fan-in engine for enumerating paginated APIs.
//!
//! Provides a bounded worker pool fed by a job queue, per-operation result
//! collectors, a process-wide cancellation scope, and the pagination protocol
//! that ties them together (probe the first page, fan out the rest, fold the
//! results into one aggregate).

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod paginate;
pub mod telemetry;
