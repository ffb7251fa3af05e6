//! Metric instrument factories for pagefan.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"pagefan"` meter; without a
//! configured provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for pagefan instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("pagefan")
}

/// Counter: jobs offered to the dispatcher.
/// Labels: `result` ("queued" | "full" | "cancelled").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("pagefan.jobs.submitted")
        .with_description("Number of jobs offered to the dispatcher")
        .build()
}

/// Counter: jobs reaching a terminal status.
/// Labels: `status` ("success" | "failure" | "aborted").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("pagefan.jobs.finished")
        .with_description("Number of jobs reaching a terminal status")
        .build()
}

/// Counter: failed job results skipped by a collector.
/// Labels: `collector`.
pub fn results_skipped() -> Counter<u64> {
    meter()
        .u64_counter("pagefan.collector.skipped")
        .with_description("Failed job results excluded from an aggregate")
        .build()
}

/// Counter: pages fetched by the paginator.
/// Labels: `source`, `mode` ("probe" | "fanout" | "sequential").
pub fn pages_fetched() -> Counter<u64> {
    meter()
        .u64_counter("pagefan.pages.fetched")
        .with_description("Number of pages fetched")
        .build()
}

/// Histogram: job execution time in milliseconds.
/// Labels: `kind`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pagefan.job.duration_ms")
        .with_description("Job execution time in milliseconds")
        .with_unit("ms")
        .build()
}
