//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`;
//! without one configured every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("testforge-rs")
}

/// Counter: projects enqueued for generation.
/// Labels: `kind` ("new" | "retry").
pub fn projects_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("testforge.queue.enqueued")
        .with_description("Projects enqueued for generation")
        .build()
}

/// Counter: finished generation attempts.
/// Labels: `outcome` ("success" | "health_check_failed" | "step_failed" | "timed_out").
pub fn generation_attempts() -> Counter<u64> {
    meter()
        .u64_counter("testforge.generation.attempts")
        .with_description("Generation attempts by outcome")
        .build()
}

/// Counter: projects that exhausted their retries.
pub fn generation_exhausted() -> Counter<u64> {
    meter()
        .u64_counter("testforge.generation.exhausted")
        .with_description("Projects marked FAILED after the last attempt")
        .build()
}

/// Counter: cleanup cascade results.
/// Labels: `result` ("nothing" | "restored" | "emergency_wiped" | "emergency_failed").
pub fn cleanups() -> Counter<u64> {
    meter()
        .u64_counter("testforge.cleanup.runs")
        .with_description("Cleanup cascade runs by result")
        .build()
}

/// Counter: delete scans that found files held by another process.
pub fn blocked_delete_retries() -> Counter<u64> {
    meter()
        .u64_counter("testforge.workspace.blocked_scans")
        .with_description("Delete scans that found blocked files")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("testforge.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
