//! Prometheus counters/histograms for the engine's five top-level
//! operations: module-level `lazy_static!` registrations of
//! `IntCounterVec`/`HistogramVec`, labeled by `operation` and, where
//! useful, `granularity`. This is ambient observability, independent
//! of any benchmark-harness binary.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

lazy_static! {
    /// Count of invocations of each top-level engine operation
    /// (`append_price_updates`, `append_cashflows`, `refresh`,
    /// `query_user_product_timeline`, `query_user_timeline`),
    /// labeled by outcome (`ok`/`error`).
    pub static ref ENGINE_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "portfolio_timeline_engine_operations_total",
        "Number of engine operation invocations by operation and outcome",
        &["operation", "outcome"]
    )
    .unwrap();

    /// Wall-clock duration of each top-level engine operation.
    pub static ref ENGINE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "portfolio_timeline_engine_operation_duration_seconds",
        "Engine operation duration in seconds",
        &["operation"]
    )
    .unwrap();

    /// Rows invalidated per cache layer on an out-of-order
    /// `append_cashflows`.
    pub static ref CACHE_ROWS_INVALIDATED: IntCounterVec = register_int_counter_vec!(
        "portfolio_timeline_engine_cache_rows_invalidated_total",
        "Cache rows deleted by invalidation, by cache layer",
        &["layer"]
    )
    .unwrap();

    /// Rows written per cache layer during `refresh`/`append_cashflows`
    /// re-materialization.
    pub static ref CACHE_ROWS_UPSERTED: IntCounterVec = register_int_counter_vec!(
        "portfolio_timeline_engine_cache_rows_upserted_total",
        "Cache rows upserted, by cache layer and granularity",
        &["layer", "granularity"]
    )
    .unwrap();

    /// Rows deleted by retention GC.
    pub static ref RETENTION_ROWS_DELETED: IntCounterVec = register_int_counter_vec!(
        "portfolio_timeline_engine_retention_rows_deleted_total",
        "Cache rows deleted by retention GC, by cache layer and granularity",
        &["layer", "granularity"]
    )
    .unwrap();
}

/// RAII timer that records into `ENGINE_OPERATION_DURATION_SECONDS`
/// and `ENGINE_OPERATIONS` on drop: wraps a processing step with a
/// start time and records on completion regardless of the exit path.
pub struct OperationTimer {
    operation: &'static str,
    start: std::time::Instant,
    outcome: &'static str,
}

impl OperationTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: std::time::Instant::now(),
            outcome: "ok",
        }
    }

    pub fn mark_error(&mut self) {
        self.outcome = "error";
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        ENGINE_OPERATION_DURATION_SECONDS
            .with_label_values(&[self.operation])
            .observe(self.start.elapsed().as_secs_f64());
        ENGINE_OPERATIONS
            .with_label_values(&[self.operation, self.outcome])
            .inc();
    }
}
