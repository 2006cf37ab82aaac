//! Transfer pipeline metrics
//!
//! Prometheus-compatible counters and histograms for:
//! - Import prepare and commit outcomes
//! - Export outcomes
//! - Staging session reclamation

use crate::error::Error;
use std::time::Duration;

fn status_of<T>(result: &Result<T, Error>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    }
}

/// Record an import prepare outcome
pub fn record_prepare<T>(result: &Result<T, Error>, duration: Duration) {
    metrics::counter!("ferry_import_prepare_total", "status" => status_of(result)).increment(1);
    metrics::histogram!("ferry_import_prepare_duration_seconds").record(duration.as_secs_f64());
}

/// Record an import commit outcome
pub fn record_commit<T>(result: &Result<T, Error>, duration: Duration) {
    metrics::counter!("ferry_import_commit_total", "status" => status_of(result)).increment(1);
    metrics::histogram!("ferry_import_commit_duration_seconds").record(duration.as_secs_f64());
}

/// Record an export outcome
pub fn record_export<T>(result: &Result<T, Error>, duration: Duration) {
    metrics::counter!("ferry_export_total", "status" => status_of(result)).increment(1);
    metrics::histogram!("ferry_export_duration_seconds").record(duration.as_secs_f64());
}

/// Record a destroyed staging session
pub fn record_session_destroyed(reason: &'static str) {
    metrics::counter!("ferry_staging_sessions_destroyed_total", "reason" => reason).increment(1);
}

/// Record sessions reclaimed by one sweep pass
pub fn record_swept(count: usize) {
    if count > 0 {
        metrics::counter!("ferry_staging_swept_total").increment(count as u64);
    }
}

/// Update the active staging session gauge
pub fn set_active_sessions(count: usize) {
    metrics::gauge!("ferry_staging_active_sessions").set(count as f64);
}
