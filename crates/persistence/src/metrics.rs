//! Database metrics collection.
//!
//! Metrics go through the `metrics` facade; they are dropped unless the host
//! process installs a recorder.

use metrics::{counter, histogram};
use std::time::Instant;

/// Record database query duration.
pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Record a failed query, labelled by the store error kind.
pub fn record_query_error(query_name: &str, kind: &'static str) {
    counter!(
        "database_query_errors_total",
        "query" => query_name.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Times a database operation and records it on [`QueryTimer::record`].
///
/// ```ignore
/// let timer = QueryTimer::new("invitation_codes.get_by_code");
/// let result = sqlx::query_as::<_, InvitationCodeEntity>(...).fetch_optional(&pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn query_name(&self) -> &'static str {
        self.query_name
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_query_duration(self.query_name, duration);
    }
}
