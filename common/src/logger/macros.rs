use tracing::Span;

use super::TraceId;

/// Root span for one execution of a periodic job.
pub fn tick_span(job: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!("tick", job = job, trace_id = %trace_id.as_str())
}

/// Span for a one-shot job run (inherits trace_id from an enclosing tick).
pub fn job_span(name: &'static str) -> Span {
    tracing::info_span!("job", name = name)
}
