// Pipeline error taxonomy. Duplicate suppression is a counter, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Durable queue unreachable. Producers fail fast and drop-and-log;
    /// processor ticks skip and retry on the next cycle.
    #[error("sample buffer unavailable: {0}")]
    BufferUnavailable(#[source] sqlx::Error),

    /// Schema/range violation. Rejected at ingestion or skipped by the
    /// processor; counted, logged, never retried.
    #[error("malformed sample: {reason}")]
    MalformedSample { reason: String },
}

impl PipelineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        PipelineError::MalformedSample {
            reason: reason.into(),
        }
    }
}
