use memtrack_core::TrackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("tracker refused the allocation for {what}")]
    Refused { what: &'static str },
    #[error("audit failed after step {step}: {source}")]
    Audit {
        step: usize,
        #[source]
        source: TrackError,
    },
    #[error("tracker diverged from the model at step {step} (occupied {occupied}, outstanding {outstanding})")]
    Diverged {
        step: usize,
        occupied: usize,
        outstanding: usize,
    },
    #[error("{count} block(s) still outstanding in the backing allocator")]
    Leaked { count: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
