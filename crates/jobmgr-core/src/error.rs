//! Error types for the job dispatch system

use core::fmt;

/// Result type for dispatch operations
pub type JobResult<T> = Result<T, JobError>;

/// Errors reported across the dispatch boundary
///
/// `AddJob` and the queue/delegator paths report configuration and
/// resource problems through this taxonomy; none of them are retried by
/// the core itself. Retry policy belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// Backend has not been initialized (or was already shut down)
    NotInitialized,

    /// Backend was already initialized
    AlreadyInitialized,

    /// Job handle does not name a registered job
    InvalidJobHandle,

    /// Parameter blob exceeds the fixed packet capacity
    JobTooLarge,

    /// Malformed packet or queue configuration
    /// (e.g. a dispatch bound to both a sync state and a queue)
    SetupViolation,

    /// Worker pool stayed saturated past the bounded retry budget
    EnqueueTimeout,

    /// Wait deadline expired; the job itself is still running
    Timeout,

    /// Wait-primitive pool is exhausted
    NoSemaphoreAvailable,

    /// Failed to spawn a worker thread
    SpawnFailed,

    /// Unclassified failure
    Unknown,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NotInitialized => write!(f, "backend not initialized"),
            JobError::AlreadyInitialized => write!(f, "backend already initialized"),
            JobError::InvalidJobHandle => write!(f, "invalid job handle"),
            JobError::JobTooLarge => write!(f, "job parameters exceed packet capacity"),
            JobError::SetupViolation => write!(f, "malformed packet or queue setup"),
            JobError::EnqueueTimeout => write!(f, "worker queues saturated past retry budget"),
            JobError::Timeout => write!(f, "wait timed out"),
            JobError::NoSemaphoreAvailable => write!(f, "semaphore pool exhausted"),
            JobError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            JobError::Unknown => write!(f, "unknown error"),
        }
    }
}

impl std::error::Error for JobError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", JobError::NotInitialized), "backend not initialized");
        assert_eq!(format!("{}", JobError::JobTooLarge), "job parameters exceed packet capacity");
    }

    #[test]
    fn test_error_is_copy() {
        let e = JobError::SetupViolation;
        let e2 = e;
        assert_eq!(e, e2);
    }
}
