use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracepay_sync_sdk::{EntityId, OperationId, StoreError};

/// Boxed error returned by a cache fetch function.
pub type FetchError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Classified failure of a toggle transition, ready for display.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToggleError {
    #[error("Sign in required: {0}")]
    Unauthorized(#[source] StoreError),

    #[error("Update failed: {0}")]
    Failed(#[source] StoreError),

    #[error("Update timed out after {}", human_duration(.after))]
    TimedOut { after: Duration },

    #[error("A change to '{id}' is already in progress ({operation_id})")]
    AlreadyPending {
        id: EntityId,
        operation_id: OperationId,
    },

    #[error("Unknown entity '{id}'")]
    UnknownEntity { id: EntityId },

    #[error("No reverse handle recorded for '{id}'")]
    MissingReverseHandle { id: EntityId },
}

impl ToggleError {
    /// Text shown to the user when the control snaps back.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "Please sign in to continue.",
            Self::Failed(_) | Self::TimedOut { .. } => "Update failed. Please try again.",
            Self::AlreadyPending { .. } => "Please wait for the previous change to finish.",
            Self::UnknownEntity { .. } => "This item is no longer available.",
            Self::MissingReverseHandle { .. } => {
                "This action cannot be undone from this device. Refresh and try again."
            }
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<StoreError> for ToggleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthorized { .. } => Self::Unauthorized(e),
            StoreError::Unavailable { .. }
            | StoreError::Validation { .. }
            | StoreError::Codec { .. } => Self::Failed(e),
        }
    }
}

fn human_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

/// Failure of a read-through cache load.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("fetch for '{key}' failed: {source}")]
    FetchFailed {
        key: String,
        #[source]
        source: FetchError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_store_errors_get_a_distinct_message() {
        let unauthorized = ToggleError::from(StoreError::unauthorized("token expired"));
        let unavailable = ToggleError::from(StoreError::unavailable("connection refused"));

        assert!(unauthorized.is_unauthorized());
        assert_eq!(unauthorized.user_message(), "Please sign in to continue.");
        assert_eq!(unavailable.user_message(), "Update failed. Please try again.");
        assert_ne!(unauthorized.user_message(), unavailable.user_message());
    }

    #[test]
    fn validation_failures_fold_into_generic_failure() {
        let err = ToggleError::from(StoreError::validation("unknown subscription"));
        assert!(matches!(err, ToggleError::Failed(StoreError::Validation { .. })));
    }

    #[test]
    fn timeout_reads_like_a_failed_update() {
        let err = ToggleError::TimedOut {
            after: Duration::from_secs(15),
        };
        assert_eq!(err.user_message(), "Update failed. Please try again.");
    }
}
