use shared::uid::{ThingUID, UidError};
use thiserror::Error;

/// Errors returned to callers of inbox operations.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("no discovery result for thing '{0}' in inbox")]
    NotFound(ThingUID),

    #[error("new thing id '{0}' must be a single segment")]
    InvalidId(String),

    #[error(transparent)]
    InvalidUid(#[from] UidError),

    #[error("thing registry rejected '{uid}': {reason}")]
    Registry { uid: ThingUID, reason: String },
}
