use thiserror::Error;

use crate::document::ResourceId;

/// Errors raised by the transform engine.
///
/// Every variant is detected before a document is touched, so a failed
/// apply leaves content, version and history exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    #[error("document {0} not found")]
    DocumentNotFound(ResourceId),

    #[error("base version {base} is ahead of document version {current}")]
    FutureBaseVersion { base: u64, current: u64 },

    #[error("base version {base} predates retained history (oldest retained base is {oldest})")]
    HistoryEvicted { base: u64, oldest: u64 },
}
