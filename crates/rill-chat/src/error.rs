//! Error types for rill-chat

use thiserror::Error;

/// Result type alias using rill-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the controller and history sync. The precondition variants
/// are rejected before any network call and never mutate the transcript.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire layer
    #[error(transparent)]
    Api(#[from] rill_api::Error),

    /// A stream session is already active for this conversation
    #[error("a stream session is already active")]
    Busy,

    /// No authenticated session context
    #[error("not authenticated")]
    NotAuthenticated,

    /// The known remaining quota is zero or less
    #[error("no remaining quota")]
    QuotaExhausted,

    /// Neither text nor attachments are present
    #[error("nothing to send")]
    EmptyDraft,

    /// Editing is only permitted on the most recent user turn
    #[error("only the most recent user turn can be edited")]
    NotEditable,
}
