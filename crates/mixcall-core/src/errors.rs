use thiserror::Error;

/// Failure classes for a conference session. Failures are reported to the
/// caller, never retried; only `Tag` is non-fatal at the session level.
#[derive(Debug, Error)]
pub enum MixcallError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("decoding error: {0}")]
    Decoding(String),
    #[error("conference operation failed: {0}")]
    Sdk(String),
    #[error("common view tag failed: {0}")]
    Tag(String),
    #[error("{op} requires state {expected}, session is {actual}")]
    State {
        op: &'static str,
        expected: &'static str,
        actual: String,
    },
}
