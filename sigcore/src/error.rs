use thiserror::Error;

/// Error kinds shared by the decoders, the sample feeds and the session.
///
/// Decoders return these upward; the session coordinator terminates the
/// capture on anything fatal after emitting `End` if a header went out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The caller passed something unusable (bad option value, wrong buffer
    /// size, trigger stage without matches).
    #[error("invalid argument: {0}")]
    Arg(&'static str),

    /// The input itself is malformed or inconsistent.
    #[error("malformed input: {0}")]
    Data(String),

    /// A buffer would exceed the decoder's allocation limits.
    #[error("allocation limit exceeded")]
    Malloc,

    /// The input is recognised but uses a feature we do not support.
    #[error("not supported: {0}")]
    NotAvailable(&'static str),

    /// An operation was attempted on a session that is not in a state to
    /// accept it, e.g. metadata after `End`.
    #[error("session is not active")]
    DeviceClosed,
}

impl Error {
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
