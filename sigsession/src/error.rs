use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("decode error: {0}")]
    Decode(#[from] sigcore::Error),

    #[error("error reading capture source: {0}")]
    Io(#[from] std::io::Error),
}
