use crate::records::StoreError;
use crate::recognition::FaceSearchError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    /// The request was well-formed but the payload could not be processed
    /// (typically: no embedding could be extracted from the probe image)
    #[error("{0}")]
    Unprocessable(String),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            StoreError::Io(err) => AppError::IO(err),
            StoreError::Corrupt(msg) => AppError::Other(anyhow::anyhow!("store corrupt: {msg}")),
        }
    }
}

impl From<FaceSearchError> for AppError {
    fn from(err: FaceSearchError) -> Self {
        match err {
            FaceSearchError::EmptyImage | FaceSearchError::UnsupportedImageType => {
                AppError::Validation(err.to_string())
            }
            FaceSearchError::ExtractionFailed => AppError::Unprocessable(err.to_string()),
            FaceSearchError::Index(err) => AppError::Other(anyhow::anyhow!(err)),
            FaceSearchError::Store(err) => err.into(),
        }
    }
}
