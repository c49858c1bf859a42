use reqwest::StatusCode;

/// Metadata request error.
///
/// Transport failures and 503 are retried inside the client and only show
/// up in logs; what surfaces here is a definitive server answer or a body
/// that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata server returned {status}")]
    Status { status: StatusCode },

    #[error("decode: {0}")]
    Decode(String),
}

impl MetadataError {
    /// True for a plain not-found answer. Some lookups treat this as an
    /// empty result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Status {
                status: StatusCode::NOT_FOUND
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
