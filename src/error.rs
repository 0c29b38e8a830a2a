use axum::http::StatusCode;
use thiserror::Error;

/// Error kinds of the telemetry core.
///
/// `MalformedPayload`, `LimitTooLarge` and `StoreUnavailable` propagate to the
/// caller; the rest are absorbed at the point of failure (counter + log line)
/// and never escape a batch. A write without a TTL is not represented here at
/// all: it is a programmer error and panics inside the store engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("malformed id {0:?}: byte length must be 8 (span) or 16 (trace)")]
    MalformedId(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("metric name {0:?} rejected by cardinality ceiling")]
    CardinalityRejected(String),

    #[error("no peer resolved for span {0:?}")]
    UnresolvedPeer(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("limit {got} exceeds maximum {max}")]
    LimitTooLarge { got: u64, max: u64 },
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::MalformedPayload(_) | CoreError::MalformedId(_) => StatusCode::BAD_REQUEST,
            CoreError::LimitTooLarge { .. } => StatusCode::BAD_REQUEST,
            CoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::CardinalityRejected(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::CorruptRecord(_) | CoreError::UnresolvedPeer(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Handlers return `(StatusCode, String)` tuples; this keeps the conversion in
/// one place.
impl From<CoreError> for (StatusCode, String) {
    fn from(e: CoreError) -> Self {
        (e.status(), e.to_string())
    }
}
