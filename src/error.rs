use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failure taxonomy of the reservation core. Every variant rolls the
/// enclosing transaction back before it reaches the caller; no operation
/// leaves partial effects behind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing, inactive, or not owned by the requester. Ownership failures
    /// report NotFound rather than Forbidden so the response does not leak
    /// whether another user's reservation exists.
    #[error("{0}")]
    NotFound(&'static str),

    /// Requested seats are taken at lock time, or do not belong to the
    /// showtime's theater. Always all-or-nothing.
    #[error("one or more seats are not available or do not exist")]
    SeatUnavailable,

    /// The reservation is in a state that forbids the action.
    #[error("{0}")]
    InvalidState(&'static str),

    /// Malformed input, rejected before any database work.
    #[error("{0}")]
    InvalidRequest(&'static str),

    /// Booking-reference collisions exhausted the retry budget.
    #[error("could not allocate a unique booking reference")]
    ReferenceExhausted,

    #[error("internal database error")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::SeatUnavailable => StatusCode::CONFLICT,
            Error::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::ReferenceExhausted | Error::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {:?}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
