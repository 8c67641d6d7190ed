use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use causerie_shared::{ChatError, Feedback};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "1";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Chat(e) => {
                let status = match e.feedback() {
                    Feedback::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    Feedback::Missing => StatusCode::NOT_FOUND,
                    Feedback::Retry => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.code())
            }
        };

        let body = axum::Json(serde_json::json!({
            "error": self.to_string(),
            "code": code,
        }));

        if status == StatusCode::SERVICE_UNAVAILABLE {
            return (status, [(header::RETRY_AFTER, RETRY_AFTER_SECS)], body).into_response();
        }
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_feedback_class() {
        let cases = [
            (ChatError::InvalidMembership("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ChatError::InvalidContent("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ChatError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ChatError::TransientUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn transient_failures_carry_retry_after() {
        let response =
            ApiError::from(ChatError::TransientUnavailable("db".into())).into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(|v| v.as_bytes()),
            Some(RETRY_AFTER_SECS.as_bytes())
        );
        let response = ApiError::BadRequest("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
