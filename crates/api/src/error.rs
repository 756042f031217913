//! HTTP error mapping for billing operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shelfshare_billing::BillingError;

/// Wrapper that turns a [`BillingError`] into an HTTP response.
///
/// The status code is derived from the error's wire code so that
/// callers see consistent semantics regardless of which operation
/// failed. Internal errors are logged and redacted.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "unauthenticated" => StatusCode::UNAUTHORIZED,
        "permission-denied" => StatusCode::FORBIDDEN,
        "invalid-argument" => StatusCode::BAD_REQUEST,
        "failed-precondition" => StatusCode::CONFLICT,
        "not-found" => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for_code(code);

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error serving billing request");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(status_for_code("unauthenticated"), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for_code("permission-denied"), StatusCode::FORBIDDEN);
        assert_eq!(status_for_code("invalid-argument"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code("failed-precondition"), StatusCode::CONFLICT);
        assert_eq!(status_for_code("not-found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code("internal"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn scheduled_downgrade_conflict_maps_to_409() {
        let err = ApiError(BillingError::FailedPrecondition(
            "a plan change is already scheduled".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_message_is_redacted() {
        let err = ApiError(BillingError::Gateway(
            "declined by processor: card expired".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
