// JSON body extraction for the REST surface.
//
// `ValidatedJson<T>` turns axum's plain-text JSON rejections into the
// relay's structured VALIDATION_FAILED envelope.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, RelayError};

/// Maximum REST request body in bytes (1 MiB).
pub const MAX_REST_BODY_BYTES: usize = 1024 * 1024;

/// A JSON body extractor that returns a structured `RelayError` on failure.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(rejection_error(&rejection).into_response()),
        }
    }
}

fn rejection_error(rejection: &JsonRejection) -> RelayError {
    let (code, message, kind) = match rejection {
        JsonRejection::JsonDataError(e) => {
            (ErrorCode::ValidationFailed, format!("invalid seed payload: {e}"), "data_error")
        }
        JsonRejection::JsonSyntaxError(e) => {
            (ErrorCode::ValidationFailed, format!("malformed JSON: {e}"), "syntax_error")
        }
        JsonRejection::MissingJsonContentType(_) => (
            ErrorCode::ValidationFailed,
            "expected Content-Type: application/json".to_string(),
            "missing_content_type",
        ),
        JsonRejection::BytesRejection(e) if e.status().as_u16() == 413 => {
            (ErrorCode::PayloadTooLarge, format!("request body error: {e}"), "body_too_large")
        }
        other => {
            (ErrorCode::ValidationFailed, format!("request body error: {other}"), "body_error")
        }
    };
    RelayError::new(code, message).with_details(serde_json::json!({ "kind": kind }))
}
