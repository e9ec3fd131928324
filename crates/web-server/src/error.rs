use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// The web server's own error type. §6 only specifies literal bodies for
/// the webhook (`200`/`400`/`500`) and `/health` (`200`/`503`); everything
/// else folds into the generic `500 {status:error,message}` shape.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] database::DbError),

    #[error("executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Executor(e) => {
                tracing::error!(error = ?e, "executor error handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}
