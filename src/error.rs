use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::borrow::Cow;

/// Errors escaping a request handler. Business-rule failures carry an HTTP
/// status and a human-readable message; everything else is masked as a 500
/// with the detail kept server-side.
pub enum AppError {
    Internal(anyhow::Error),
    Status(StatusCode, Cow<'static, str>),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            status: u16,
            message: Cow<'static, str>,
        }

        let (code, message) = match self {
            AppError::Internal(err) => {
                tracing::error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Cow::from("Internal Server Error"),
                )
            }
            AppError::Status(code, message) => (code, message),
        };

        (
            code,
            Json(ErrorBody {
                status: code.as_u16(),
                message,
            }),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::Internal(e.into())
    }
}

impl AppError {
    pub fn status(code: StatusCode, message: impl Into<Cow<'static, str>>) -> AppError {
        AppError::Status(code, message.into())
    }
}
