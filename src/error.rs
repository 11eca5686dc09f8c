use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("access prohibited")]
    AccessProhibited,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration unavailable: {0}")]
    ConfigurationUnavailable(String),
    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized | AppError::AccessProhibited => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigurationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_is_distinct_from_missing_record() {
        assert_eq!(AppError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_ne!(AppError::Unauthorized.status(), AppError::NotFound.status());
    }

    #[test]
    fn missing_grant_reads_differently_from_missing_login() {
        assert_eq!(AppError::AccessProhibited.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccessProhibited.to_string(), "access prohibited");
        assert_ne!(AppError::AccessProhibited.to_string(), AppError::Unauthorized.to_string());
    }

    #[test]
    fn unavailable_configuration_is_a_server_side_rejection() {
        let err = AppError::ConfigurationUnavailable("group lookup failed".into());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "configuration unavailable: group lookup failed");
    }
}
