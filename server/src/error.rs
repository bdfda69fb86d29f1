use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scanner::types::{ErrorMessage, ErrorMessages};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    AlreadyExists { message: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server runtime error: {message}")]
    Runtime { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::AlreadyExists { .. } | ServerError::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ErrorMessages {
            errors: vec![ErrorMessage {
                msg: self.to_string(),
            }],
        };
        (self.status(), Json(body)).into_response()
    }
}
