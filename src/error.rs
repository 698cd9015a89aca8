use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid YAML in tile server configuration.")]
    Config(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identifier {0:?} in layer configuration.")]
    InvalidIdentifier(String),

    #[error("Layer {0:?} is configured more than once.")]
    DuplicateLayer(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Invalid tile coordinate: {0}")]
    InvalidTileCoordinate(String),

    #[error("Unknown layer {0:?}.")]
    UnknownLayer(String),

    #[error("Missing tenant context.")]
    Unauthorized,

    #[error("Geometry store unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Geometry store did not answer within {0:?}.")]
    StorageTimeout(Duration),

    #[error("Unable to encode feature: {0}")]
    EncodingFailure(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidTileCoordinate(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::UnknownLayer(_) => StatusCode::NOT_FOUND,
            Error::StorageUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::StorageTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            log::error!("{self}");
        } else {
            log::debug!("rejecting request: {self}");
        }

        (status, self.to_string()).into_response()
    }
}
