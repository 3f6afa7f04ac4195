use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{auth::AuthError, config::ConfigError, gateway::GatewayError, lead::LeadStatus};

/// Missing or malformed client input. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Missing required fields: id and status")]
    MissingIdOrStatus,

    #[error("Invalid status. Must be one of: {}", status_list())]
    UnknownStatus(String),

    #[error("{0}")]
    MalformedBody(String),

    #[error("Invalid query string: {0}")]
    MalformedQuery(String),
}

fn status_list() -> String {
    LeadStatus::ALL.map(LeadStatus::as_str).join(", ")
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Lead {0} not found")]
    LeadNotFound(String),

    #[error("Lead {0} already has a status update in progress")]
    UpdateInFlight(String),
}

/// Undecodable JSON bodies answer with the same `{message, retryable}` shape.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(ValidationError::MalformedBody(rejection.body_text()))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_)                   => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_)                      => StatusCode::BAD_REQUEST,
            AppError::Gateway(GatewayError::Rejected(_)) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_)                         => StatusCode::BAD_GATEWAY,
            AppError::Auth(AuthError::LoginDisabled)     => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_)                            => StatusCode::UNAUTHORIZED,
            AppError::LeadNotFound(_)                    => StatusCode::NOT_FOUND,
            AppError::UpdateInFlight(_)                  => StatusCode::CONFLICT,
        }
    }

    /// Whether the same request may succeed if the user tries again.
    pub fn retryable(&self) -> bool {
        match self {
            AppError::Gateway(err)      => err.retryable(),
            AppError::UpdateInFlight(_) => true,
            _                           => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("request rejected ({status}): {self}");
        }

        let body = Json(json!({
            "message":   self.to_string(),
            "retryable": self.retryable(),
        }));

        (status, body).into_response()
    }
}
