use crate::{mailer::DispatchError, submission::ValidationError};
use lambda_http::{http::StatusCode, Body, Response};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, we could not send your message right now. Please try again later.";

/// Result of dispatching the messages for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: String,
    pub provider_message_id: Option<String>,
    pub error_detail: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered(message: impl Into<String>, provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            provider_message_id,
            error_detail: None,
        }
    }

    pub fn failed(error: &DispatchError) -> Self {
        Self {
            success: false,
            message: GENERIC_FAILURE_MESSAGE.into(),
            provider_message_id: None,
            error_detail: Some(error.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        if self.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn into_response(self, allowed_origin: &str) -> Response<Body> {
        if let Some(detail) = &self.error_detail {
            error!("Error dispatching form message: {detail}");
        }
        json_response(
            self.status(),
            allowed_origin,
            &ResponseBody {
                success: self.success,
                message: &self.message,
                message_id: self.provider_message_id.as_deref(),
            },
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
}

/// Everything that stops a request before a dispatch outcome exists.
#[derive(Debug)]
pub enum FormError {
    Validation(ValidationError),
    UnknownForm(String),
    MethodNotAllowed(String),
    Render(String),
}

impl FormError {
    pub fn log(&self) {
        match self {
            FormError::Validation(_) | FormError::UnknownForm(_) | FormError::MethodNotAllowed(_) => {
                error!("Client error handling form submission: {self}");
            }
            FormError::Render(_) => {
                error!("Internal error handling form submission: {self}");
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            FormError::Validation(_) => StatusCode::BAD_REQUEST,
            FormError::UnknownForm(_) => StatusCode::NOT_FOUND,
            FormError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            FormError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self, allowed_origin: &str) -> Response<Body> {
        let message = match &self {
            FormError::Validation(error) => error.to_string(),
            FormError::UnknownForm(_) => "Unknown form".into(),
            FormError::MethodNotAllowed(method) => format!("Method {method} not allowed"),
            FormError::Render(_) => GENERIC_FAILURE_MESSAGE.into(),
        };
        json_response(
            self.status(),
            allowed_origin,
            &ResponseBody {
                success: false,
                message: &message,
                message_id: None,
            },
        )
    }
}

impl From<ValidationError> for FormError {
    fn from(error: ValidationError) -> Self {
        FormError::Validation(error)
    }
}

impl Display for FormError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::Validation(error) => write!(f, "Validation error: {error}"),
            FormError::UnknownForm(path) => write!(f, "No form at path {path}"),
            FormError::MethodNotAllowed(method) => write!(f, "Method {method} not allowed"),
            FormError::Render(description) => write!(f, "Error rendering message: {description}"),
        }
    }
}

impl std::error::Error for FormError {}

/// Answers a CORS preflight request from the website.
pub fn preflight_response(allowed_origin: &str) -> Response<Body> {
    with_cors(Response::builder(), allowed_origin)
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Methods", "POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
        .header("Access-Control-Max-Age", "86400")
        .body(Body::Empty)
        .unwrap()
}

fn json_response(
    status: StatusCode,
    allowed_origin: &str,
    body: &ResponseBody,
) -> Response<Body> {
    // Serialising a struct of strings and booleans cannot fail.
    let body = serde_json::to_string(body).unwrap_or_default();
    with_cors(Response::builder(), allowed_origin)
        .status(status)
        .header("Content-Type", "application/json")
        .body(body.into())
        .unwrap()
}

fn with_cors(
    builder: lambda_http::http::response::Builder,
    allowed_origin: &str,
) -> lambda_http::http::response::Builder {
    builder.header("Access-Control-Allow-Origin", allowed_origin)
}
