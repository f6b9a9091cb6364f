// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::credentials::IssueError;
use crate::forwarder::ForwardError;
use crate::pods::FinderError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AppError {
    #[error("no pod found for {0}")]
    PodNotFound(String),
    #[error("pod {0} has no role assigned")]
    RoleNotAssigned(String),
    #[error("role {requested:?} does not match assigned role {assigned:?}")]
    RoleMismatch { requested: String, assigned: String },
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("pod lookup failed: {0}")]
    FinderError(String),
    #[error("credentials unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("metadata passthrough failed: {0}")]
    PassthroughError(String),
    #[error("internal server error")]
    InternalServerError,
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("shutdown deadline exceeded")]
    ShutdownTimedOut,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PodNotFound(_)
            | Self::RoleNotAssigned(_)
            | Self::RoleMismatch { .. }
            | Self::InvalidRole(_)
            | Self::AccessDenied(_)
            | Self::FinderError(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PassthroughError(_) => StatusCode::BAD_GATEWAY,
            Self::InternalServerError | Self::ConfigError(_) | Self::ShutdownTimedOut => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Unresolved identities are routine (pod churn, unassigned roles)
        if status.is_server_error() {
            tracing::error!("[proxy] {}", self);
        } else {
            tracing::debug!("[proxy] {}", self);
        }

        let message = match status {
            StatusCode::NOT_FOUND => "Not Found".to_string(),
            _ => self.to_string(),
        };
        let body = Json(json!({"code": status.as_u16(), "message": message}));

        (status, body).into_response()
    }
}

impl From<IssueError> for AppError {
    fn from(source: IssueError) -> Self {
        match source {
            IssueError::InvalidRole(role) => AppError::InvalidRole(role),
            IssueError::AccessDenied(reason) => AppError::AccessDenied(reason),
            IssueError::Unavailable(reason) => AppError::UpstreamUnavailable(reason),
        }
    }
}

impl From<FinderError> for AppError {
    fn from(source: FinderError) -> Self {
        AppError::FinderError(source.to_string())
    }
}

impl From<ForwardError> for AppError {
    fn from(source: ForwardError) -> Self {
        AppError::PassthroughError(source.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(_source: std::io::Error) -> Self {
        tracing::error!("{:?}", _source);
        AppError::InternalServerError
    }
}
