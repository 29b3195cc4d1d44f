use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{pipeline::RenderError, plotter::PlotterError},
    domain::params::ValidationErrors,
    infra::{device::DeviceSetupError, error::InfraError, workspace::WorkspaceError},
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
enum HttpErrorBody {
    Text(&'static str),
    Json(serde_json::Value),
}

/// A failed request: the client sees a short public body, the logs see the report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: HttpErrorBody,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: HttpErrorBody::Text(public_message),
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            body: HttpErrorBody::Text(public_message),
            report: ErrorReport::from_error(source, status, error),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            HttpErrorBody::Text(message) => (self.status, message).into_response(),
            HttpErrorBody::Json(value) => (self.status, Json(value)).into_response(),
        };
        self.report.attach(&mut response);
        response
    }
}

impl From<ValidationErrors> for HttpError {
    fn from(errors: ValidationErrors) -> Self {
        let status = StatusCode::PRECONDITION_FAILED;
        let report = ErrorReport::from_error("application::error::validation", status, &errors);
        let body = serde_json::to_value(&errors)
            .map(HttpErrorBody::Json)
            .unwrap_or(HttpErrorBody::Text("Invalid parameters"));
        Self {
            status,
            body,
            report,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Plotter(#[from] PlotterError),
    #[error("validation failed")]
    Validation(#[from] ValidationErrors),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Workspace(WorkspaceError::InvalidIdentifier { .. })
            | AppError::Workspace(WorkspaceError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Workspace(WorkspaceError::EmptyPayload)
            | AppError::Workspace(WorkspaceError::PayloadStream { .. }) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Plotter(
                PlotterError::Busy
                | PlotterError::NotRunning
                | PlotterError::AlreadyPaused
                | PlotterError::NotPaused,
            ) => StatusCode::CONFLICT,
            AppError::Plotter(PlotterError::Setup(_))
            | AppError::Workspace(WorkspaceError::Storage(_))
            | AppError::Render(_)
            | AppError::Infra(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Workspace(WorkspaceError::InvalidIdentifier { .. })
            | AppError::Workspace(WorkspaceError::NotFound { .. }) => "Not found",
            AppError::Workspace(WorkspaceError::EmptyPayload) => "No files were uploaded.",
            AppError::Workspace(WorkspaceError::PayloadStream { .. }) => "Upload interrupted",
            AppError::Validation(_) => "Invalid parameters",
            AppError::Plotter(PlotterError::Busy) => "Plotter busy",
            AppError::Plotter(PlotterError::NotRunning) => "Not running",
            AppError::Plotter(PlotterError::AlreadyPaused) => "Already paused",
            AppError::Plotter(PlotterError::NotPaused) => "Not paused",
            AppError::Plotter(PlotterError::Setup(
                DeviceSetupError::MissingArtifact { .. } | DeviceSetupError::Snapshot(_),
            )) => "Could not create temporary file",
            AppError::Plotter(PlotterError::Setup(_)) => "Could not setup serial port",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Workspace(WorkspaceError::Storage(_)) | AppError::Infra(InfraError::Io(_)) => {
                "Internal server error"
            }
            AppError::Render(_) | AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl From<AppError> for HttpError {
    fn from(error: AppError) -> Self {
        match error {
            AppError::Validation(errors) => errors.into(),
            other => HttpError::from_error(
                "application::error::AppError",
                other.status_code(),
                other.presentation_message(),
                &other,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        HttpError::from(self).into_response()
    }
}
