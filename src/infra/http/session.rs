//! Session workspace routes: upload, previews, and rendering.

use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::{
        StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    application::{
        error::{AppError, HttpError},
        pipeline::{RenderError, StageFailure},
    },
    domain::{params::RenderParams, session::SessionId},
    infra::workspace::{Workspace, WorkspaceError},
};

use super::{GatewayState, form::RenderRequest};

const SOURCE: &str = "infra::http::session";
const SVG_EXTENSIONS: [&str; 2] = [".svg", ".SVG"];

#[derive(Debug, Deserialize)]
pub(super) struct SessionPath {
    sid: String,
}

#[derive(Debug, Serialize)]
pub(super) struct SessionBody {
    session: String,
}

#[derive(Debug, Serialize)]
pub(super) struct UploadBody {
    status: &'static str,
    size_bytes: u64,
    checksum: String,
}

#[derive(Debug, Serialize)]
pub(super) struct StageErrorBody {
    message: String,
    exit_code: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum RenderBody {
    Rendered {
        success: bool,
        stdout: String,
    },
    Failed {
        success: bool,
        step: u8,
        error: StageErrorBody,
    },
}

pub(super) async fn new_session() -> Redirect {
    let session = SessionId::generate();
    Redirect::to(&format!("/app/{session}"))
}

pub(super) async fn open_session(
    State(state): State<GatewayState>,
    Path(SessionPath { sid }): Path<SessionPath>,
) -> Result<Json<SessionBody>, AppError> {
    let workspace = state.workspaces.ensure(&sid).await?;
    Ok(Json(SessionBody {
        session: workspace.session().to_string(),
    }))
}

pub(super) async fn original(
    State(state): State<GatewayState>,
    Path(SessionPath { sid }): Path<SessionPath>,
) -> Result<Response, AppError> {
    let workspace = state.workspaces.ensure(&sid).await?;
    Ok(svg_response(workspace.read_source().await?))
}

pub(super) async fn preview(
    State(state): State<GatewayState>,
    Path(SessionPath { sid }): Path<SessionPath>,
) -> Result<Response, AppError> {
    let workspace = state.workspaces.ensure(&sid).await?;
    Ok(svg_response(workspace.read_preview().await?))
}

fn svg_response(data: Bytes) -> Response {
    (
        [(CONTENT_TYPE, "image/svg+xml"), (CACHE_CONTROL, "no-store")],
        data,
    )
        .into_response()
}

pub(super) async fn upload(
    State(state): State<GatewayState>,
    Path(SessionPath { sid }): Path<SessionPath>,
    mut multipart: Multipart,
) -> Result<Json<UploadBody>, HttpError> {
    let workspace = state.workspaces.ensure(&sid).await.map_err(AppError::from)?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_error(&err)),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if !SVG_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
            return Err(HttpError::new(
                SOURCE,
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid Image",
                format!("rejected upload `{filename}`: not an SVG file"),
            ));
        }

        return match workspace.store_source_stream(field).await {
            Ok(stored) => {
                info!(
                    target = "wildplot::http::session",
                    op = "session::upload",
                    result = "ok",
                    session = %workspace.session(),
                    size_bytes = stored.size_bytes,
                    checksum = %stored.checksum,
                    "Drawing uploaded"
                );
                Ok(Json(UploadBody {
                    status: "success",
                    size_bytes: stored.size_bytes,
                    checksum: stored.checksum,
                }))
            }
            Err(WorkspaceError::PayloadStream { source }) => {
                match source.downcast_ref::<MultipartError>() {
                    Some(err) => Err(multipart_error(err)),
                    None => Err(AppError::from(WorkspaceError::PayloadStream { source }).into()),
                }
            }
            Err(err) => Err(AppError::from(err).into()),
        };
    }

    Err(HttpError::new(
        SOURCE,
        StatusCode::BAD_REQUEST,
        "No files were uploaded.",
        "multipart body has no `file` field",
    ))
}

fn multipart_error(err: &MultipartError) -> HttpError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        HttpError::from_error(SOURCE, StatusCode::PAYLOAD_TOO_LARGE, "File too large", err)
    } else {
        HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "No files were uploaded.", err)
    }
}

pub(super) async fn render_svg(
    State(state): State<GatewayState>,
    Path(SessionPath { sid }): Path<SessionPath>,
    RenderRequest(form): RenderRequest,
) -> Result<Json<RenderBody>, AppError> {
    let workspace = state.workspaces.ensure(&sid).await?;
    let params = RenderParams::try_from(form)?;
    Ok(render(&state, &workspace, &params).await)
}

/// Stage failures are reported in the body with a 200, as clients expect.
async fn render(
    state: &GatewayState,
    workspace: &Workspace,
    params: &RenderParams,
) -> Json<RenderBody> {
    match state.pipeline.render(workspace, params).await {
        Ok(outcome) => Json(RenderBody::Rendered {
            success: true,
            stdout: outcome.stdout,
        }),
        Err(RenderError::StageFailed { stage, failure }) => {
            let message = failure.to_string();
            let (exit_code, stdout, stderr) = match failure {
                StageFailure::Exit {
                    exit_code,
                    stdout,
                    stderr,
                } => (exit_code, Some(stdout), Some(stderr)),
                StageFailure::Spawn(_) | StageFailure::Promote { .. } => (None, None, None),
            };
            Json(RenderBody::Failed {
                success: false,
                step: stage.index(),
                error: StageErrorBody {
                    message,
                    exit_code,
                    stdout,
                    stderr,
                },
            })
        }
    }
}
