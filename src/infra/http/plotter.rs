//! Device control routes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::{
    application::{
        error::{AppError, HttpError},
        plotter::PlotterStatus,
    },
    domain::types::ArtifactKind,
};

use super::{GatewayState, SuccessBody};

#[derive(Debug, Deserialize)]
pub(super) struct RunPath {
    sid: String,
    target: String,
}

pub(super) async fn run(
    State(state): State<GatewayState>,
    Path(RunPath { sid, target }): Path<RunPath>,
) -> Result<Json<SuccessBody>, HttpError> {
    let workspace = state.workspaces.ensure(&sid).await.map_err(AppError::from)?;
    let target = ArtifactKind::try_from(target.as_str()).map_err(|()| {
        HttpError::new(
            "infra::http::plotter::run",
            StatusCode::NOT_FOUND,
            "Invalid endpoint",
            format!("unknown plot target `{target}`"),
        )
    })?;

    state
        .plotter
        .start(workspace.session(), target)
        .await
        .map_err(AppError::from)?;
    Ok(Json(SuccessBody::default()))
}

pub(super) async fn status(State(state): State<GatewayState>) -> Json<PlotterStatus> {
    Json(state.plotter.status())
}

pub(super) async fn pause(
    State(state): State<GatewayState>,
) -> Result<Json<SuccessBody>, AppError> {
    state.plotter.pause().await?;
    Ok(Json(SuccessBody::default()))
}

pub(super) async fn resume(
    State(state): State<GatewayState>,
) -> Result<Json<SuccessBody>, AppError> {
    state.plotter.resume()?;
    Ok(Json(SuccessBody::default()))
}

pub(super) async fn stop(
    State(state): State<GatewayState>,
) -> Result<Json<SuccessBody>, AppError> {
    state.plotter.stop().await?;
    Ok(Json(SuccessBody::default()))
}
