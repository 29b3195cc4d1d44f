//! HTTP gateway over the workspace store, render pipeline and plotter.

mod form;
mod middleware;
mod plotter;
mod session;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::{
    application::{pipeline::RenderPipeline, plotter::PlotterController},
    infra::workspace::WorkspaceStore,
};

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct GatewayState {
    pub workspaces: Arc<WorkspaceStore>,
    pub pipeline: Arc<RenderPipeline>,
    pub plotter: PlotterController,
    pub upload_limit_bytes: usize,
}

/// Body returned by control operations that have nothing else to report.
#[derive(Debug, Serialize)]
struct SuccessBody {
    status: &'static str,
}

impl Default for SuccessBody {
    fn default() -> Self {
        Self { status: "success" }
    }
}

pub fn build_router(state: GatewayState) -> Router {
    let upload_limit = state.upload_limit_bytes;

    let session_routes = Router::new()
        .route("/", get(session::new_session))
        .route("/app/{sid}", get(session::open_session))
        .route("/app/{sid}/original", get(session::original))
        .route("/app/{sid}/original/{code}", get(session::original))
        .route("/app/{sid}/preview", get(session::preview))
        .route("/app/{sid}/preview/{code}", get(session::preview))
        .route(
            "/app/{sid}/upload",
            post(session::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/app/{sid}/render_svg", post(session::render_svg))
        .route("/app/{sid}/run/{target}", get(plotter::run));

    let plotter_routes = Router::new()
        .route("/plotter/status", get(plotter::status))
        .route("/plotter/pause", get(plotter::pause))
        .route("/plotter/resume", get(plotter::resume))
        .route("/plotter/stop", get(plotter::stop));

    session_routes
        .merge(plotter_routes)
        .route("/_health", get(health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
