use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use wildplot::{
    application::{error::AppError, pipeline::RenderPipeline, plotter::PlotterController},
    config,
    infra::{
        device::SerialLine,
        error::InfraError,
        http::{self, GatewayState},
        telemetry,
        workspace::WorkspaceStore,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let workspaces = WorkspaceStore::new(settings.workspaces.root.clone())
        .map(Arc::new)
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let pipeline = Arc::new(RenderPipeline::new(settings.render.renderer_path.clone()));
    let plotter = PlotterController::new(
        Arc::new(SerialLine::new(&settings.device)),
        Arc::clone(&workspaces),
        settings.device.staging_path.clone(),
    );

    let state = GatewayState {
        workspaces,
        pipeline,
        plotter,
        upload_limit_bytes: settings.uploads.max_request_bytes.get() as usize,
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "wildplot::bootstrap",
        addr = %settings.server.addr,
        workspaces = %settings.workspaces.root.display(),
        renderer = %settings.render.renderer_path.display(),
        device = %settings.device.path.display(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
