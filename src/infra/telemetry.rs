use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

pub const RENDER_STAGE_MS: &str = "wildplot_render_stage_ms";
pub const RENDER_FAILURES_TOTAL: &str = "wildplot_render_failures_total";
pub const PLOTTER_JOBS_TOTAL: &str = "wildplot_plotter_jobs_total";
pub const PLOTTER_BYTES_TOTAL: &str = "wildplot_plotter_bytes_total";

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            RENDER_STAGE_MS,
            Unit::Milliseconds,
            "Renderer stage latency in milliseconds, labelled by stage and result."
        );
        describe_counter!(
            RENDER_FAILURES_TOTAL,
            Unit::Count,
            "Total number of render requests that failed, labelled by stage."
        );
        describe_counter!(
            PLOTTER_JOBS_TOTAL,
            Unit::Count,
            "Total number of plotter jobs that ended, labelled by outcome."
        );
        describe_counter!(
            PLOTTER_BYTES_TOTAL,
            Unit::Bytes,
            "Total number of bytes delivered to the plotter."
        );
    });
}
