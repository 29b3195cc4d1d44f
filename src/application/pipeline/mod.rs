//! Three-stage invocation of the external renderer.

mod command;
mod service;
mod stage;

pub use command::RenderCommand;
pub use service::RenderPipeline;
pub use stage::{RenderError, RenderOutcome, RenderStage, StageFailure};
