//! Application services: the render pipeline and the plotter controller.

pub mod error;
pub mod pipeline;
pub mod plotter;
