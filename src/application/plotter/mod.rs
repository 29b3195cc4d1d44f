//! Single-owner controller streaming instruction artifacts to the plotter.
//!
//! At most one job exists at a time. Control operations reach the transfer
//! task through watch channels and never wait on the device itself.

mod controller;
mod transfer;

pub use controller::{PlotterController, PlotterError, PlotterStatus};
pub use transfer::TransferError;
