pub(crate) mod lock;
pub mod progress;
