pub mod colorspace;
#[path = "core/logging.rs"]
pub mod logging;
pub mod histogram;
pub mod prelude;
pub mod render;
pub mod runtime;
pub mod settings;
pub mod source;

pub use runtime::app::{MonitorOptions, build_registry, run};
