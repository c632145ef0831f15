pub mod config;
pub mod logging;
pub mod wait;

pub use config::{Environment, env_or};
pub use logging::setup_logging;
#[cfg(feature = "async")]
pub use wait::wait_for_resource_async;
pub use wait::wait_for_resource;
