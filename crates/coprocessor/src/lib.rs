pub mod camera;
pub mod config;
pub mod errors;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod render;
pub mod replay;
pub mod server;
pub mod session;
pub mod stills;

pub use camera::{CameraControl, CameraError, Capabilities, Exposure};
pub use errors::SessionError;
pub use server::{AdmissionPolicy, Server, ServerConfig};
