use crate::server::{AdmissionPolicy, ServerConfig};
use common::{Environment, env_or};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_MAX_CLIENTS: usize = 5;
pub const DEFAULT_WATCHDOG_SECS: u64 = 10;

/// Runtime settings for the coprocessor binary, read from `COPROC_*`
/// environment variables. Unset or unparsable values use the defaults.
#[derive(Debug, Clone)]
pub struct CoprocessorConfig {
    pub environment: Environment,
    pub bind_addr: IpAddr,
    pub port: u16,
    pub max_clients: usize,
    pub watchdog: Duration,
    pub admission: AdmissionPolicy,
    pub replay_dir: PathBuf,
    pub replay_fps: f64,
    pub frame_width: u16,
    pub frame_height: u16,
    pub stills_dir: PathBuf,
}

impl CoprocessorConfig {
    pub fn from_env() -> Self {
        let admission = std::env::var("COPROC_ADMISSION")
            .ok()
            .and_then(|raw| match raw.parse::<AdmissionPolicy>() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!("{e} Falling back to `drop`.");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            environment: Environment::from_env(),
            bind_addr: env_or("COPROC_BIND_ADDR", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: env_or("COPROC_PORT", DEFAULT_PORT),
            max_clients: env_or("COPROC_MAX_CLIENTS", DEFAULT_MAX_CLIENTS).max(1),
            watchdog: Duration::from_secs(env_or("COPROC_WATCHDOG_SECS", DEFAULT_WATCHDOG_SECS)),
            admission,
            replay_dir: env_or("COPROC_REPLAY_DIR", PathBuf::from("./frames")),
            replay_fps: env_or("COPROC_REPLAY_FPS", 30.0),
            frame_width: env_or("COPROC_FRAME_WIDTH", 400),
            frame_height: env_or("COPROC_FRAME_HEIGHT", 225),
            stills_dir: env_or("COPROC_STILLS_DIR", PathBuf::from("./images")),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: SocketAddr::new(self.bind_addr, self.port),
            max_clients: self.max_clients,
            watchdog: self.watchdog,
            admission: self.admission,
        }
    }
}
