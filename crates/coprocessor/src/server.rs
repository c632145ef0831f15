use crate::camera::CameraControl;
use crate::registry::ClientRegistry;
use crate::session::ClientSession;
use framebus::FrameBus;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What to do with a connection that arrives while every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Accept it, log, and close it straight away.
    #[default]
    Drop,
    /// Stop accepting until a session ends; the peer waits in the backlog.
    Stall,
}

impl AdmissionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionPolicy::Drop => "drop",
            AdmissionPolicy::Stall => "stall",
        }
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(AdmissionPolicy::Drop),
            "stall" => Ok(AdmissionPolicy::Stall),
            other => Err(format!(
                "{other} is not a supported admission policy. Use either `drop` or `stall`."
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    pub watchdog: Duration,
    pub admission: AdmissionPolicy,
}

/// Resolves once `shutdown` reads `true`. If the sender is gone the server can
/// no longer be told to stop, so this never resolves.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `delay`. Returns `false` if shutdown was signalled first.
async fn pause_unless_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wait_for_shutdown(shutdown) => false,
    }
}

/// Accept loop and owner of the client registry.
pub struct Server {
    listener: TcpListener,
    bus: Arc<FrameBus>,
    camera: Arc<dyn CameraControl>,
    registry: Arc<ClientRegistry>,
    slots: Arc<Semaphore>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(
        config: ServerConfig,
        bus: Arc<FrameBus>,
        camera: Arc<dyn CameraControl>,
    ) -> io::Result<Self> {
        if config.max_clients == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_clients must be at least 1",
            ));
        }

        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            max_clients = config.max_clients,
            watchdog = ?config.watchdog,
            admission = %config.admission,
            "Coprocessor listening"
        );

        Ok(Self {
            listener,
            bus,
            camera,
            registry: Arc::new(ClientRegistry::new()),
            slots: Arc::new(Semaphore::new(config.max_clients)),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Accept clients until `shutdown` turns `true`, then wait for every
    /// session to close.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let mut sessions = JoinSet::new();

        loop {
            while let Some(finished) = sessions.try_join_next() {
                log_session_exit(finished);
            }

            let reserved = match self.config.admission {
                AdmissionPolicy::Stall => tokio::select! {
                    permit = Arc::clone(&self.slots).acquire_owned() => {
                        Some(permit.map_err(io::Error::other)?)
                    }
                    _ = wait_for_shutdown(&mut shutdown) => break,
                },
                AdmissionPolicy::Drop => None,
            };

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        if pause_unless_shutdown(&mut shutdown, ACCEPT_RETRY_DELAY).await {
                            continue;
                        }
                        break;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let permit = match reserved {
                Some(permit) => permit,
                None => match Arc::clone(&self.slots).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!(
                            peer = %peer,
                            max_clients = self.config.max_clients,
                            "Client limit reached, refusing connection"
                        );
                        drop(stream);
                        continue;
                    }
                },
            };

            self.admit(&mut sessions, stream, peer, permit, shutdown.clone());
        }

        tracing::info!(
            sessions = sessions.len(),
            "Shutting down, waiting for sessions to close"
        );
        while let Some(finished) = sessions.join_next().await {
            log_session_exit(finished);
        }
        tracing::info!("Coprocessor stopped");
        Ok(())
    }

    fn admit(
        &self,
        sessions: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: OwnedSemaphorePermit,
        shutdown: watch::Receiver<bool>,
    ) {
        let Some(registration) = self.registry.register(peer) else {
            tracing::warn!(peer = %peer, "Peer address already registered, refusing connection");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = ClientSession::new(
            stream,
            registration,
            self.bus.subscribe(),
            Arc::clone(&self.camera),
            self.config.watchdog,
            shutdown,
        );
        tracing::debug!(peer = %peer, clients = self.registry.len(), "Client admitted");

        sessions.spawn(async move {
            session.run().await;
            // The slot frees only after the registry entry is gone.
            drop(permit);
        });
    }
}

fn log_session_exit(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "Session task panicked");
    }
}
