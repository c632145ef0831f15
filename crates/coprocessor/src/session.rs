//! One connected client: read an opcode, serve it, repeat until the peer goes
//! away, misbehaves, falls silent past the watchdog, or the server stops.

use crate::camera::{self, CameraControl};
use crate::errors::SessionError;
use crate::protocol::{self, Command, Control, MAX_PAYLOAD_LEN, Opcode};
use crate::registry::Registration;
use crate::server::wait_for_shutdown;
use framebus::{FrameState, ReadyCursor};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::Instrument;

pub struct ClientSession {
    stream: TcpStream,
    peer: SocketAddr,
    // Dropped with the session, which removes the registry entry.
    _registration: Registration,
    cursor: ReadyCursor,
    camera: Arc<dyn CameraControl>,
    watchdog: Duration,
    shutdown: watch::Receiver<bool>,
    commands_served: u64,
}

/// Run `fut` unless the watchdog expires or shutdown is signalled first.
async fn guarded<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    watchdog: Duration,
    fut: F,
) -> Result<F::Output, SessionError> {
    tokio::select! {
        result = timeout(watchdog, fut) => result.map_err(|_| SessionError::Watchdog(watchdog)),
        _ = wait_for_shutdown(shutdown) => Err(SessionError::Shutdown),
    }
}

impl ClientSession {
    pub fn new(
        stream: TcpStream,
        registration: Registration,
        cursor: ReadyCursor,
        camera: Arc<dyn CameraControl>,
        watchdog: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            stream,
            peer: registration.addr(),
            _registration: registration,
            cursor,
            camera,
            watchdog,
            shutdown,
            commands_served: 0,
        }
    }

    /// Serve the client until the session ends and return why it ended.
    ///
    /// The registry entry and the ready cursor are released when this returns.
    pub async fn run(mut self) -> SessionError {
        let span = tracing::info_span!("session", peer = %self.peer);
        async move {
            tracing::info!("Client connected");
            let reason = self.serve().await;
            let commands = self.commands_served;

            match &reason {
                SessionError::Disconnected => {
                    tracing::info!(commands, "Client disconnected")
                }
                SessionError::Shutdown => {
                    tracing::info!(commands, "Session closed for shutdown")
                }
                SessionError::Watchdog(idle) => {
                    tracing::warn!(commands, ?idle, "Client timed out")
                }
                other => {
                    tracing::error!(commands, error = %other, "Session terminated")
                }
            }
            reason
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> SessionError {
        loop {
            if let Err(reason) = self.step().await {
                return reason;
            }
            self.commands_served += 1;
        }
    }

    /// Read and answer exactly one command.
    async fn step(&mut self) -> Result<(), SessionError> {
        let raw = self.read_u16().await?;
        let opcode = Opcode::from_u16(raw).ok_or(SessionError::UnknownOpcode(raw))?;

        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let payload = &mut buf[..opcode.payload_len()];
        self.read_exact(payload).await?;

        let command = Command::decode(opcode, payload)?;
        tracing::debug!(opcode = opcode.name(), "Command received");

        match command {
            Command::NoOp => Ok(()),
            Command::Coords => {
                let state = self.wait_ready().await?;
                let reply = protocol::encode_coords(state.detections())?;
                tracing::debug!(
                    sequence = state.sequence(),
                    detections = state.detections().len(),
                    "Sending coords"
                );
                self.send(&reply).await
            }
            Command::Image => {
                let state = self.wait_ready().await?;
                let reply = protocol::encode_image(state.frame())?;
                tracing::debug!(
                    sequence = state.sequence(),
                    bytes = state.frame().len(),
                    "Sending image"
                );
                self.send(&reply).await
            }
            Command::Control(control) => {
                let success = self.apply_control(control).await?;
                self.send(&protocol::encode_status(success)).await
            }
        }
    }

    async fn read_u16(&mut self) -> Result<u16, SessionError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SessionError> {
        if buf.is_empty() {
            return Ok(());
        }
        let read = self.stream.read_exact(buf);
        guarded(&mut self.shutdown, self.watchdog, read)
            .await?
            .map_err(SessionError::from_io)?;
        Ok(())
    }

    /// Wait for the next publish. A peer that hangs up meanwhile ends the wait.
    async fn wait_ready(&mut self) -> Result<FrameState, SessionError> {
        let Self {
            stream,
            cursor,
            shutdown,
            watchdog,
            ..
        } = self;

        let ready = async {
            let mut peek_buf = [0u8; 1];
            tokio::select! {
                state = cursor.wait() => state.map_err(SessionError::from),
                peeked = stream.peek(&mut peek_buf) => match peeked {
                    Ok(0) => Err(SessionError::Disconnected),
                    Err(e) => Err(SessionError::from_io(e)),
                    // Pipelined request bytes; they are read after this reply.
                    Ok(_) => cursor.wait().await.map_err(SessionError::from),
                },
            }
        };
        guarded(shutdown, *watchdog, ready).await?
    }

    async fn send(&mut self, reply: &[u8]) -> Result<(), SessionError> {
        let write = self.stream.write_all(reply);
        guarded(&mut self.shutdown, self.watchdog, write)
            .await?
            .map_err(SessionError::from_io)
    }

    /// Forward a control command to the camera. Returns whether it was applied.
    ///
    /// The camera call counts against the watchdog. If it expires or shutdown
    /// arrives first the session ends and the blocking call is left to finish
    /// on its own.
    async fn apply_control(&mut self, control: Control) -> Result<bool, SessionError> {
        let opcode = control.opcode().name();

        if !self.camera.capabilities().supports(&control) {
            tracing::warn!(opcode, "Control not supported by camera");
            return Ok(false);
        }

        let camera = Arc::clone(&self.camera);
        let task = tokio::task::spawn_blocking(move || camera::apply(camera.as_ref(), control));
        let applied = guarded(&mut self.shutdown, self.watchdog, task).await?;

        let success = match applied {
            Ok(Ok(Some(path))) => {
                tracing::info!(opcode, path = %path.display(), "Still saved");
                true
            }
            Ok(Ok(None)) => {
                tracing::debug!(opcode, "Control applied");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(opcode, error = %e, "Control failed");
                false
            }
            Err(e) => {
                tracing::error!(opcode, error = %e, "Control task panicked");
                false
            }
        };
        Ok(success)
    }
}
