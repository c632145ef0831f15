use anyhow::Context;
use coprocessor::{
    config::CoprocessorConfig, logging::setup_logging, replay::ReplayCamera, server::Server,
    stills::StillStore,
};
use framebus::FrameBus;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

const BIND_POLL_INTERVAL_MS: u64 = 500;
const BIND_MAX_ATTEMPTS: u32 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CoprocessorConfig::from_env();
    setup_logging(&config);

    tracing::info!(config = ?config, "Loaded configuration");

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let bus = Arc::new(FrameBus::new());
    let camera = Arc::new(
        ReplayCamera::load(
            &config.replay_dir,
            (config.frame_width, config.frame_height),
            Arc::clone(&bus),
            StillStore::new(&config.stills_dir),
        )
        .context("Failed to load replay frames")?,
    );

    let producer = {
        let camera = Arc::clone(&camera);
        let shutdown = Arc::clone(&shutdown);
        let fps = config.replay_fps;
        std::thread::Builder::new()
            .name("replay".into())
            .spawn(move || camera.run(fps, &shutdown))
            .context("Failed to spawn replay thread")?
    };

    let server_config = config.server_config();
    let server = common::wait_for_resource_async(
        || Server::bind(server_config.clone(), Arc::clone(&bus), camera.clone()),
        BIND_POLL_INTERVAL_MS,
        BIND_MAX_ATTEMPTS,
        "listening socket",
    )
    .await
    .with_context(|| format!("Failed to bind {}", server_config.bind_addr))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let relay = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            tracing::info!("Shutdown requested");
            let _ = stop_tx.send(true);
        })
    };

    let served = server.run(stop_rx).await;

    // A failed accept loop must still stop the producer.
    shutdown.store(true, Ordering::Relaxed);
    relay.abort();

    match producer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Replay camera failed"),
        Err(_) => tracing::error!("Replay thread panicked"),
    }

    served.context("Accept loop failed")
}
