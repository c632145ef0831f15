use std::time::Duration;

/// Keep calling `connect` until it succeeds, sleeping `poll_interval_ms` between
/// attempts. Used for resources that show up after this process starts (a port
/// still held by a previous instance, a frame directory being mounted).
pub fn wait_for_resource<F, T, E>(mut connect: F, poll_interval_ms: u64, resource_name: &str) -> T
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    loop {
        match connect() {
            Ok(resource) => {
                tracing::info!("{} ready", resource_name);
                return resource;
            }
            Err(e) => {
                tracing::debug!("Waiting for {} ({})", resource_name, e);
                std::thread::sleep(Duration::from_millis(poll_interval_ms));
            }
        }
    }
}

/// Bounded async variant: gives up after `max_attempts` and returns the last error.
#[cfg(feature = "async")]
pub async fn wait_for_resource_async<F, Fut, T, E>(
    mut connect: F,
    poll_interval_ms: u64,
    max_attempts: u32,
    resource_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(resource) => {
                tracing::info!("{} ready", resource_name);
                return Ok(resource);
            }
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    "Waiting for {} (attempt {}/{}): {}",
                    resource_name,
                    attempt,
                    max_attempts,
                    e
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
