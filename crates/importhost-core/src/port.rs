use std::time::Duration;

use tokio::net::TcpListener;

use crate::error::{HarnessError, Result};

/// Ask the OS for a free loopback TCP port.
///
/// The probe listener is closed before returning, so another process can
/// still grab the port before the real consumer binds it. `release_delay`
/// gives platforms that hold on to closed ports a moment to let go.
pub async fn allocate_free_port(release_delay: Duration) -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(HarnessError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(HarnessError::PortAllocation)?
        .port();
    drop(listener);

    if !release_delay.is_zero() {
        tokio::time::sleep(release_delay).await;
    }
    tracing::debug!(port, "allocated free port");
    Ok(port)
}
