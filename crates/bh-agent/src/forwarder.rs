//! Pipes reverse-dialed streams to a local service

use tokio::net::TcpStream;

use bh_core::{BhError, BoxedStream};

/// Connect to `target` and copy bytes both ways until either side closes.
///
/// Returns the bytes copied (to target, from target).
pub async fn forward_to(mut stream: BoxedStream, target: &str) -> Result<(u64, u64), BhError> {
    let mut local = TcpStream::connect(target).await?;
    if let Err(e) = local.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY on {}: {}", target, e);
    }

    let copied = tokio::io::copy_bidirectional(&mut stream, &mut local).await?;
    tracing::debug!(
        "Forwarded stream to {}: {} bytes out, {} bytes in",
        target,
        copied.0,
        copied.1
    );
    Ok(copied)
}
