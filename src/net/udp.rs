//! UDP receive loop.
//!
//! Datagrams are dispatched one at a time, in arrival order.

use std::sync::Arc;

use axum::body::Bytes;
use tokio::net::UdpSocket;

use crate::config::ListenerSettings;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::handler::ClientInfo;
use crate::net::router::PortDispatch;

pub(crate) async fn serve(
    socket: Arc<UdpSocket>,
    dispatch: Arc<PortDispatch>,
    settings: ListenerSettings,
    shutdown: Shutdown,
) {
    let local = match socket.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(port = %dispatch.name(), error = %e, "UDP socket has no local address");
            return;
        }
    };
    let mut stop = shutdown.subscribe();
    let mut buf = vec![0u8; settings.read_buffer_bytes.max(1)];
    tracing::info!(port = %dispatch.name(), address = %local, "UDP port serving");

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    let client = ClientInfo::new(peer, local, Arc::clone(&socket));
                    dispatch.packet(Bytes::copy_from_slice(&buf[..n]), client).await;
                }
                // ICMP errors from earlier sends surface here; the socket stays usable.
                Err(e) => tracing::debug!(port = %dispatch.name(), error = %e, "UDP receive failed"),
            },
            _ = stop.wait() => break,
        }
    }

    tracing::info!(port = %dispatch.name(), "UDP port stopped");
}
