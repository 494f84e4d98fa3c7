//! Plain TCP serving loop.
//!
//! Each accepted stream gets one task that reads and dispatches, and one
//! writer task that drains the connection's outbound queue.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::config::ListenerSettings;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{
    ConnectionChannels, ConnectionId, ConnectionKind, ConnectionSignal, Connections, Outbound, ReactorId, Watermark,
};
use crate::net::listener::{ConnectionPermit, StreamListener};
use crate::net::router::PortDispatch;

/// Accept loop for a TCP port. Returns once shutdown is triggered.
pub(crate) async fn serve(
    listener: StreamListener,
    dispatch: Arc<PortDispatch>,
    settings: ListenerSettings,
    connections: Connections,
    reactor: ReactorId,
    shutdown: Shutdown,
) {
    let mut stop = shutdown.subscribe();
    tracing::info!(port = %dispatch.name(), reactor = %reactor, "TCP port serving");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let conn = ConnectionId::new();
                    tracing::debug!(port = %dispatch.name(), conn = %conn, peer = %peer, "TCP connection accepted");
                    let channels = connections.register(
                        conn,
                        dispatch.name(),
                        peer,
                        ConnectionKind::Tcp,
                        settings.output_buffer_frames,
                    );
                    tokio::spawn(handle_connection(
                        stream,
                        conn,
                        channels,
                        permit,
                        Arc::clone(&dispatch),
                        settings.read_buffer_bytes,
                        reactor,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(port = %dispatch.name(), error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            _ = stop.wait() => break,
        }
    }

    tracing::info!(port = %dispatch.name(), "TCP port stopped accepting");
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    conn: ConnectionId,
    channels: ConnectionChannels,
    _permit: ConnectionPermit,
    dispatch: Arc<PortDispatch>,
    read_buffer_bytes: usize,
    reactor: ReactorId,
    shutdown: Shutdown,
) {
    let ConnectionChannels {
        outbound,
        signals,
        watermark,
        guard,
    } = channels;
    let mut stop = shutdown.subscribe();

    let (mut reader, writer) = stream.into_split();
    tokio::spawn(write_loop(conn, writer, outbound, watermark));

    // Flow-control callbacks run beside the read loop, which may be parked in a
    // receive handler that is itself waiting for queue room.
    let (writer_closed_tx, mut writer_closed) = oneshot::channel();
    let signal_task = tokio::spawn(signal_loop(conn, signals, Arc::clone(&dispatch), writer_closed_tx));

    dispatch.connect(conn, reactor).await;

    let mut buf = vec![0u8; read_buffer_bytes.max(1)];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => dispatch.receive(conn, reactor, Bytes::copy_from_slice(&buf[..n])).await,
                Err(e) => {
                    tracing::debug!(conn = %conn, error = %e, "Read failed");
                    break;
                }
            },
            _ = &mut writer_closed => break,
            _ = stop.wait() => break,
        }
    }

    // Unregistering drops the queue's last long-lived sender, which ends the writer.
    drop(guard);
    signal_task.abort();
    dispatch.close(conn, reactor).await;
    tracing::debug!(conn = %conn, "TCP connection closed");
}

async fn signal_loop(
    conn: ConnectionId,
    mut signals: mpsc::UnboundedReceiver<ConnectionSignal>,
    dispatch: Arc<PortDispatch>,
    writer_closed: oneshot::Sender<()>,
) {
    while let Some(signal) = signals.recv().await {
        match signal {
            ConnectionSignal::BufferFull => dispatch.buffer_full(conn).await,
            ConnectionSignal::BufferEmpty => dispatch.buffer_empty(conn).await,
            ConnectionSignal::Closed => break,
        }
    }
    let _ = writer_closed.send(());
}

async fn write_loop(
    conn: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Outbound>,
    watermark: Watermark,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(conn = %conn, error = %e, "Write failed");
                    break;
                }
            }
            Outbound::Message(_) => {
                tracing::warn!(conn = %conn, "WebSocket message queued on a TCP connection; dropped");
            }
            Outbound::Close => break,
        }
        watermark.drained(outbound.is_empty());
    }

    let _ = writer.shutdown().await;
    watermark.closed();
}
