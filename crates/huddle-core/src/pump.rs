//! Reader and writer pumps.
//!
//! Each connection runs two tasks. The reader decodes inbound frames and
//! forwards them to the hub; when it stops, the client leaves its rooms and
//! unregisters. The writer drains the client's outbound queue onto the
//! connection and sends keepalive probes; it stops when the hub closes the
//! queue or a write fails, and closes the connection on the way out.

use crate::client::{ClientHandle, Outbox};
use crate::hub::HubHandle;
use chrono::Utc;
use huddle_protocol::{codec, codes, Envelope, EnvelopeKind};
use huddle_transport::{FrameReader, FrameWriter, Inbound, TransportError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Connection timing.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Keepalive probe period.
    pub ping_interval: Duration,
    /// Close the connection after this long without any inbound frame.
    pub idle_timeout: Duration,
    /// Upper bound for a single write.
    pub write_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Serve one connection until it ends.
///
/// Registers `client` with the hub, runs the writer in its own task and the
/// reader on this one, then tears the client down.
pub async fn run_client<R, W>(
    hub: HubHandle,
    client: ClientHandle,
    outbox: Outbox,
    mut reader: R,
    mut writer: W,
    config: PumpConfig,
) where
    R: FrameReader,
    W: FrameWriter + 'static,
{
    if hub.register(client.clone()).await.is_err() {
        warn!(connection = %client.id(), "Hub not running, dropping connection");
        let _ = writer.close().await;
        return;
    }

    debug!(
        connection = %client.id(),
        user = client.identity().user_id,
        transport = writer.name(),
        "Client connected"
    );

    let writer_task = tokio::spawn(write_pump(writer, outbox, config.clone()));

    read_pump(&hub, &client, &mut reader, config.idle_timeout).await;
    teardown(&hub, &client).await;

    if let Err(e) = writer_task.await {
        warn!(connection = %client.id(), error = %e, "Writer task failed");
    }
    debug!(connection = %client.id(), "Client disconnected");
}

async fn read_pump<R: FrameReader>(
    hub: &HubHandle,
    client: &ClientHandle,
    reader: &mut R,
    idle_timeout: Duration,
) {
    let id = client.id();

    loop {
        let frame = match timeout(idle_timeout, reader.recv()).await {
            Err(_) => {
                debug!(connection = %id, "Read idle timeout");
                return;
            }
            Ok(Err(e)) => {
                debug!(connection = %id, error = %e, "Read failed");
                return;
            }
            Ok(Ok(None)) => {
                debug!(connection = %id, "Connection closed by peer");
                return;
            }
            Ok(Ok(Some(Inbound::Heartbeat))) => continue,
            Ok(Ok(Some(Inbound::Data(frame)))) => frame,
        };

        let envelope = match codec::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(connection = %id, error = %e, "Malformed frame");
                client.send_envelope(&Envelope::error(
                    codes::BAD_REQUEST,
                    "invalid message format",
                ));
                continue;
            }
        };

        // Typing carries no acknowledgment; skip it for rooms we never joined.
        if envelope.kind == EnvelopeKind::Typing {
            if let Some(room) = envelope.room() {
                if !client.in_room(room) {
                    trace!(connection = %id, room, "Typing for a room not joined");
                    continue;
                }
            }
        }

        let identity = client.identity();
        let envelope = envelope.from_sender(identity.user_id, identity.username.clone(), Utc::now());
        trace!(connection = %id, kind = %envelope.kind, "Inbound envelope");

        if hub.dispatch(id.clone(), envelope).await.is_err() {
            warn!(connection = %id, "Hub stopped, closing connection");
            return;
        }
    }
}

/// Leave every room the client believes it is in, then unregister.
async fn teardown(hub: &HubHandle, client: &ClientHandle) {
    for room in client.joined_rooms() {
        if hub.request_leave(client.id().clone(), room).await.is_err() {
            break;
        }
    }

    if hub.unregister(client.id().clone()).await.is_err() {
        // Nobody else will close the queue.
        client.close();
    }
}

async fn write_pump<W: FrameWriter>(mut writer: W, mut outbox: Outbox, config: PumpConfig) {
    let id = outbox.client_id().clone();
    // `interval_at` panics on a zero period.
    let period = config.ping_interval.max(MIN_PING_INTERVAL);
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbox.recv() => {
                let Some(frame) = frame else {
                    debug!(connection = %id, "Outbound queue closed");
                    break;
                };
                if let Err(e) = with_deadline(config.write_timeout, writer.send(frame)).await {
                    debug!(connection = %id, error = %e, "Write failed");
                    break;
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = with_deadline(config.write_timeout, writer.ping()).await {
                    debug!(connection = %id, error = %e, "Keepalive failed");
                    break;
                }
            }
        }
    }

    outbox.close();
    if let Err(e) = with_deadline(config.write_timeout, writer.close()).await {
        trace!(connection = %id, error = %e, "Close failed");
    }
}

async fn with_deadline<F>(deadline: Duration, op: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(deadline, op)
        .await
        .map_err(|_| TransportError::Timeout)?
}
