//! The client actor pair: a reader pump and a writer pump per connection.
//!
//! The reader is the only task that consumes inbound frames; the writer is
//! the only task that touches the write half of the socket, so frames can
//! never interleave on the wire. The two are linked by a cancellation token:
//! whichever side fails first tears the pair down, and teardown always ends
//! in the unregister cascade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{Frame, FrameReader, FrameWriter};
use crate::hub::HubHandle;
use crate::model::message::{MessageType, WsMessage};
use crate::model::payload::SignalPayload;
use crate::room::RoomHandle;

/// Process-unique identifier for one connection.
pub type ConnId = usize;

fn next_conn_id() -> ConnId {
    static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of one connection. Terminal at `Closed`, no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Unassigned,
    RegisteringWithRoom,
    Active,
    Disconnecting,
    Closed,
}

/// Cheap handle to one connected participant.
///
/// Rooms hold one of these per member; deliveries go through the bounded
/// outbound queue it wraps.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn_id: ConnId,
    user_id: String,
    room_id: String,
    tx: mpsc::Sender<Frame>,
}

impl ClientHandle {
    /// Builds a handle around an outbound queue sender. The connection ID is
    /// assigned automatically and never reused within the process.
    pub fn new(user_id: &str, room_id: &str, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            conn_id: next_conn_id(),
            user_id: user_id.to_string(),
            room_id: room_id.to_string(),
            tx,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Non-blocking enqueue of a serialized message. Returns false when the
    /// queue is full, in which case the message is simply lost for this
    /// client.
    pub(crate) fn try_deliver(&self, json: String) -> bool {
        self.tx.try_send(Frame::Text(json)).is_ok()
    }
}

/// One connected participant, run as a reader/writer task pair.
pub struct Client;

impl Client {
    /// Spawns the pumps for a pre-authenticated connection and submits it to
    /// the hub for room placement.
    ///
    /// `user_id` and `room_id` must already be verified; the relay trusts
    /// them and stamps `user_id` onto every message this connection sends.
    pub fn spawn<R, W>(
        user_id: &str,
        room_id: &str,
        reader: R,
        writer: W,
        hub: HubHandle,
        config: Config,
    ) -> ClientHandle
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let (out_tx, out_rx) = mpsc::channel(config.send_queue_capacity);
        let handle = ClientHandle::new(user_id, room_id, out_tx.clone());
        let token = CancellationToken::new();

        tokio::spawn(write_pump(
            writer,
            out_rx,
            token.clone(),
            handle.user_id.clone(),
            config.clone(),
        ));
        tokio::spawn(read_pump(reader, out_tx, hub, handle.clone(), token, config));

        handle
    }
}

/// Pumps frames from the connection into the room.
///
/// Each read is bounded by the idle-read deadline; any frame, in particular
/// the peer's keepalive pong, renews it. This detects half-open connections
/// without relying on the peer's cooperation.
async fn read_pump<R: FrameReader>(
    mut reader: R,
    out_tx: mpsc::Sender<Frame>,
    hub: HubHandle,
    me: ClientHandle,
    token: CancellationToken,
    config: Config,
) {
    let mut state = ClientState::Unassigned;
    let mut room: Option<RoomHandle> = None;

    let mut placed_rx = hub.register(me.clone());
    advance(&mut state, ClientState::RegisteringWithRoom, &me);

    loop {
        tokio::select! {
            placed = &mut placed_rx, if state == ClientState::RegisteringWithRoom => {
                match placed {
                    Ok(placed_room) => {
                        room = Some(placed_room);
                        advance(&mut state, ClientState::Active, &me);
                    }
                    Err(_) => {
                        warn!(user = %me.user_id, room = %me.room_id, "room placement failed");
                        break;
                    }
                }
            }

            read = timeout(config.pong_wait, reader.read_frame()) => {
                match read {
                    Err(_) => {
                        warn!(user = %me.user_id, "idle-read deadline expired, dropping connection");
                        break;
                    }
                    Ok(Err(err)) => {
                        debug!(user = %me.user_id, %err, "read error");
                        break;
                    }
                    Ok(Ok(Frame::Close)) => {
                        debug!(user = %me.user_id, "peer closed the connection");
                        break;
                    }
                    Ok(Ok(Frame::Pong)) => {
                        // Keepalive response observed; the deadline re-arms
                        // on the next read.
                    }
                    Ok(Ok(Frame::Ping)) => {
                        // The writer owns the socket, so the pong goes
                        // through the outbound queue like everything else.
                        if out_tx.try_send(Frame::Pong).is_err() {
                            warn!(user = %me.user_id, "outbound queue full, dropping pong");
                        }
                    }
                    Ok(Ok(Frame::Text(text))) => {
                        if text.len() > config.max_frame_bytes {
                            warn!(
                                user = %me.user_id,
                                len = text.len(),
                                limit = config.max_frame_bytes,
                                "frame exceeds size limit, dropping connection"
                            );
                            break;
                        }
                        route_frame(&text, room.as_ref(), &me);
                    }
                }
            }
        }
    }

    advance(&mut state, ClientState::Disconnecting, &me);
    match &room {
        Some(room) => room.unregister(me.conn_id),
        None => hub.unregister(&me.room_id, me.conn_id),
    }
    token.cancel();
    advance(&mut state, ClientState::Closed, &me);
    info!(user = %me.user_id, room = %me.room_id, "client disconnected");
}

fn advance(state: &mut ClientState, next: ClientState, me: &ClientHandle) {
    debug!(user = %me.user_id, from = ?state, to = ?next, "client state change");
    *state = next;
}

/// Decodes one inbound frame, overwrites the server-assigned fields, and
/// routes it by type. A bad frame never terminates the connection.
fn route_frame(text: &str, room: Option<&RoomHandle>, me: &ClientHandle) {
    let mut msg: WsMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(user = %me.user_id, %err, raw = text, "dropping malformed frame");
            return;
        }
    };

    // Discard whatever identity the client claimed for itself.
    msg.enrich(&me.user_id, &me.room_id);

    let Some(room) = room else {
        warn!(user = %me.user_id, kind = %msg.kind, "no room assigned yet, dropping message");
        return;
    };

    match msg.kind.clone() {
        MessageType::Chat => {
            // Delivered to the sender too: the server-confirmed timestamp
            // and sender ID double as delivery confirmation.
            room.broadcast(msg);
        }

        MessageType::WebrtcOffer | MessageType::WebrtcAnswer | MessageType::WebrtcCandidate => {
            let payload: SignalPayload = match serde_json::from_value(msg.payload.clone()) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(user = %me.user_id, %err, "dropping signal with undecodable payload");
                    return;
                }
            };

            match payload.target() {
                Some(target) => {
                    let target = target.to_string();
                    // A sender's own candidates are never echoed back, even
                    // when the target names the sender itself.
                    let skip = matches!(msg.kind, MessageType::WebrtcCandidate)
                        .then_some(me.conn_id);
                    debug!(user = %me.user_id, %target, kind = %msg.kind, "unicast signal");
                    room.send_to_user(msg, &target, skip);
                }
                None => {
                    debug!(user = %me.user_id, kind = %msg.kind, "fanning signal to peers");
                    room.broadcast_excluding(msg, me.conn_id);
                }
            }
        }

        other => {
            warn!(user = %me.user_id, kind = %other, "dropping message with unrouted type");
        }
    }
}

/// Pumps the outbound queue onto the connection and keeps the peer alive.
///
/// Sole writer for this socket. Every write is bounded by a short deadline;
/// a timeout or error terminates the writer and, through the connection
/// close, the reader as well.
async fn write_pump<W: FrameWriter>(
    mut writer: W,
    mut out_rx: mpsc::Receiver<Frame>,
    token: CancellationToken,
    user_id: String,
    config: Config,
) {
    let mut ping = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = timeout(config.write_wait, writer.write_frame(Frame::Close)).await;
                break;
            }

            maybe_frame = out_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if !write_with_deadline(&mut writer, frame, config.write_wait, &user_id).await {
                            break;
                        }
                    }
                    None => {
                        // Queue closed: orderly shutdown.
                        let _ = timeout(config.write_wait, writer.write_frame(Frame::Close)).await;
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if !write_with_deadline(&mut writer, Frame::Ping, config.write_wait, &user_id).await {
                    break;
                }
            }
        }
    }

    writer.close().await;
    debug!(user = %user_id, "connection closed");
}

async fn write_with_deadline<W: FrameWriter>(
    writer: &mut W,
    frame: Frame,
    write_wait: Duration,
    user_id: &str,
) -> bool {
    match timeout(write_wait, writer.write_frame(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(user = %user_id, %err, "write error");
            false
        }
        Err(_) => {
            warn!(user = %user_id, "write deadline expired");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(1);
        let a = ClientHandle::new("user1", "room-1", tx.clone());
        let b = ClientHandle::new("user1", "room-1", tx);
        assert_ne!(a.conn_id(), b.conn_id());
    }

    #[test]
    fn try_deliver_drops_on_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ClientHandle::new("user1", "room-1", tx);

        assert!(handle.try_deliver("one".to_string()));
        assert!(!handle.try_deliver("two".to_string()));

        assert_eq!(rx.try_recv().unwrap(), Frame::Text("one".to_string()));
        assert!(rx.try_recv().is_err());
    }
}
