//! The room actor: one command loop per room, sole owner of the member set.
//!
//! Every membership change and every broadcast for a room flows through the
//! same channel, so events apply in exactly the order they arrive and a
//! broadcast can never observe a half-applied add or remove.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, ConnId};
use crate::error::RelayError;
use crate::hub::HubCommand;
use crate::model::message::{MessageType, WsMessage};
use crate::model::payload::SystemPayload;

const USER_JOINED: &str = "user_joined_room";
const USER_LEFT: &str = "user_left_room";

pub(crate) enum RoomCommand {
    Register {
        client: ClientHandle,
        placed_tx: oneshot::Sender<RoomHandle>,
    },
    Unregister {
        conn_id: ConnId,
    },
    Broadcast {
        msg: WsMessage,
    },
    BroadcastExcluding {
        msg: WsMessage,
        skip: ConnId,
    },
    SendToUser {
        msg: WsMessage,
        user_id: String,
        skip: Option<ConnId>,
    },
    Members {
        reply: oneshot::Sender<Vec<String>>,
    },
    Close,
}

/// Cheap handle for sending commands to one room's loop.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: String,
    cmd_tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> &str {
        &self.room_id
    }

    pub(crate) fn register(&self, client: ClientHandle, placed_tx: oneshot::Sender<RoomHandle>) {
        self.send(RoomCommand::Register { client, placed_tx });
    }

    /// Removes a member. A no-op if the connection is not a member.
    pub fn unregister(&self, conn_id: ConnId) {
        self.send(RoomCommand::Unregister { conn_id });
    }

    /// Delivers to every current member, the sender included.
    pub fn broadcast(&self, msg: WsMessage) {
        self.send(RoomCommand::Broadcast { msg });
    }

    /// Delivers to every current member except one connection.
    pub fn broadcast_excluding(&self, msg: WsMessage, skip: ConnId) {
        self.send(RoomCommand::BroadcastExcluding { msg, skip });
    }

    /// Delivers only to members carrying the given user ID, optionally
    /// skipping one connection (so a candidate targeted at its own sender
    /// goes nowhere).
    pub fn send_to_user(&self, msg: WsMessage, user_id: &str, skip: Option<ConnId>) {
        self.send(RoomCommand::SendToUser {
            msg,
            user_id: user_id.to_string(),
            skip,
        });
    }

    /// Current member user IDs, in no particular order.
    pub async fn members(&self) -> Result<Vec<String>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Members { reply });
        rx.await
            .map_err(|_| RelayError::RoomClosed(self.room_id.clone()))
    }

    pub(crate) fn close(&self) {
        self.send(RoomCommand::Close);
    }

    fn send(&self, cmd: RoomCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!(room = %self.room_id, "room loop already stopped, dropping command");
        }
    }
}

struct Room {
    id: String,
    hub_tx: mpsc::UnboundedSender<HubCommand>,
    clients: HashMap<ConnId, ClientHandle>,
    /// Handed back to each registering client as its room back-reference.
    handle: RoomHandle,
    cmd_rx: mpsc::UnboundedReceiver<RoomCommand>,
}

/// Starts the command loop for a new room and returns its handle.
pub(crate) fn spawn(id: String, hub_tx: mpsc::UnboundedSender<HubCommand>) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle = RoomHandle {
        room_id: id.clone(),
        cmd_tx,
    };
    let room = Room {
        id,
        hub_tx,
        clients: HashMap::new(),
        handle: handle.clone(),
        cmd_rx,
    };
    tokio::spawn(room.run());
    handle
}

impl Room {
    async fn run(mut self) {
        info!(room = %self.id, "room started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                RoomCommand::Register { client, placed_tx } => self.register(client, placed_tx),
                RoomCommand::Unregister { conn_id } => self.unregister(conn_id),
                RoomCommand::Broadcast { msg } => self.fan_out(&msg, None, None),
                RoomCommand::BroadcastExcluding { msg, skip } => {
                    self.fan_out(&msg, Some(skip), None);
                }
                RoomCommand::SendToUser { msg, user_id, skip } => {
                    self.fan_out(&msg, skip, Some(&user_id));
                }
                RoomCommand::Members { reply } => {
                    let users = self
                        .clients
                        .values()
                        .map(|c| c.user_id().to_string())
                        .collect();
                    let _ = reply.send(users);
                }
                RoomCommand::Close => {
                    if self.clients.is_empty() {
                        break;
                    }
                    // A close can only arrive from the hub after it confirmed
                    // emptiness, so a populated room here is a bug.
                    warn!(room = %self.id, members = self.clients.len(), "ignoring close for non-empty room");
                }
            }
        }
        debug!(room = %self.id, "room stopped");
    }

    fn register(&mut self, client: ClientHandle, placed_tx: oneshot::Sender<RoomHandle>) {
        let conn_id = client.conn_id();
        let user_id = client.user_id().to_string();
        let newly_joined = !self.clients.contains_key(&conn_id);

        if newly_joined {
            self.clients.insert(conn_id, client);
            info!(room = %self.id, user = %user_id, members = self.clients.len(), "client joined room");
        } else {
            debug!(room = %self.id, user = %user_id, "client already a member, ignoring register");
        }

        if placed_tx.send(self.handle.clone()).is_err() {
            debug!(room = %self.id, user = %user_id, "client gone before placement completed");
        }

        if newly_joined {
            let notice = self.system_message(
                USER_JOINED,
                format!("{user_id} joined the room"),
                &user_id,
            );
            self.fan_out(&notice, Some(conn_id), None);
        }
    }

    fn unregister(&mut self, conn_id: ConnId) {
        let Some(client) = self.clients.remove(&conn_id) else {
            debug!(room = %self.id, conn_id, "unregister for unknown client, ignoring");
            return;
        };

        let user_id = client.user_id().to_string();
        info!(room = %self.id, user = %user_id, members = self.clients.len(), "client left room");

        let notice =
            self.system_message(USER_LEFT, format!("{user_id} left the room"), &user_id);
        self.fan_out(&notice, None, None);

        if self.clients.is_empty()
            && self
                .hub_tx
                .send(HubCommand::RoomEmpty {
                    room_id: self.id.clone(),
                })
                .is_err()
        {
            debug!(room = %self.id, "hub already stopped, empty room will not be reclaimed");
        }
    }

    /// Serializes once and enqueues onto every matching member's outbound
    /// queue. Enqueues never block: a full queue drops the message for that
    /// one member so a slow consumer cannot stall the room.
    fn fan_out(&self, msg: &WsMessage, skip: Option<ConnId>, target_user: Option<&str>) {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(err) => {
                warn!(room = %self.id, %err, "failed to serialize message, dropping");
                return;
            }
        };

        for (conn_id, client) in &self.clients {
            if skip == Some(*conn_id) {
                continue;
            }
            if let Some(user) = target_user {
                if client.user_id() != user {
                    continue;
                }
            }
            if !client.try_deliver(json.clone()) {
                warn!(
                    room = %self.id,
                    user = %client.user_id(),
                    kind = %msg.kind,
                    "outbound queue full, dropping message for this member"
                );
            }
        }
    }

    fn system_message(&self, event: &str, message: String, user_id: &str) -> WsMessage {
        let payload = serde_json::to_value(SystemPayload::new(event, message, user_id))
            .unwrap_or(serde_json::Value::Null);
        WsMessage::server(MessageType::System, payload, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Frame;
    use serde_json::json;

    fn member(user_id: &str) -> (ClientHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (ClientHandle::new(user_id, "test-room", tx), rx)
    }

    fn test_room() -> (RoomHandle, mpsc::UnboundedReceiver<HubCommand>) {
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        (spawn("test-room".to_string(), hub_tx), hub_rx)
    }

    async fn join(room: &RoomHandle, client: ClientHandle) {
        let (placed_tx, placed_rx) = oneshot::channel();
        room.register(client, placed_tx);
        placed_rx.await.expect("placement reply");
    }

    fn try_recv_text(rx: &mut mpsc::Receiver<Frame>) -> Option<WsMessage> {
        match rx.try_recv() {
            Ok(Frame::Text(json)) => Some(serde_json::from_str(&json).unwrap()),
            Ok(frame) => panic!("unexpected frame: {frame:?}"),
            Err(_) => None,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) {
        while rx.try_recv().is_ok() {}
    }

    fn chat(content: &str) -> WsMessage {
        let mut msg = WsMessage::server(
            MessageType::Chat,
            json!({ "content": content }),
            "test-room",
        );
        msg.sender_user_id = "user1".to_string();
        msg
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_noop() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");

        join(&room, client1.clone()).await;
        join(&room, client2).await;
        room.members().await.unwrap(); // flush join notices
        drain(&mut rx1);
        drain(&mut rx2);

        join(&room, client1).await;

        let mut members = room.members().await.unwrap();
        members.sort();
        assert_eq!(members, vec!["user1".to_string(), "user2".to_string()]);
        // A duplicate register announces nobody.
        assert!(try_recv_text(&mut rx1).is_none());
        assert!(try_recv_text(&mut rx2).is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");
        join(&room, client1).await;
        join(&room, client2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        room.broadcast(chat("hello"));
        room.members().await.unwrap(); // flush the loop

        let got1 = try_recv_text(&mut rx1).expect("user1 message");
        let got2 = try_recv_text(&mut rx2).expect("user2 message");
        assert_eq!(got1.kind, MessageType::Chat);
        assert_eq!(got2.sender_user_id, "user1");
    }

    #[tokio::test]
    async fn broadcast_excluding_skips_that_member() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");
        let skip = client1.conn_id();
        join(&room, client1).await;
        join(&room, client2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        room.broadcast_excluding(chat("hello"), skip);
        room.members().await.unwrap();

        assert!(try_recv_text(&mut rx1).is_none());
        assert!(try_recv_text(&mut rx2).is_some());
    }

    #[tokio::test]
    async fn send_to_user_is_unicast() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");
        let (client3, mut rx3) = member("user3");
        join(&room, client1).await;
        join(&room, client2).await;
        join(&room, client3).await;
        drain(&mut rx1);
        drain(&mut rx2);
        drain(&mut rx3);

        room.send_to_user(chat("psst"), "user2", None);
        room.members().await.unwrap();

        assert!(try_recv_text(&mut rx1).is_none());
        assert!(try_recv_text(&mut rx2).is_some());
        assert!(try_recv_text(&mut rx3).is_none());
    }

    #[tokio::test]
    async fn send_to_user_with_skip_delivers_nowhere_when_target_is_skipped() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");
        let skip = client1.conn_id();
        join(&room, client1).await;
        join(&room, client2).await;
        room.members().await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        room.send_to_user(chat("echo"), "user1", Some(skip));
        room.members().await.unwrap();

        assert!(try_recv_text(&mut rx1).is_none());
        assert!(try_recv_text(&mut rx2).is_none());
    }

    #[tokio::test]
    async fn join_notification_goes_to_existing_members_only() {
        let (room, _hub_rx) = test_room();
        let (client1, mut rx1) = member("user1");
        let (client2, mut rx2) = member("user2");
        join(&room, client1).await;
        join(&room, client2).await;

        let notice = try_recv_text(&mut rx1).expect("join notice for user1");
        assert_eq!(notice.kind, MessageType::System);
        assert_eq!(notice.payload["event"], "user_joined_room");
        assert_eq!(notice.payload["userID"], "user2");

        // The joiner itself hears nothing.
        assert!(try_recv_text(&mut rx2).is_none());
    }

    #[tokio::test]
    async fn unregister_empties_room_and_signals_hub() {
        let (room, mut hub_rx) = test_room();
        let (client, _rx) = member("user1");
        let conn_id = client.conn_id();
        join(&room, client).await;

        room.unregister(conn_id);
        assert!(room.members().await.unwrap().is_empty());

        match hub_rx.recv().await {
            Some(HubCommand::RoomEmpty { room_id }) => assert_eq!(room_id, "test-room"),
            other => panic!("expected RoomEmpty, got {:?}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn unregister_unknown_client_is_a_noop() {
        let (room, _hub_rx) = test_room();
        let (client, _rx) = member("user1");
        join(&room, client).await;

        room.unregister(999_999);
        assert_eq!(room.members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_member_only() {
        let (room, _hub_rx) = test_room();
        let (full_tx, mut full_rx) = mpsc::channel(1);
        let full = ClientHandle::new("slow", "test-room", full_tx);
        let (client2, mut rx2) = member("user2");
        join(&room, full).await;
        join(&room, client2).await;
        room.members().await.unwrap(); // flush join notices
        while full_rx.try_recv().is_ok() {}
        drain(&mut rx2);

        // Occupy the slow member's single queue slot.
        room.broadcast(chat("first"));
        room.broadcast(chat("second"));
        room.members().await.unwrap();

        assert!(try_recv_text(&mut full_rx).is_some());
        assert!(try_recv_text(&mut full_rx).is_none());
        // The healthy member got both.
        assert!(try_recv_text(&mut rx2).is_some());
        assert!(try_recv_text(&mut rx2).is_some());
    }
}
