//! The hub actor: top-level registry mapping room IDs to room loops.
//!
//! The hub's command loop is the only mutator of the room index. A narrow
//! read/write lock exists solely so callers outside the core can do point
//! lookups; every insert and remove happens inside [`Hub::run`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, ConnId};
use crate::room::{self, RoomHandle};

pub(crate) enum HubCommand {
    /// Place a client into the room named by its room ID, creating the room
    /// if this is its first member.
    Register {
        client: ClientHandle,
        placed_tx: oneshot::Sender<RoomHandle>,
    },
    /// A client disconnected before its room hand-off completed.
    Unregister { room_id: String, conn_id: ConnId },
    /// A room's membership returned to zero.
    RoomEmpty { room_id: String },
}

type RoomIndex = Arc<RwLock<HashMap<String, RoomHandle>>>;

/// The hub actor. Construct with [`Hub::new`], then spawn [`Hub::run`].
pub struct Hub {
    cmd_rx: mpsc::UnboundedReceiver<HubCommand>,
    /// Weak so the hub cannot keep its own channel open: once every
    /// [`HubHandle`] is dropped and the last room has closed, `run` ends.
    cmd_tx: mpsc::WeakUnboundedSender<HubCommand>,
    rooms: RoomIndex,
}

/// Cloneable handle for registering clients and looking up rooms.
#[derive(Debug, Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
    rooms: RoomIndex,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let rooms: RoomIndex = Arc::new(RwLock::new(HashMap::new()));
        let hub = Hub {
            cmd_rx,
            cmd_tx: cmd_tx.downgrade(),
            rooms: Arc::clone(&rooms),
        };
        (hub, HubHandle { cmd_tx, rooms })
    }

    /// Processes commands until every handle is dropped and all rooms have
    /// closed.
    pub async fn run(mut self) {
        info!("hub started");
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                HubCommand::Register { client, placed_tx } => self.register(client, placed_tx),
                HubCommand::Unregister { room_id, conn_id } => self.unregister(&room_id, conn_id),
                HubCommand::RoomEmpty { room_id } => self.reap_if_empty(&room_id).await,
            }
        }
        debug!("hub stopped");
    }

    fn register(&self, client: ClientHandle, placed_tx: oneshot::Sender<RoomHandle>) {
        let room_id = client.room_id().to_string();
        let existing = self.rooms.read().unwrap().get(&room_id).cloned();

        let room = match existing {
            Some(room) => room,
            None => {
                let Some(hub_tx) = self.cmd_tx.upgrade() else {
                    warn!(room = %room_id, "hub shutting down, dropping registration");
                    return;
                };
                info!(room = %room_id, "room does not exist, creating");
                let room = room::spawn(room_id.clone(), hub_tx);
                self.rooms.write().unwrap().insert(room_id, room.clone());
                room
            }
        };

        // Fire-and-forget: the room loop completes the hand-off on its own.
        room.register(client, placed_tx);
    }

    fn unregister(&self, room_id: &str, conn_id: ConnId) {
        match self.rooms.read().unwrap().get(room_id) {
            Some(room) => room.unregister(conn_id),
            None => debug!(room = %room_id, conn_id, "unregister for unindexed room, ignoring"),
        }
    }

    /// Deletes a room only after re-confirming zero members at processing
    /// time. A registration forwarded before this check was queued ahead of
    /// the member query on the room's ordered channel, so it is always
    /// counted.
    async fn reap_if_empty(&self, room_id: &str) {
        let room = self.rooms.read().unwrap().get(room_id).cloned();
        let Some(room) = room else {
            return;
        };

        let members = room.members().await.unwrap_or_default();
        if members.is_empty() {
            self.rooms.write().unwrap().remove(room_id);
            room.close();
            info!(room = %room_id, "removed empty room");
        } else {
            debug!(room = %room_id, members = members.len(), "room repopulated before cleanup, keeping");
        }
    }
}

impl HubHandle {
    /// Submits a client for placement into the room named by its room ID.
    ///
    /// The returned channel resolves with the room's handle once the room
    /// loop has added the client; it errs if the hub or room is gone.
    pub fn register(&self, client: ClientHandle) -> oneshot::Receiver<RoomHandle> {
        let (placed_tx, placed_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HubCommand::Register { client, placed_tx })
            .is_err()
        {
            warn!("hub is no longer running, dropping registration");
        }
        placed_rx
    }

    /// Unregisters a client that never completed its room hand-off. A no-op
    /// if the room is not indexed.
    pub fn unregister(&self, room_id: &str, conn_id: ConnId) {
        if self
            .cmd_tx
            .send(HubCommand::Unregister {
                room_id: room_id.to_string(),
                conn_id,
            })
            .is_err()
        {
            debug!(room = %room_id, "hub is no longer running, dropping unregister");
        }
    }

    /// Concurrent-safe point lookup, usable outside the core.
    pub fn lookup(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().unwrap().get(room_id).cloned()
    }
}
