use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::dto::ws::ServerEvent;

/// Identifier of one live WebSocket connection.
pub type ConnectionId = Uuid;

#[derive(Clone, Debug)]
/// Handle used to push frames to a connected client.
pub struct RoomMember {
    /// Player authenticated on the connection.
    pub player_id: Uuid,
    /// Nickname attached to relayed events.
    pub name: String,
    /// Outbound queue drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Process-local room membership, one room per game.
///
/// Rooms are independent: broadcasting to one game never waits on another.
/// Membership is rebuilt by clients on `room:join` and is never authoritative
/// for game outcome.
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<Uuid, DashMap<ConnectionId, RoomMember>>,
}

impl RoomHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to the room of `game_id`, replacing any previous
    /// membership of that connection in the same room.
    pub fn join(&self, game_id: Uuid, connection: ConnectionId, member: RoomMember) {
        self.rooms
            .entry(game_id)
            .or_default()
            .insert(connection, member);
    }

    /// Remove `connection` from the room; empty rooms are dropped.
    pub fn leave(&self, game_id: Uuid, connection: ConnectionId) -> Option<RoomMember> {
        let removed = self
            .rooms
            .get(&game_id)
            .and_then(|room| room.remove(&connection).map(|(_, member)| member));
        self.rooms.remove_if(&game_id, |_, room| room.is_empty());
        removed
    }

    /// Deliver `event` to every member of the room except `exclude`.
    ///
    /// Delivery never blocks: frames are queued on each connection's writer.
    /// Members whose writer is gone are pruned. Returns the number of members
    /// the frame was queued for.
    pub fn broadcast(
        &self,
        game_id: Uuid,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<Message>)> =
            match self.rooms.get(&game_id) {
                Some(room) => room
                    .iter()
                    .filter(|entry| Some(*entry.key()) != exclude)
                    .map(|entry| (*entry.key(), entry.tx.clone()))
                    .collect(),
                None => return 0,
            };

        let message = event.to_message();
        let mut delivered = 0;
        for (connection, tx) in targets {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(%game_id, %connection, event = event.event, "dropping closed room member");
                self.leave(game_id, connection);
            }
        }
        delivered
    }

    /// Close every connection of the room and forget it.
    pub fn close_room(&self, game_id: Uuid) -> usize {
        let Some((_, room)) = self.rooms.remove(&game_id) else {
            return 0;
        };
        let count = room.len();
        for (_, member) in room {
            let _ = member.tx.send(Message::Close(None));
        }
        count
    }

    /// Number of live connections in the room.
    pub fn member_count(&self, game_id: Uuid) -> usize {
        self.rooms.get(&game_id).map_or(0, |room| room.len())
    }
}
