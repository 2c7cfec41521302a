use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;

use crate::events::ServerEvent;

pub type EventSender = UnboundedSender<ServerEvent>;

pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Broadcast groups over attached sockets.
#[derive(Debug, Default)]
pub struct RoomHub {
    outlets: HashMap<String, EventSender>,
    rooms: HashMap<String, HashSet<String>>,
    memberships: HashMap<String, HashSet<String>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, socket_id: &str, outlet: EventSender) {
        self.outlets.insert(socket_id.to_string(), outlet);
    }

    /// Drop the socket's outlet and remove it from every room it joined.
    pub fn detach(&mut self, socket_id: &str) -> Vec<String> {
        self.outlets.remove(socket_id);
        let rooms: Vec<String> = self
            .memberships
            .remove(socket_id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            self.remove_member(room, socket_id);
        }
        rooms
    }

    pub fn join(&mut self, socket_id: &str, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id.to_string());
        self.memberships
            .entry(socket_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    pub fn leave(&mut self, socket_id: &str, room: &str) -> bool {
        if let Some(rooms) = self.memberships.get_mut(socket_id) {
            rooms.remove(room);
        }
        self.remove_member(room, socket_id)
    }

    pub fn is_member(&self, socket_id: &str, room: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(socket_id))
            .unwrap_or(false)
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map(HashSet::len).unwrap_or(0)
    }

    pub fn emit_to(&self, socket_id: &str, event: ServerEvent) {
        if let Some(outlet) = self.outlets.get(socket_id) {
            deliver(socket_id, outlet, event);
        }
    }

    /// Send to every member of `room`, optionally skipping one socket.
    pub fn emit_room(&self, room: &str, event: &ServerEvent, except: Option<&str>) -> usize {
        let Some(members) = self.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for socket_id in members {
            if Some(socket_id.as_str()) == except {
                continue;
            }
            if let Some(outlet) = self.outlets.get(socket_id) {
                deliver(socket_id, outlet, event.clone());
                delivered += 1;
            }
        }
        delivered
    }

    pub fn emit_all(&self, event: &ServerEvent) {
        for (socket_id, outlet) in &self.outlets {
            deliver(socket_id, outlet, event.clone());
        }
    }

    fn remove_member(&mut self, room: &str, socket_id: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(socket_id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }
}

fn deliver(socket_id: &str, outlet: &EventSender, event: ServerEvent) {
    if outlet.send(event).is_err() {
        // Writer already gone; the disconnect path will clean up.
        tracing::debug!(socket_id = %socket_id, "Dropping event for closed socket");
    }
}
