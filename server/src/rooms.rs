//! Room membership and scoped fan-out.
//!
//! Each connected session has a bounded outbound queue drained by its
//! connection task. Broadcasting serializes the event once and pushes the same
//! frame onto every matching queue, so no socket I/O happens while the caller
//! holds state. A session whose queue is full misses frames until its writer
//! catches up.

use crate::auth::Role;
use log::{debug, error, warn};
use serde::Serialize;
use shared::{encode_event, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

/// A serialized event envelope ready to be written to a socket.
pub type OutboundFrame = Arc<str>;

/// Frames a session may have waiting before new ones are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Avatar,
    Camera,
    Controller,
}

impl Room {
    pub fn name(self) -> &'static str {
        match self {
            Room::Avatar => "CLIENT",
            Room::Camera => "CAM",
            Room::Controller => "MIDI",
        }
    }

    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Avatar => Room::Avatar,
            Role::Camera => Room::Camera,
            Role::Controller => Room::Controller,
        }
    }
}

struct Member {
    rooms: HashSet<Room>,
    sender: Sender<OutboundFrame>,
}

impl Member {
    fn push(&self, session: &SessionId, event: &str, frame: OutboundFrame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}; dropping '{}'", session, event);
                false
            }
            // Writer already gone; the disconnect message is on its way
            Err(TrySendError::Closed(_)) => {
                debug!("Dropping '{}' for closed session {}", event, session);
                false
            }
        }
    }
}

#[derive(Default)]
pub struct RoomRouter {
    members: HashMap<SessionId, Member>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session's outbound queue. It belongs to no room yet.
    pub fn connect(&mut self, session: SessionId, sender: Sender<OutboundFrame>) {
        self.members.insert(
            session,
            Member {
                rooms: HashSet::new(),
                sender,
            },
        );
    }

    /// Returns false if the session is not connected.
    pub fn join(&mut self, session: &SessionId, room: Room) -> bool {
        match self.members.get_mut(session) {
            Some(member) => {
                member.rooms.insert(room);
                true
            }
            None => false,
        }
    }

    /// Drops the session from every room.
    pub fn leave(&mut self, session: &SessionId) -> bool {
        self.members.remove(session).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sends to every session joined to at least one room in `rooms`.
    ///
    /// Returns the number of sessions the event was queued for.
    pub fn broadcast<T>(&self, rooms: &[Room], event: &str, data: &T) -> usize
    where
        T: Serialize + ?Sized,
    {
        self.fan_out(event, data, |member| {
            rooms.iter().any(|room| member.rooms.contains(room))
        })
    }

    /// Sends to every connected session regardless of room.
    pub fn broadcast_all<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> usize {
        self.fan_out(event, data, |_| true)
    }

    pub fn send_to<T>(&self, session: &SessionId, event: &str, data: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(member) = self.members.get(session) else {
            return false;
        };
        match encode_event(event, data) {
            Ok(frame) => member.push(session, event, Arc::from(frame)),
            Err(e) => {
                error!("Failed to serialize '{}' event: {}", event, e);
                false
            }
        }
    }

    fn fan_out<T, F>(&self, event: &str, data: &T, selected: F) -> usize
    where
        T: Serialize + ?Sized,
        F: Fn(&Member) -> bool,
    {
        let frame: OutboundFrame = match encode_event(event, data) {
            Ok(frame) => Arc::from(frame),
            Err(e) => {
                error!("Failed to serialize '{}' event: {}", event, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for (session, member) in &self.members {
            if !selected(member) {
                continue;
            }
            if member.push(session, event, Arc::clone(&frame)) {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Envelope;
    use tokio::sync::mpsc::{channel, Receiver};

    fn session(n: u8) -> SessionId {
        SessionId::from_bytes(&[b'a' + n; 20]).unwrap()
    }

    fn member(
        router: &mut RoomRouter,
        n: u8,
        room: Option<Room>,
    ) -> (SessionId, Receiver<OutboundFrame>) {
        let (tx, rx) = channel(OUTBOUND_QUEUE_CAPACITY);
        let id = session(n);
        router.connect(id.clone(), tx);
        if let Some(room) = room {
            router.join(&id, room);
        }
        (id, rx)
    }

    fn events(rx: &mut Receiver<OutboundFrame>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[test]
    fn test_broadcast_reaches_exactly_the_room_set() {
        let mut router = RoomRouter::new();
        let (_, mut avatar) = member(&mut router, 0, Some(Room::Avatar));
        let (_, mut camera) = member(&mut router, 1, Some(Room::Camera));
        let (_, mut controller) = member(&mut router, 2, Some(Room::Controller));
        let (_, mut lobby) = member(&mut router, 3, None);

        let sent = router.broadcast(&[Room::Avatar, Room::Camera], "kinectTransform", "{}");
        assert_eq!(sent, 2);
        assert_eq!(events(&mut avatar).len(), 1);
        assert_eq!(events(&mut camera).len(), 1);
        assert!(events(&mut controller).is_empty());
        assert!(events(&mut lobby).is_empty());
    }

    #[test]
    fn test_member_of_two_rooms_gets_one_copy() {
        let mut router = RoomRouter::new();
        let (id, mut rx) = member(&mut router, 0, Some(Room::Avatar));
        router.join(&id, Room::Camera);

        router.broadcast(&[Room::Avatar, Room::Camera], "x", &1);
        assert_eq!(events(&mut rx).len(), 1);
    }

    #[test]
    fn test_broadcast_all_and_send_to() {
        let mut router = RoomRouter::new();
        let (a, mut rx_a) = member(&mut router, 0, Some(Room::Avatar));
        let (_, mut rx_b) = member(&mut router, 1, None);

        assert_eq!(router.broadcast_all("door-on", &127u8), 2);
        assert!(router.send_to(&a, "session", a.as_str()));

        let got_a = events(&mut rx_a);
        assert_eq!(got_a.len(), 2);
        assert_eq!(got_a[0].data, 127);
        assert_eq!(got_a[1].event, "session");
        assert_eq!(events(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_leave_stops_delivery() {
        let mut router = RoomRouter::new();
        let (id, mut rx) = member(&mut router, 0, Some(Room::Avatar));

        assert!(router.leave(&id));
        assert!(!router.leave(&id));
        assert!(!router.join(&id, Room::Avatar));
        assert_eq!(router.broadcast(&[Room::Avatar], "x", &0), 0);
        assert!(events(&mut rx).is_empty());
        assert!(router.is_empty());
    }

    #[test]
    fn test_closed_receiver_not_counted() {
        let mut router = RoomRouter::new();
        let (_, rx) = member(&mut router, 0, Some(Room::Avatar));
        drop(rx);
        assert_eq!(router.broadcast(&[Room::Avatar], "x", &0), 0);
    }

    #[test]
    fn test_full_queue_drops_instead_of_growing() {
        let mut router = RoomRouter::new();
        let (id, mut stalled) = member(&mut router, 0, Some(Room::Avatar));
        let (_, mut healthy) = member(&mut router, 1, Some(Room::Avatar));

        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            assert_eq!(router.broadcast(&[Room::Avatar], "updatePositions", &i), 2);
            events(&mut healthy);
        }
        // The stalled session's queue is full; only the healthy one gets more
        assert_eq!(router.broadcast(&[Room::Avatar], "updatePositions", &0), 1);
        assert!(!router.send_to(&id, "session", "x"));

        assert_eq!(events(&mut stalled).len(), OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(events(&mut healthy).len(), 1);

        // Draining frees room for new frames
        assert_eq!(router.broadcast(&[Room::Avatar], "updatePositions", &1), 2);
        assert_eq!(events(&mut stalled).len(), 1);
    }

    #[test]
    fn test_room_for_role() {
        assert_eq!(Room::for_role(Role::Avatar).name(), "CLIENT");
        assert_eq!(Room::for_role(Role::Camera).name(), "CAM");
        assert_eq!(Room::for_role(Role::Controller).name(), "MIDI");
    }
}
