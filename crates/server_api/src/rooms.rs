use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use shared::{
    domain::{ChatId, UserId},
    protocol::ServerEvent,
};
use tokio::sync::{broadcast, watch};

const ROOM_CAPACITY: usize = 256;

struct Room {
    events: broadcast::Sender<ServerEvent>,
    /// One revocation switch per subscribed user, shared by all of that
    /// user's connections.
    members: HashMap<UserId, watch::Sender<bool>>,
}

/// Chat session registry: one broadcast room per chat id with live
/// subscribers. Rooms are created on first join and dropped once a publish
/// finds nobody listening.
#[derive(Clone, Default)]
pub struct ChatRooms {
    rooms: Arc<Mutex<HashMap<ChatId, Room>>>,
}

pub struct Subscription {
    pub chat_id: ChatId,
    events: broadcast::Receiver<ServerEvent>,
    revoked: watch::Receiver<bool>,
}

impl Subscription {
    /// Next event for this room, or `None` once the subscription is revoked
    /// or the room is gone.
    pub async fn next(&mut self) -> Option<ServerEvent> {
        loop {
            if *self.revoked.borrow() {
                return None;
            }
            tokio::select! {
                changed = self.revoked.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                event = self.events.recv() => match event {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(chat_id = %self.chat_id, skipped, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    pub fn is_revoked(&self) -> bool {
        is_revoked(&self.revoked)
    }

    pub(crate) fn revocation(&self) -> watch::Receiver<bool> {
        self.revoked.clone()
    }
}

pub(crate) fn is_revoked(revoked: &watch::Receiver<bool>) -> bool {
    *revoked.borrow() || revoked.has_changed().is_err()
}

impl ChatRooms {
    pub fn subscribe(&self, chat_id: ChatId, user_id: UserId) -> Subscription {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let room = rooms.entry(chat_id).or_insert_with(|| Room {
            events: broadcast::channel(ROOM_CAPACITY).0,
            members: HashMap::new(),
        });
        let revoked = room
            .members
            .entry(user_id)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();
        Subscription {
            chat_id,
            events: room.events.subscribe(),
            revoked,
        }
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, chat_id: ChatId, event: ServerEvent) -> usize {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(room) = rooms.get(&chat_id) else {
            return 0;
        };
        match room.events.send(event) {
            Ok(reached) => reached,
            Err(_) => {
                rooms.remove(&chat_id);
                0
            }
        }
    }

    /// Ends every subscription `user_id` holds on the given chats.
    pub fn evict(&self, user_id: UserId, chat_ids: &[ChatId]) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        for chat_id in chat_ids {
            if let Some(room) = rooms.get_mut(chat_id) {
                if let Some(switch) = room.members.remove(&user_id) {
                    switch.send_replace(true);
                }
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use shared::{
        domain::{MessageId, MessageStatus},
        protocol::MessageStatusPayload,
    };

    use super::*;

    fn status(chat_id: ChatId, id: i64) -> ServerEvent {
        ServerEvent::MessageStatus(MessageStatusPayload {
            message_id: MessageId(id),
            chat_id,
            status: MessageStatus::Delivered,
        })
    }

    #[tokio::test]
    async fn publish_reaches_only_that_room() {
        let rooms = ChatRooms::default();
        let mut a = rooms.subscribe(ChatId::Stored(1), UserId(1));
        let mut b = rooms.subscribe(ChatId::Stored(2), UserId(2));

        assert_eq!(rooms.publish(ChatId::Stored(1), status(ChatId::Stored(1), 5)), 1);
        assert_eq!(a.next().await, Some(status(ChatId::Stored(1), 5)));
        assert!(b.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_rooms_are_dropped_on_publish() {
        let rooms = ChatRooms::default();
        drop(rooms.subscribe(ChatId::Stored(1), UserId(1)));
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.publish(ChatId::Stored(1), status(ChatId::Stored(1), 1)), 0);
        assert_eq!(rooms.room_count(), 0);
        assert_eq!(rooms.publish(ChatId::Stored(7), status(ChatId::Stored(7), 1)), 0);
    }

    #[tokio::test]
    async fn eviction_ends_all_connections_of_the_user() {
        let rooms = ChatRooms::default();
        let chat = ChatId::Stored(1);
        let mut first = rooms.subscribe(chat, UserId(1));
        let mut second = rooms.subscribe(chat, UserId(1));
        let mut other = rooms.subscribe(chat, UserId(2));

        rooms.evict(UserId(1), &[chat]);
        assert!(first.is_revoked());
        assert_eq!(first.next().await, None);
        assert_eq!(second.next().await, None);

        rooms.publish(chat, status(chat, 3));
        assert_eq!(other.next().await, Some(status(chat, 3)));

        let mut again = rooms.subscribe(chat, UserId(1));
        assert!(!again.is_revoked());
        rooms.publish(chat, status(chat, 4));
        assert_eq!(again.next().await, Some(status(chat, 4)));
    }
}
