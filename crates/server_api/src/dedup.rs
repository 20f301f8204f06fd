use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use shared::{
    domain::{ChatId, UserId},
    protocol::MessagePayload,
};
use tokio::{sync::watch, time::Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SendKey {
    sender: UserId,
    chat: ChatId,
    client_temp_id: String,
}

struct Entry {
    claimed_at: Instant,
    outcome: watch::Receiver<Option<MessagePayload>>,
}

type Entries = Arc<Mutex<HashMap<SendKey, Entry>>>;

/// Remembers which `(sender, chat, client_temp_id)` sends were persisted
/// recently, so a message retried over the HTTP fallback after a slow
/// realtime ack is stored once.
#[derive(Clone)]
pub struct RecentSends {
    window: Duration,
    entries: Entries,
}

pub enum Claim {
    /// Caller should persist the message and then complete the ticket.
    Fresh(SendTicket),
    /// Same send already persisted inside the window.
    Duplicate(MessagePayload),
}

impl RecentSends {
    /// A zero window disables deduplication.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn claim(
        &self,
        sender: UserId,
        chat: ChatId,
        client_temp_id: Option<&str>,
    ) -> Claim {
        let Some(temp_id) = client_temp_id.filter(|id| !id.is_empty()) else {
            return Claim::Fresh(SendTicket::untracked());
        };
        if self.window.is_zero() {
            return Claim::Fresh(SendTicket::untracked());
        }
        let key = SendKey {
            sender,
            chat,
            client_temp_id: temp_id.to_string(),
        };

        loop {
            let mut outcome = {
                let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                let now = Instant::now();
                let window = self.window;
                entries.retain(|_, entry| {
                    entry.outcome.borrow().is_none()
                        || now.duration_since(entry.claimed_at) <= window
                });

                match entries.get(&key) {
                    Some(entry) => entry.outcome.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(
                            key.clone(),
                            Entry {
                                claimed_at: now,
                                outcome: rx,
                            },
                        );
                        return Claim::Fresh(SendTicket {
                            tracked: Some(Tracked {
                                key,
                                entries: self.entries.clone(),
                                outcome: tx,
                            }),
                        });
                    }
                }
            };

            // Another attempt with the same temp id is in flight; wait for it.
            loop {
                if let Some(message) = outcome.borrow().clone() {
                    return Claim::Duplicate(message);
                }
                if outcome.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

struct Tracked {
    key: SendKey,
    entries: Entries,
    outcome: watch::Sender<Option<MessagePayload>>,
}

/// Holds a claimed send slot. Dropping it without [`SendTicket::complete`]
/// releases the slot so a retry can persist.
pub struct SendTicket {
    tracked: Option<Tracked>,
}

impl SendTicket {
    fn untracked() -> Self {
        Self { tracked: None }
    }

    pub fn complete(mut self, message: &MessagePayload) {
        if let Some(tracked) = self.tracked.take() {
            tracked.outcome.send_replace(Some(message.clone()));
        }
    }
}

impl Drop for SendTicket {
    fn drop(&mut self) {
        if let Some(tracked) = self.tracked.take() {
            tracked
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&tracked.key);
        }
    }
}
