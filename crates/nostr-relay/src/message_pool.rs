//! Single inbound queue shared by every relay connection a manager holds.
//!
//! Mirrors one lock guarding four FIFOs (events, notices, EOSE, OK receipts)
//! plus a dedup set keyed by `(subscription_id, event_id)` — a relay that
//! re-sends the same event for the same subscription (common after a
//! reconnect replays a REQ) should not be delivered to the caller twice.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use nostr_core::Event;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
pub struct EventMessage {
    pub subscription_id: String,
    pub event: Event,
}

#[derive(Debug, Clone)]
pub struct NoticeMessage {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EoseMessage {
    pub subscription_id: String,
}

#[derive(Debug, Clone)]
pub struct OkMessage {
    pub event_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Default)]
struct Queues {
    events: VecDeque<EventMessage>,
    notices: VecDeque<NoticeMessage>,
    eose: VecDeque<EoseMessage>,
    ok: VecDeque<OkMessage>,
    seen: HashSet<(String, String)>,
}

/// Thread-safe inbound message pool. Cheaply `Clone`able — every clone
/// shares the same underlying queues.
#[derive(Clone)]
pub struct MessagePool {
    queues: Arc<Mutex<Queues>>,
    notify: Arc<Notify>,
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePool {
    pub fn new() -> Self {
        MessagePool {
            queues: Arc::new(Mutex::new(Queues::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Parses one relay frame (`["EVENT", sub_id, event]`, `["NOTICE", msg]`,
    /// `["EOSE", sub_id]`, or `["OK", event_id, success, msg]`) and files it
    /// into the matching queue. A frame whose first element is array/tag
    /// shaped but names a type this pool doesn't recognize is dropped
    /// silently, matching a relay sending a message type from a newer NIP
    /// this client doesn't implement yet.
    pub async fn process_message(&self, subscription_id_hint: Option<&str>, raw: &Value) -> Result<()> {
        let frame = raw
            .as_array()
            .ok_or_else(|| RelayError::InvalidMessage("relay message must be a JSON array".into()))?;
        let tag = frame
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidMessage("relay message missing type tag".into()))?;

        match nostr_core::RelayMessageType::parse(tag) {
            Some(nostr_core::RelayMessageType::Event) => {
                let subscription_id = frame
                    .get(1)
                    .and_then(Value::as_str)
                    .or(subscription_id_hint)
                    .ok_or_else(|| RelayError::InvalidMessage("EVENT frame missing subscription id".into()))?
                    .to_string();
                let event_value = frame
                    .get(2)
                    .ok_or_else(|| RelayError::InvalidMessage("EVENT frame missing event body".into()))?;
                let event = nostr_core::Event::from_dict(event_value)?;
                self.add_event(subscription_id, event).await;
            }
            Some(nostr_core::RelayMessageType::Notice) => {
                let message = frame.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                self.add_notice(message).await;
            }
            Some(nostr_core::RelayMessageType::Eose) => {
                let subscription_id = frame.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                self.add_eose(subscription_id).await;
            }
            Some(nostr_core::RelayMessageType::Ok) => {
                let event_id = frame.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
                let success = frame.get(2).and_then(Value::as_bool).unwrap_or(false);
                let message = frame.get(3).and_then(Value::as_str).unwrap_or_default().to_string();
                self.add_ok(event_id, success, message).await;
            }
            None => {
                debug!(tag, "message pool: dropping frame of unrecognized relay message type");
            }
        }
        Ok(())
    }

    pub async fn add_event(&self, subscription_id: String, event: Event) {
        let mut queues = self.queues.lock().await;
        let key = (subscription_id.clone(), event.id());
        if queues.seen.insert(key) {
            queues.events.push_back(EventMessage { subscription_id, event });
            self.notify.notify_waiters();
        }
    }

    pub async fn add_notice(&self, message: String) {
        let mut queues = self.queues.lock().await;
        queues.notices.push_back(NoticeMessage { message });
        self.notify.notify_waiters();
    }

    pub async fn add_eose(&self, subscription_id: String) {
        let mut queues = self.queues.lock().await;
        queues.eose.push_back(EoseMessage { subscription_id });
        self.notify.notify_waiters();
    }

    pub async fn add_ok(&self, event_id: String, success: bool, message: String) {
        let mut queues = self.queues.lock().await;
        queues.ok.push_back(OkMessage { event_id, success, message });
        self.notify.notify_waiters();
    }

    pub async fn has_events(&self) -> bool {
        !self.queues.lock().await.events.is_empty()
    }

    pub async fn has_notices(&self) -> bool {
        !self.queues.lock().await.notices.is_empty()
    }

    pub async fn has_eose(&self) -> bool {
        !self.queues.lock().await.eose.is_empty()
    }

    pub async fn has_ok(&self) -> bool {
        !self.queues.lock().await.ok.is_empty()
    }

    /// Blocks until an event is available, then pops and returns it.
    pub async fn get_event(&self) -> EventMessage {
        loop {
            {
                let mut queues = self.queues.lock().await;
                if let Some(msg) = queues.events.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn get_notice(&self) -> NoticeMessage {
        loop {
            {
                let mut queues = self.queues.lock().await;
                if let Some(msg) = queues.notices.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn get_eose(&self) -> EoseMessage {
        loop {
            {
                let mut queues = self.queues.lock().await;
                if let Some(msg) = queues.eose.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn get_ok(&self) -> OkMessage {
        loop {
            {
                let mut queues = self.queues.lock().await;
                if let Some(msg) = queues.ok.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drains every queued event without blocking, in FIFO order. Does not
    /// touch notices/EOSE/OK.
    pub async fn get_all(&self) -> Vec<EventMessage> {
        let mut queues = self.queues.lock().await;
        queues.events.drain(..).collect()
    }
}
