//! The canonical signed event and the encrypted direct message built on top of it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::schnorr;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{NostrError, Result};
use crate::keys::{PublicKey, SecretKey};
use crate::message_type::ClientMessageType;

/// NIP-01 event kinds, with an open-ended escape hatch for kinds this crate
/// doesn't give a name to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Metadata,
    Text,
    RecommendRelay,
    Contacts,
    EncryptedDirectMessage,
    EventDeletion,
    Reaction,
    Custom(u64),
}

impl EventKind {
    pub fn as_u64(self) -> u64 {
        match self {
            EventKind::Metadata => 0,
            EventKind::Text => 1,
            EventKind::RecommendRelay => 2,
            EventKind::Contacts => 3,
            EventKind::EncryptedDirectMessage => 4,
            EventKind::EventDeletion => 5,
            EventKind::Reaction => 7,
            EventKind::Custom(n) => n,
        }
    }

    pub fn from_u64(n: u64) -> Self {
        match n {
            0 => EventKind::Metadata,
            1 => EventKind::Text,
            2 => EventKind::RecommendRelay,
            3 => EventKind::Contacts,
            4 => EventKind::EncryptedDirectMessage,
            5 => EventKind::EventDeletion,
            7 => EventKind::Reaction,
            other => EventKind::Custom(other),
        }
    }
}

/// A Nostr event. `id` and validity of `signature` are never cached: both are
/// recomputed from the current field values whenever asked for, so mutating
/// `tags` or `content` after construction is always reflected immediately.
#[derive(Debug, Clone)]
pub struct Event {
    pub pubkey: String,
    pub created_at: i64,
    pub kind: EventKind,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub signature: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_secs() as i64;
        Event {
            pubkey: String::new(),
            created_at,
            kind,
            tags: Vec::new(),
            content: content.into(),
            signature: None,
        }
    }

    fn serialize_for_id(&self) -> String {
        let value = json!([0, self.pubkey, self.created_at, self.kind.as_u64(), self.tags, self.content]);
        serde_json::to_string(&value).expect("event fields are always valid JSON")
    }

    fn compute_id_bytes(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.serialize_for_id().as_bytes());
        hasher.finalize().into()
    }

    /// The event id, derived fresh from the current field values.
    pub fn compute_id(&self) -> String {
        hex::encode(self.compute_id_bytes())
    }

    /// Alias for [`Event::compute_id`] matching the wire field name.
    pub fn id(&self) -> String {
        self.compute_id()
    }

    /// Sets `pubkey` from `sk` and signs the current id digest.
    pub fn sign(&mut self, sk: &SecretKey) -> Result<()> {
        self.pubkey = sk.public_key().hex();
        let digest = self.compute_id_bytes();
        let signature = sk.sign(&digest);
        self.signature = Some(hex::encode(signature.serialize()));
        Ok(())
    }

    /// Verifies the stored signature against the current id digest and
    /// `pubkey`. Never errors: a malformed signature or key simply fails
    /// to verify.
    pub fn verify(&self) -> bool {
        let Some(sig_hex) = &self.signature else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(sig_hex) else {
            return false;
        };
        let Ok(signature) = schnorr::Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let Ok(pubkey) = PublicKey::from_hex(&self.pubkey) else {
            return false;
        };
        pubkey.verify(&self.compute_id_bytes(), &signature)
    }

    pub fn add_pubkey_ref(&mut self, pubkey: impl Into<String>) {
        self.tags.push(vec!["p".to_string(), pubkey.into()]);
    }

    pub fn add_event_ref(&mut self, event_id: impl Into<String>) {
        self.tags.push(vec!["e".to_string(), event_id.into()]);
    }

    pub fn has_pubkey_ref(&self, pubkey: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.first().map(String::as_str) == Some("p") && t.get(1).map(String::as_str) == Some(pubkey))
    }

    pub fn has_event_ref(&self, event_id: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.first().map(String::as_str) == Some("e") && t.get(1).map(String::as_str) == Some(event_id))
    }

    /// All tags whose first element is `tag_name`, in document order.
    pub fn get_tag_list(&self, tag_name: &str) -> Vec<Vec<String>> {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(tag_name))
            .cloned()
            .collect()
    }

    /// The distinct tag names present, in first-seen order.
    pub fn get_tag_types(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for t in &self.tags {
            if let Some(name) = t.first() {
                if !seen.contains(name) {
                    seen.push(name.clone());
                }
            }
        }
        seen
    }

    pub fn get_tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Groups tags by their first element, keeping every occurrence's
    /// remaining values rather than collapsing to just the first match.
    pub fn get_tag_dict(&self) -> HashMap<String, Vec<Vec<String>>> {
        let mut dict: HashMap<String, Vec<Vec<String>>> = HashMap::new();
        for t in &self.tags {
            if let Some((name, rest)) = t.split_first() {
                dict.entry(name.clone()).or_default().push(rest.to_vec());
            }
        }
        dict
    }

    pub fn to_dict(&self) -> Value {
        json!({
            "id": self.compute_id(),
            "pubkey": self.pubkey,
            "created_at": self.created_at,
            "kind": self.kind.as_u64(),
            "tags": self.tags,
            "content": self.content,
            "sig": self.signature,
        })
    }

    pub fn from_dict(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| NostrError::Decode("event must be a JSON object".into()))?;

        let pubkey = obj
            .get("pubkey")
            .and_then(Value::as_str)
            .ok_or_else(|| NostrError::Decode("missing `pubkey`".into()))?
            .to_string();
        let created_at = obj
            .get("created_at")
            .and_then(Value::as_i64)
            .ok_or_else(|| NostrError::Decode("missing `created_at`".into()))?;
        let kind = obj
            .get("kind")
            .and_then(Value::as_u64)
            .ok_or_else(|| NostrError::Decode("missing `kind`".into()))?;
        let tags = obj
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_array())
                    .map(|t| t.iter().filter_map(|s| s.as_str().map(String::from)).collect())
                    .collect()
            })
            .unwrap_or_default();
        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| NostrError::Decode("missing `content`".into()))?
            .to_string();
        let signature = obj.get("sig").and_then(Value::as_str).map(String::from);

        Ok(Event {
            pubkey,
            created_at,
            kind: EventKind::from_u64(kind),
            tags,
            content,
            signature,
        })
    }

    pub fn to_message(&self) -> Value {
        json!([ClientMessageType::Event.as_str(), self.to_dict()])
    }
}

/// A NIP-04 encrypted direct message. Composes an [`Event`] of kind
/// `EncryptedDirectMessage` rather than subclassing it: the wire shape is the
/// same event, but construction needs the extra recipient/cleartext state
/// until [`EncryptedDirectMessage::encrypt`] folds it into `event.content`.
#[derive(Debug, Clone)]
pub struct EncryptedDirectMessage {
    pub event: Event,
    pub recipient_pubkey: Option<String>,
    pub cleartext_content: Option<String>,
    pub reference_event_id: Option<String>,
}

impl EncryptedDirectMessage {
    pub fn new(
        recipient_pubkey: impl Into<String>,
        cleartext_content: impl Into<String>,
        reference_event_id: Option<String>,
    ) -> Self {
        let recipient_pubkey = recipient_pubkey.into();
        let mut event = Event::new(EventKind::EncryptedDirectMessage, "");
        event.add_pubkey_ref(recipient_pubkey.clone());
        if let Some(ref_id) = &reference_event_id {
            event.add_event_ref(ref_id.clone());
        }

        EncryptedDirectMessage {
            event,
            recipient_pubkey: Some(recipient_pubkey),
            cleartext_content: Some(cleartext_content.into()),
            reference_event_id,
        }
    }

    /// The id is undefined until `encrypt` has populated `event.content`.
    pub fn id(&self) -> Result<String> {
        if self.event.content.is_empty() {
            return Err(NostrError::UndefinedId);
        }
        Ok(self.event.compute_id())
    }

    pub fn encrypt(&mut self, sender_sk: &SecretKey) -> Result<()> {
        let recipient_hex = self.recipient_pubkey.as_ref().ok_or(NostrError::MissingRecipient)?;
        let recipient_pk = PublicKey::from_hex(recipient_hex)?;
        let cleartext = self.cleartext_content.as_deref().unwrap_or("");
        self.event.content = sender_sk.encrypt_message(cleartext, &recipient_pk)?;
        Ok(())
    }

    /// Signing an unencrypted message fails: the wire event must carry
    /// ciphertext in `content`, never the cleartext.
    pub fn sign(&mut self, sk: &SecretKey) -> Result<()> {
        if self.event.content.is_empty() {
            return Err(NostrError::NotEncrypted);
        }
        self.event.sign(sk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_event_deterministic_id() {
        let sk = SecretKey::from_hex("964b29795d621cdacf05fd94fb23206c88742db1fa50b34d7545f3a2221d8124").unwrap();
        let mut event = Event::new(EventKind::Text, "Hello Nostr!");
        event.created_at = 1671406583;
        event.pubkey = sk.public_key().hex();
        assert_eq!(
            event.compute_id(),
            "23411895658d374ec922adf774a70172290b2c738ae67815bd8945e5d8fff3bb"
        );
    }

    #[test]
    fn test_sign_then_verify_succeeds() {
        let sk = SecretKey::generate();
        let mut event = Event::new(EventKind::Text, "hello");
        event.sign(&sk).unwrap();
        assert!(event.verify());
    }

    #[test]
    fn test_verify_fails_on_tampered_content() {
        let sk = SecretKey::generate();
        let mut event = Event::new(EventKind::Text, "hello");
        event.sign(&sk).unwrap();
        event.content = "goodbye".to_string();
        assert!(!event.verify());
    }

    #[test]
    fn test_verify_fails_with_zeroed_signature() {
        let sk = SecretKey::generate();
        let mut event = Event::new(EventKind::Text, "hello");
        event.pubkey = sk.public_key().hex();
        event.signature = Some(hex::encode([0u8; 64]));
        assert!(!event.verify());
    }

    #[test]
    fn test_tag_helpers() {
        let mut event = Event::new(EventKind::Text, "hi");
        event.add_pubkey_ref("abc");
        event.add_event_ref("def");
        assert!(event.has_pubkey_ref("abc"));
        assert!(event.has_event_ref("def"));
        assert_eq!(event.get_tag_count(), 2);
        assert_eq!(event.get_tag_types(), vec!["p".to_string(), "e".to_string()]);
        assert_eq!(event.get_tag_list("p"), vec![vec!["p".to_string(), "abc".to_string()]]);
    }

    #[test]
    fn test_get_tag_dict_groups_by_name() {
        let mut event = Event::new(EventKind::Text, "hi");
        event.add_pubkey_ref("abc");
        event.add_pubkey_ref("xyz");
        let dict = event.get_tag_dict();
        assert_eq!(dict["p"], vec![vec!["abc".to_string()], vec!["xyz".to_string()]]);
    }

    #[test]
    fn test_encrypted_dm_id_undefined_before_encrypt() {
        let dm = EncryptedDirectMessage::new("deadbeef", "Test", None);
        assert!(matches!(dm.id(), Err(NostrError::UndefinedId)));
    }

    #[test]
    fn test_encrypted_dm_sign_requires_encryption() {
        let sk = SecretKey::generate();
        let recipient = SecretKey::generate();
        let mut dm = EncryptedDirectMessage::new(recipient.public_key().hex(), "Test", None);
        assert!(matches!(dm.sign(&sk), Err(NostrError::NotEncrypted)));
    }

    #[test]
    fn test_encrypted_dm_encrypt_then_sign_succeeds() {
        let sender = SecretKey::generate();
        let recipient = SecretKey::generate();
        let mut dm = EncryptedDirectMessage::new(recipient.public_key().hex(), "Test", None);
        dm.encrypt(&sender).unwrap();
        dm.sign(&sender).unwrap();
        assert!(dm.id().is_ok());
        assert!(dm.event.verify());
    }

    #[test]
    fn test_to_dict_from_dict_round_trip() {
        let sk = SecretKey::generate();
        let mut event = Event::new(EventKind::Text, "round trip");
        event.sign(&sk).unwrap();
        let dict = event.to_dict();
        let restored = Event::from_dict(&dict).unwrap();
        assert_eq!(restored.content, event.content);
        assert_eq!(restored.pubkey, event.pubkey);
        assert_eq!(restored.compute_id(), event.compute_id());
    }
}
