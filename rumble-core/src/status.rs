//! Message records carried by the stack: Rumble statuses and Firechat chat lines.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::StatusUid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A status: short post disseminated epidemically between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub uid: StatusUid,
    pub author: String,
    pub post: String,
    pub hashtags: BTreeSet<String>,
    /// Milliseconds since the Unix epoch.
    pub time_of_creation: u64,
    pub hop_count: u8,
    /// Times this device has pushed the status to a peer. Local only.
    pub replication: u32,
    pub like: u16,
    /// Lifetime in hours after creation; 0 never expires.
    pub ttl: u8,
    /// Link-layer addresses of the peers this status arrived from.
    pub forwarders: Vec<String>,
}

impl StatusMessage {
    /// New local status created now.
    pub fn new(author: impl Into<String>, post: impl Into<String>) -> Self {
        Self::with_time(author, post, now_millis())
    }

    pub fn with_time(author: impl Into<String>, post: impl Into<String>, time_of_creation: u64) -> Self {
        let author = author.into();
        let post = post.into();
        let uid = StatusUid::derive(&author, &post, time_of_creation);
        let hashtags = extract_hashtags(&post);
        Self {
            uid,
            author,
            post,
            hashtags,
            time_of_creation,
            hop_count: 0,
            replication: 0,
            like: 0,
            ttl: 0,
            forwarders: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl_hours: u8) -> Self {
        self.ttl = ttl_hours;
        self
    }

    /// True once the TTL has elapsed at `now` (milliseconds).
    pub fn is_expired(&self, now: u64) -> bool {
        is_expired(self.time_of_creation, self.ttl, now)
    }

    /// Record the peer this copy was received from, once.
    pub fn add_forwarder(&mut self, address: &str) {
        if !self.forwarders.iter().any(|f| f == address) {
            self.forwarders.push(address.to_string());
        }
    }
}

pub(crate) fn is_expired(time_of_creation: u64, ttl_hours: u8, now: u64) -> bool {
    if ttl_hours == 0 {
        return false;
    }
    let lifetime = u64::from(ttl_hours) * 3_600_000;
    now.saturating_sub(time_of_creation) > lifetime
}

/// `#words` in a post, lowercased, without trailing punctuation.
pub fn extract_hashtags(post: &str) -> BTreeSet<String> {
    post.split_whitespace()
        .filter_map(|word| word.strip_prefix('#'))
        .map(|tag| tag.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("#{}", tag.to_lowercase()))
        .collect()
}

/// Firechat chat line. Field names follow the JSON wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "firechat")]
    pub room: String,
    #[serde(rename = "name")]
    pub author: String,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(rename = "t")]
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(room: impl Into<String>, author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room: room.into(),
            author: author.into(),
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtags_are_extracted_and_normalised() {
        let tags = extract_hashtags("Flooding near #Bridge, stay safe! #help #help #_ok #");
        let tags: Vec<_> = tags.into_iter().collect();
        assert_eq!(tags, vec!["#_ok", "#bridge", "#help"]);
    }

    #[test]
    fn new_status_derives_uid_and_tags() {
        let s = StatusMessage::with_time("alice", "meet at #square", 42);
        assert_eq!(s.uid, StatusUid::derive("alice", "meet at #square", 42));
        assert!(s.hashtags.contains("#square"));
        assert_eq!(s.hop_count, 0);
        assert!(s.forwarders.is_empty());
    }

    #[test]
    fn ttl_zero_never_expires() {
        let s = StatusMessage::with_time("a", "b", 0);
        assert!(!s.is_expired(u64::MAX));
    }

    #[test]
    fn ttl_expiry_in_hours() {
        let s = StatusMessage::with_time("a", "b", 0).with_ttl(2);
        assert!(!s.is_expired(2 * 3_600_000));
        assert!(s.is_expired(2 * 3_600_000 + 1));
    }

    #[test]
    fn forwarders_are_not_duplicated() {
        let mut s = StatusMessage::with_time("a", "b", 0);
        s.add_forwarder("10.0.0.2:7963");
        s.add_forwarder("10.0.0.2:7963");
        assert_eq!(s.forwarders.len(), 1);
    }

    #[test]
    fn chat_message_json_field_names() {
        let msg = ChatMessage {
            id: "id-1".into(),
            room: "#Nearby".into(),
            author: "bob".into(),
            message: "hi".into(),
            timestamp: 7,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["firechat"], "#Nearby");
        assert_eq!(json["name"], "bob");
        assert_eq!(json["msg"], "hi");
        assert_eq!(json["uuid"], "id-1");
        assert_eq!(json["t"], 7);
    }
}
