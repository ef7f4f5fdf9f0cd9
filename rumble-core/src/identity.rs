//! Node and message identity: random node IDs for beacons, content-derived status UIDs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Node ID: random per process, advertised in discovery beacons.
/// Ordering is used to decide which side of a pair dials.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; 16]);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell peers apart in logs.
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Status UID (16 bytes on the wire). Identical content from the same author
/// at the same instant yields the same UID on every device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StatusUid([u8; 16]);

impl StatusUid {
    pub fn derive(author: &str, post: &str, time_of_creation: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"rumble-status-v1");
        hasher.update((author.len() as u32).to_be_bytes());
        hasher.update(author.as_bytes());
        hasher.update((post.len() as u32).to_be_bytes());
        hasher.update(post.as_bytes());
        hasher.update(time_of_creation.to_be_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        StatusUid(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        StatusUid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for StatusUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
