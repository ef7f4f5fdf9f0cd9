//! Discovery framing: length-prefix (4 bytes LE) + bincode payload.

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 64 * 1024; // one UDP datagram

/// Messages exchanged on the discovery multicast group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryMessage {
    /// Periodic announcement: "I'm here, dial me on this TCP port."
    Beacon {
        protocol_version: u8,
        node_id: NodeId,
        listen_port: u16,
    },
    /// Unicast answer to a beacon so the sender learns us without waiting.
    BeaconResponse {
        protocol_version: u8,
        node_id: NodeId,
        listen_port: u16,
    },
}

impl DiscoveryMessage {
    pub fn protocol_version(&self) -> u8 {
        match self {
            DiscoveryMessage::Beacon {
                protocol_version, ..
            }
            | DiscoveryMessage::BeaconResponse {
                protocol_version, ..
            } => *protocol_version,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            DiscoveryMessage::Beacon { node_id, .. }
            | DiscoveryMessage::BeaconResponse { node_id, .. } => *node_id,
        }
    }

    pub fn listen_port(&self) -> u16 {
        match self {
            DiscoveryMessage::Beacon { listen_port, .. }
            | DiscoveryMessage::BeaconResponse { listen_port, .. } => *listen_port,
        }
    }
}

/// One beacon per datagram: little-endian body length, then the bincode body.
pub fn encode_frame(msg: &DiscoveryMessage) -> Result<Vec<u8>, FrameEncodeError> {
    let body_len = bincode::serialized_size(msg)?;
    if body_len > u64::from(MAX_FRAME_LEN) {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut frame = (body_len as u32).to_le_bytes().to_vec();
    bincode::serialize_into(&mut frame, msg)?;
    Ok(frame)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("beacon encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("beacon exceeds {} bytes", MAX_FRAME_LEN)]
    TooLarge,
}

/// Parse the frame at the start of `bytes`. Returns the beacon and how many
/// bytes it occupied; trailing bytes are left to the caller.
pub fn decode_frame(bytes: &[u8]) -> Result<(DiscoveryMessage, usize), FrameDecodeError> {
    let (prefix, rest) = bytes
        .split_first_chunk::<LEN_SIZE>()
        .ok_or(FrameDecodeError::NeedMore)?;
    let body_len = u32::from_le_bytes(*prefix);
    if body_len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    let body = rest
        .get(..body_len as usize)
        .ok_or(FrameDecodeError::NeedMore)?;
    Ok((bincode::deserialize(body)?, LEN_SIZE + body.len()))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("datagram ends before the declared frame")]
    NeedMore,
    #[error("declared frame exceeds {} bytes", MAX_FRAME_LEN)]
    TooLarge,
    #[error("beacon body undecodable: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    fn sample_beacon() -> DiscoveryMessage {
        DiscoveryMessage::Beacon {
            protocol_version: PROTOCOL_VERSION,
            node_id: NodeId::generate(),
            listen_port: 45678,
        }
    }

    #[test]
    fn beacon_frame_decodes() {
        let msg = sample_beacon();
        let frame = encode_frame(&msg).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, msg);
        assert_eq!(decoded.listen_port(), 45678);
    }

    #[test]
    fn truncated_datagram_needs_more() {
        let frame = encode_frame(&sample_beacon()).unwrap();
        assert!(matches!(decode_frame(&frame[..2]), Err(FrameDecodeError::NeedMore)));
        assert!(matches!(
            decode_frame(&frame[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut frame = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        frame.extend_from_slice(&[0u8; 8]);
        assert!(matches!(decode_frame(&frame), Err(FrameDecodeError::TooLarge)));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let mut frame = 3u32.to_le_bytes().to_vec();
        frame.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(decode_frame(&frame), Err(FrameDecodeError::Decode(_))));
    }
}
