//! Rumble block codec. A block is an 8-byte header followed by its payload,
//! all integers big-endian:
//!
//! ```text
//! 0      1        2      3          4               8
//! +------+--------+------+----------+---------------+---------
//! | type | subtype| flags| reserved | payload length| payload
//! +------+--------+------+----------+---------------+---------
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::identity::StatusUid;
use crate::link::InboundStream;
use crate::protocol::ProtocolError;
use crate::status::StatusMessage;

pub const HEADER_LENGTH: usize = 8;
pub const MAX_PAYLOAD: u32 = 1024 * 1024;
const SKIP_CHUNK: usize = 64 * 1024;

pub const BLOCK_PUSH: u8 = 0x01;
pub const SUBTYPE_HELLO: u8 = 0x01;
pub const SUBTYPE_STATUS: u8 = 0x02;
pub const FLAG_LAST_BLOCK: u8 = 0x01;

// uid, author len, post len, toc, score, hop, ttl
const STATUS_FIXED: usize = 16 + 1 + 2 + 8 + 2 + 1 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: u8,
    pub subtype: u8,
    pub flags: u8,
    pub length: u32,
}

impl BlockHeader {
    pub fn push(subtype: u8, length: u32) -> Self {
        Self {
            block_type: BLOCK_PUSH,
            subtype,
            flags: FLAG_LAST_BLOCK,
            length,
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST_BLOCK != 0
    }

    fn put(&self, out: &mut BytesMut) {
        out.put_u8(self.block_type);
        out.put_u8(self.subtype);
        out.put_u8(self.flags);
        out.put_u8(0);
        out.put_u32(self.length);
    }

    /// Parse a header and enforce the payload cap. Type and subtype are
    /// checked later, once the payload has been consumed, so the stream stays
    /// aligned on the next block.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = Self::parse(buf)?;
        if header.length > MAX_PAYLOAD {
            return Err(ProtocolError::TooLarge(header.length));
        }
        Ok(header)
    }

    fn parse(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LENGTH {
            return Err(ProtocolError::MalformedPacket(format!(
                "header has {} bytes, need {HEADER_LENGTH}",
                buf.len()
            )));
        }
        let block_type = buf.get_u8();
        let subtype = buf.get_u8();
        let flags = buf.get_u8();
        let _reserved = buf.get_u8();
        let length = buf.get_u32();
        Ok(Self {
            block_type,
            subtype,
            flags,
            length,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Sent once when a channel connects. Any payload is ignored.
    Hello,
    Status(StatusMessage),
}

impl Block {
    pub fn decode(header: &BlockHeader, payload: &[u8]) -> Result<Self, ProtocolError> {
        if header.block_type != BLOCK_PUSH {
            return Err(ProtocolError::UnknownBlockType(header.block_type));
        }
        if payload.len() != header.length as usize {
            return Err(ProtocolError::BufferMismatch {
                expected: header.length as usize,
                actual: payload.len(),
            });
        }
        match header.subtype {
            SUBTYPE_HELLO => Ok(Block::Hello),
            SUBTYPE_STATUS => decode_status(payload).map(Block::Status),
            other => Err(ProtocolError::UnknownSubtype(other)),
        }
    }
}

pub fn encode_hello() -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LENGTH);
    BlockHeader::push(SUBTYPE_HELLO, 0).put(&mut out);
    out.freeze()
}

pub fn encode_status(status: &StatusMessage) -> Result<Bytes, ProtocolError> {
    let author = status.author.as_bytes();
    let post = status.post.as_bytes();
    if author.len() > u8::MAX as usize {
        return Err(ProtocolError::FieldTooLong {
            field: "author",
            len: author.len(),
            max: u8::MAX as usize,
        });
    }
    if post.len() > u16::MAX as usize {
        return Err(ProtocolError::FieldTooLong {
            field: "post",
            len: post.len(),
            max: u16::MAX as usize,
        });
    }
    let length = STATUS_FIXED + author.len() + post.len();
    let mut out = BytesMut::with_capacity(HEADER_LENGTH + length);
    BlockHeader::push(SUBTYPE_STATUS, length as u32).put(&mut out);
    out.put_slice(status.uid.as_bytes());
    out.put_u8(author.len() as u8);
    out.put_slice(author);
    out.put_u16(post.len() as u16);
    out.put_slice(post);
    out.put_u64(status.time_of_creation);
    out.put_u16(status.like);
    out.put_u8(status.hop_count);
    out.put_u8(status.ttl);
    Ok(out.freeze())
}

fn decode_status(payload: &[u8]) -> Result<StatusMessage, ProtocolError> {
    let total = payload.len();
    let need = |buf: &[u8], n: usize| {
        if buf.remaining() < n {
            Err(ProtocolError::BufferMismatch {
                expected: total - buf.remaining() + n,
                actual: total,
            })
        } else {
            Ok(())
        }
    };
    let mut buf = payload;

    need(buf, 16 + 1)?;
    let mut uid = [0u8; 16];
    buf.copy_to_slice(&mut uid);
    let author_len = buf.get_u8() as usize;
    need(buf, author_len + 2)?;
    let author = utf8(&buf[..author_len], "author")?;
    buf.advance(author_len);
    let post_len = buf.get_u16() as usize;
    need(buf, post_len + 8 + 2 + 1 + 1)?;
    let post = utf8(&buf[..post_len], "post")?;
    buf.advance(post_len);
    let time_of_creation = buf.get_u64();
    let score = buf.get_u16();
    let hop_count = buf.get_u8();
    let ttl = buf.get_u8();
    if buf.has_remaining() {
        return Err(ProtocolError::BufferMismatch {
            expected: total - buf.remaining(),
            actual: total,
        });
    }

    let mut status = StatusMessage::with_time(author, post, time_of_creation);
    status.uid = StatusUid::from_bytes(uid);
    status.like = score;
    status.hop_count = hop_count;
    status.ttl = ttl;
    Ok(status)
}

fn utf8(bytes: &[u8], field: &str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProtocolError::MalformedPacket(format!("{field} is not valid UTF-8")))
}

/// Read one block. Returns it with the number of bytes consumed.
///
/// A short read on a datagram transport is a malformed packet; a short read
/// on a byte stream means the peer went away and is fatal.
pub async fn read_block(
    input: &mut (dyn InboundStream + '_),
) -> Result<(Block, usize), ProtocolError> {
    let mut head = [0u8; HEADER_LENGTH];
    read_part(input, &mut head, "header").await?;
    let header = BlockHeader::parse(&head)?;
    if header.length > MAX_PAYLOAD {
        // Consume the oversized payload so the next header lines up.
        skip(input, header.length as usize).await?;
        return Err(ProtocolError::TooLarge(header.length));
    }
    let mut payload = vec![0u8; header.length as usize];
    read_part(input, &mut payload, "payload").await?;
    let block = Block::decode(&header, &payload)?;
    Ok((block, HEADER_LENGTH + payload.len()))
}

async fn skip(input: &mut (dyn InboundStream + '_), mut left: usize) -> Result<(), ProtocolError> {
    let mut sink = vec![0u8; SKIP_CHUNK.min(left)];
    while left > 0 {
        let n = SKIP_CHUNK.min(left);
        read_part(input, &mut sink[..n], "oversized payload").await?;
        left -= n;
    }
    Ok(())
}

async fn read_part(
    input: &mut (dyn InboundStream + '_),
    buf: &mut [u8],
    what: &str,
) -> Result<(), ProtocolError> {
    if buf.is_empty() {
        return Ok(());
    }
    match input.read_exact(buf).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            Err(ProtocolError::MalformedPacket(format!("short {what}: {e}")))
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}
