//! Wire codec (§4.1) — length-prefixed framing plus a tagged-message
//! serializer for the seven message kinds of the peer protocol.
//!
//! Every frame on the wire is a 4-byte big-endian length followed by that
//! many bytes of `serde_json`-encoded [`Message`]. A zero-length prefix or
//! a short read mid-frame signals peer disconnect and decodes to `None`,
//! which the demultiplexer (§4.2) interprets as EOF.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtoError;
use crate::types::{ImageHash, PeerDelta, PeerId, PeerRecord};

/// Maximum allowed frame size. Images are the largest payload on the wire;
/// this bounds the allocation a malformed or hostile length prefix can
/// force before a single byte of payload has been read.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// One message of the peer protocol (§4.1). Tagged by `command` so the
/// JSON on the wire reads as `{"command": "join", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command")]
pub enum Message {
    #[serde(rename = "join")]
    Join { addr: SocketAddr },

    #[serde(rename = "config")]
    Config {
        from_id: PeerId,
        new_id: PeerId,
        net_info: HashMap<PeerId, PeerRecord>,
    },

    #[serde(rename = "update")]
    Update {
        from_id: PeerId,
        add: HashMap<PeerId, PeerDelta>,
        remove: HashMap<PeerId, PeerDelta>,
    },

    #[serde(rename = "request_image")]
    RequestImage { from_id: PeerId, hash: ImageHash },

    #[serde(rename = "image")]
    Image {
        from_id: PeerId,
        hash: ImageHash,
        bytes: Vec<u8>,
        filename: String,
        store: bool,
    },

    #[serde(rename = "request_list")]
    RequestList { from_id: PeerId },

    #[serde(rename = "list")]
    List { hashes: Vec<ImageHash> },
}

impl Message {
    /// Human-readable tag name, used in log lines (mirrors the source's
    /// `msg.__class__.__name__` debug prints).
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join { .. } => "join",
            Message::Config { .. } => "config",
            Message::Update { .. } => "update",
            Message::RequestImage { .. } => "request_image",
            Message::Image { .. } => "image",
            Message::RequestList { .. } => "request_list",
            Message::List { .. } => "list",
        }
    }
}

/// Encode a message into a length-prefixed frame.
pub fn encode(msg: &Message) -> Vec<u8> {
    let payload = serde_json::to_vec(msg).expect("Message serialization is infallible");
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    buf
}

/// Write a single framed message to an async writer.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), ProtoError> {
    writer.write_all(&encode(msg)).await?;
    Ok(())
}

/// Read a single framed message from an async reader.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary (zero-length
/// prefix or nothing left to read) — the sentinel the demultiplexer treats
/// as peer/client disconnect. A short read *inside* a frame (length prefix
/// read but payload truncated) is reported as [`ProtoError::Disconnected`]
/// rather than `None`, since some well-formed bytes were already seen.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Message>, ProtoError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtoError::Disconnected,
            _ => ProtoError::Io(e),
        })?;

    let msg = serde_json::from_slice(&payload)?;
    Ok(Some(msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn roundtrip(msg: Message) {
        let encoded = encode(&msg);
        let decoded: Message = serde_json::from_slice(&encoded[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrips_every_variant() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        roundtrip(Message::Join { addr });

        let mut net_info = HashMap::new();
        net_info.insert(
            1,
            PeerRecord {
                addr: Some(addr),
                hashes: HashSet::new(),
                size: 0,
            },
        );
        roundtrip(Message::Config {
            from_id: 1,
            new_id: 2,
            net_info,
        });

        let mut add = HashMap::new();
        add.insert(2, PeerDelta::with_addr(addr));
        roundtrip(Message::Update {
            from_id: 1,
            add,
            remove: HashMap::new(),
        });

        roundtrip(Message::RequestImage {
            from_id: 0,
            hash: b"abc".to_vec(),
        });

        roundtrip(Message::Image {
            from_id: 1,
            hash: b"abc".to_vec(),
            bytes: vec![1, 2, 3, 4],
            filename: "a.jpg".into(),
            store: true,
        });

        roundtrip(Message::RequestList { from_id: 0 });

        roundtrip(Message::List {
            hashes: vec![b"abc".to_vec(), b"def".to_vec()],
        });
    }

    #[tokio::test]
    async fn async_roundtrip_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let msg = Message::RequestList { from_id: 0 };
        write_message(&mut client, &msg).await.unwrap();

        let decoded = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn clean_eof_decodes_to_none() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let decoded = read_message(&mut server).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes())
            .await
            .unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtoError::FrameTooLarge(_)));
    }
}
