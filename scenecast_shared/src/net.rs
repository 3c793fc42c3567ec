//! Wire codec.
//!
//! One broadcast carries one MessagePack document. Structs are encoded as
//! maps (field names included) because the receiver reads them as plain
//! objects; typed buffers ride inside as extension values (see
//! [`crate::buffer`]).

use anyhow::Context;
use bytes::Bytes;

use crate::commands::{Message, MessageDoc};

/// Encodes a lowered message.
pub fn encode_to_bytes(doc: &MessageDoc) -> anyhow::Result<Bytes> {
    let payload = rmp_serde::to_vec_named(doc).context("serialize message")?;
    Ok(Bytes::from(payload))
}

/// Decodes a message document. The pool never needs this; tools and tests do.
pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<MessageDoc> {
    rmp_serde::from_slice(b).context("deserialize message")
}

/// Lowers and encodes `message`.
///
/// Encode errors (e.g. an unsupported buffer) come back as
/// [`crate::buffer::EncodeError`] inside the `anyhow::Error`.
pub fn pack_message(message: &Message) -> anyhow::Result<Bytes> {
    let doc = message.lower()?;
    encode_to_bytes(&doc)
}
