use std::any::Any;

use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use rand::RngCore;

use crate::network::message_type::{Body, MessageRegistry, MessageTypeId};
use crate::util::buf::{put_bytes, put_string, try_get_bytes, try_get_string};

pub const SIMPLE_MESSAGE_TYPE: MessageTypeId = MessageTypeId::new(b"Simple\0\0");
pub const TEXT_MESSAGE_TYPE: MessageTypeId = MessageTypeId::new(b"Text\0\0\0\0");
pub const BLOB_MESSAGE_TYPE: MessageTypeId = MessageTypeId::new(b"Blob\0\0\0\0");
pub const PANICKING_MESSAGE_TYPE: MessageTypeId = MessageTypeId::new(b"Panic\0\0\0");

/// a message with a single u32, serialized as four big-endian bytes
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SimpleMessage(pub u32);

impl SimpleMessage {
    pub fn decode(mut buf: &[u8]) -> anyhow::Result<Box<dyn Body>> {
        if buf.remaining() != size_of::<u32>() {
            bail!("expected {} bytes, was {}", size_of::<u32>(), buf.remaining());
        }
        Ok(Box::new(SimpleMessage(buf.get_u32())))
    }
}

impl Body for SimpleMessage {
    fn message_type(&self) -> MessageTypeId {
        SIMPLE_MESSAGE_TYPE
    }

    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn box_clone(&self) -> Box<dyn Body> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TextMessage(pub String);

impl TextMessage {
    pub fn new(text: &str) -> TextMessage {
        TextMessage(text.to_string())
    }

    pub fn decode(mut buf: &[u8]) -> anyhow::Result<Box<dyn Body>> {
        Ok(Box::new(TextMessage(try_get_string(&mut buf)?)))
    }
}

impl Body for TextMessage {
    fn message_type(&self) -> MessageTypeId {
        TEXT_MESSAGE_TYPE
    }

    fn ser(&self, buf: &mut BytesMut) {
        put_string(buf, &self.0);
    }

    fn box_clone(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// arbitrary bytes, typically big enough to be split into several chunks on the wire
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlobMessage(pub Vec<u8>);

impl BlobMessage {
    pub fn random(len: usize) -> BlobMessage {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        BlobMessage(data)
    }

    pub fn decode(mut buf: &[u8]) -> anyhow::Result<Box<dyn Body>> {
        Ok(Box::new(BlobMessage(try_get_bytes(&mut buf)?)))
    }
}

impl Body for BlobMessage {
    fn message_type(&self) -> MessageTypeId {
        BLOB_MESSAGE_TYPE
    }

    fn ser(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.0);
    }

    fn box_clone(&self) -> Box<dyn Body> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A message whose decoder panics, for verifying that the receiving side survives broken
///  decoders.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PanickingMessage;

impl PanickingMessage {
    pub fn decode(_buf: &[u8]) -> anyhow::Result<Box<dyn Body>> {
        panic!("refusing to decode a PanickingMessage");
    }
}

impl Body for PanickingMessage {
    fn message_type(&self) -> MessageTypeId {
        PANICKING_MESSAGE_TYPE
    }

    fn ser(&self, _buf: &mut BytesMut) {}

    fn box_clone(&self) -> Box<dyn Body> {
        Box::new(*self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// a registry with decoders for all test message types
pub fn test_registry() -> MessageRegistry {
    let registry = MessageRegistry::new();
    for (id, decoder) in [
        (SIMPLE_MESSAGE_TYPE, SimpleMessage::decode as fn(&[u8]) -> anyhow::Result<Box<dyn Body>>),
        (TEXT_MESSAGE_TYPE, TextMessage::decode),
        (BLOB_MESSAGE_TYPE, BlobMessage::decode),
        (PANICKING_MESSAGE_TYPE, PanickingMessage::decode),
    ] {
        if let Err(e) = registry.register(id, decoder) {
            panic!("test message types have conflicting ids: {}", e);
        }
    }
    registry
}
