use std::any::Any;
use std::collections::hash_map::Entry;
use std::fmt::{Debug, Formatter};
use std::sync::RwLock;

use anyhow::anyhow;
use bytes::BytesMut;
use rustc_hash::FxHashMap;


/// A [MessageTypeId] is sent as part of every packet to identify the payload schema, so the
///  receiving side can pick the decoder for the body.
///
/// An id is technically a u64, but it is intended to be used as a sequence of up to eight ASCII
///  characters to give it a human-readable name, both for uniqueness and for debugging at the
///  wire level.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageTypeId(pub u64);

impl MessageTypeId {
    /// reported when a packet was too short to even contain a type tag
    pub const EMPTY: MessageTypeId = MessageTypeId(0);

    pub const fn new(value: &[u8; 8]) -> MessageTypeId {
        Self(u64::from_be_bytes(*value))
    }
}

impl Debug for MessageTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bytes = self.0.to_be_bytes();
        let used = bytes.iter()
            .position(|&b| b == 0)
            .map(|len| &bytes[..len])
            .unwrap_or(&bytes);

        let string_repr = std::str::from_utf8(used).unwrap_or("???");

        write!(f, "0x{:016X}({:?})", self.0, string_repr)
    }
}

impl std::fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}


/// Every payload type that travels over a [crate::network::transport::Conn] implements [Body].
///  The transport only ever calls these methods: it never looks inside the serialized bytes.
pub trait Body: Any + Debug + Send + Sync {
    fn message_type(&self) -> MessageTypeId;

    fn ser(&self, buf: &mut BytesMut);

    /// The virtual network hands the body itself to the receiver instead of serializing it.
    fn box_clone(&self) -> Box<dyn Body>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn Body {
    pub fn downcast_ref<T: Body>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

pub type Decoder = fn(&[u8]) -> anyhow::Result<Box<dyn Body>>;

/// Maps [MessageTypeId]s to the decoders of their bodies. A registry is shared (as an `Arc`)
///  by all connections that decode packets, i.e. the TCP transport.
#[derive(Default)]
pub struct MessageRegistry {
    decoders: RwLock<FxHashMap<MessageTypeId, Decoder>>,
}

impl Debug for MessageRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<MessageTypeId> = match self.decoders.read() {
            Ok(decoders) => decoders.keys().copied().collect(),
            Err(_) => vec![],
        };
        write!(f, "MessageRegistry{{{:?}}}", ids)
    }
}

impl MessageRegistry {
    pub fn new() -> MessageRegistry {
        Default::default()
    }

    pub fn register(&self, id: MessageTypeId, decoder: Decoder) -> anyhow::Result<()> {
        let mut decoders = self.decoders.write()
            .map_err(|_| anyhow!("message registry lock is poisoned"))?;
        match decoders.entry(id) {
            Entry::Occupied(_) => {
                Err(anyhow!("registering a second decoder for message type {:?}", id))
            }
            Entry::Vacant(e) => {
                e.insert(decoder);
                Ok(())
            }
        }
    }

    pub fn decoder(&self, id: MessageTypeId) -> Option<Decoder> {
        self.decoders.read().ok()?
            .get(&id)
            .copied()
    }

    pub fn is_registered(&self, id: MessageTypeId) -> bool {
        self.decoder(id).is_some()
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::test_util::message::{SimpleMessage, SIMPLE_MESSAGE_TYPE};

    use super::*;

    #[rstest]
    #[case::abc(MessageTypeId::new(b"abc\0\0\0\0\0"), "0x6162630000000000(\"abc\")")]
    #[case::empty(MessageTypeId::EMPTY, "0x0000000000000000(\"\")")]
    fn test_id_debug(#[case] id: MessageTypeId, #[case] expected: &str) {
        let formatted = format!("{:?}", id);
        assert_eq!(&formatted, expected);
    }

    #[test]
    fn test_register_twice() {
        let registry = MessageRegistry::new();
        registry.register(SIMPLE_MESSAGE_TYPE, SimpleMessage::decode).unwrap();
        assert!(registry.register(SIMPLE_MESSAGE_TYPE, SimpleMessage::decode).is_err());
        assert!(registry.is_registered(SIMPLE_MESSAGE_TYPE));
        assert!(!registry.is_registered(MessageTypeId::new(b"unknown\0")));
    }

    #[test]
    fn test_downcast() {
        let body: Box<dyn Body> = Box::new(SimpleMessage(7));
        assert_eq!(body.downcast_ref::<SimpleMessage>(), Some(&SimpleMessage(7)));
    }
}
