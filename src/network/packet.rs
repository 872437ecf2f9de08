use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::network::address::Address;
use crate::network::error::{TransportError, TransportResult};
use crate::network::message_type::{Body, MessageRegistry, MessageTypeId};

/// A [Packet] is what a [crate::network::transport::Conn] delivers: the body together with its
///  type tag and the address of the node that sent it.
#[derive(Clone)]
pub struct Packet {
    pub msg_type: MessageTypeId,
    pub msg: Arc<dyn Body>,
    pub from: Address,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Packet{{type:{:?}, from:{}, msg:{:?}}}", self.msg_type, self.from, self.msg)
    }
}

impl Packet {
    const TYPE_TAG_SIZE: usize = size_of::<u64>();

    pub fn new(msg: &dyn Body, from: Address) -> Packet {
        Packet {
            msg_type: msg.message_type(),
            msg: Arc::from(msg.box_clone()),
            from,
        }
    }

    pub fn downcast_ref<T: Body>(&self) -> Option<&T> {
        self.msg.downcast_ref::<T>()
    }

    /// Serializes the envelope (type tag followed by the body) of a packet. The sender's address
    ///  is not part of the wire format: the receiver knows whom it is connected to.
    pub fn write(msg: &dyn Body, buf: &mut BytesMut) {
        buf.put_u64(msg.message_type().0);
        msg.ser(buf);
    }

    /// Decodes an envelope, looking up the body's decoder in the registry. A panicking decoder
    ///  is converted into [TransportError::ReceivePanic] rather than unwinding into the caller.
    pub fn try_read(buf: &[u8], registry: &MessageRegistry, from: Address) -> TransportResult<Packet> {
        let mut buf = buf;
        if buf.remaining() < Self::TYPE_TAG_SIZE {
            return Err(TransportError::Decode {
                msg_type: MessageTypeId::EMPTY,
                reason: format!("packet is shorter than the type tag: {} < {} bytes", buf.remaining(), Self::TYPE_TAG_SIZE),
            });
        }
        let msg_type = MessageTypeId(buf.get_u64());

        let decoder = registry.decoder(msg_type)
            .ok_or(TransportError::UnknownMessageType(msg_type))?;

        trace!(?msg_type, len = buf.len(), "decoding message body");
        let msg = match catch_unwind(AssertUnwindSafe(|| decoder(buf))) {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => return Err(TransportError::Decode {
                msg_type,
                reason: e.to_string(),
            }),
            Err(panic) => {
                let reason = panic.downcast_ref::<&str>().map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "decoder panicked".to_string());
                return Err(TransportError::ReceivePanic(reason));
            }
        };

        Ok(Packet {
            msg_type,
            msg: Arc::from(msg),
            from,
        })
    }
}
