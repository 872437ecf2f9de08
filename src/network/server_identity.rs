use std::fmt::{Debug, Formatter};

use uuid::Uuid;

use crate::network::address::Address;

/// The part of a node's identity the transport needs: something to log, and the [Address] to
///  connect to. Keys, descriptions and roster membership live in higher layers.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ServerIdentity {
    pub id: Uuid,
    pub address: Address,
}

impl ServerIdentity {
    pub fn new(address: Address) -> ServerIdentity {
        ServerIdentity {
            id: Uuid::new_v4(),
            address,
        }
    }
}

impl Debug for ServerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.address, self.id)
    }
}
