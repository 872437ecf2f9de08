pub mod address;
pub mod error;
pub mod local;
pub mod message_type;
pub mod network_config;
pub mod packet;
pub mod retry;
pub mod server_identity;
pub mod tcp;
pub mod transport;
