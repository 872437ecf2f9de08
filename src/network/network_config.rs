use std::time::Duration;

use anyhow::bail;

use crate::network::error::{TransportError, TransportResult};

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// number of attempts for establishing a connection (or binding a listener) before giving up
    pub max_retry_connect: u32,
    /// delay between two consecutive connection attempts
    pub wait_retry: Duration,

    /// This is the maximum number of bytes handed to the socket in a single write. The default
    ///  of 1400 bytes fits into a single Ethernet frame together with IP and TCP headers, leaving
    ///  some room for optional headers.
    pub max_chunk_size: usize,

    /// Frames announcing a longer payload are rejected on receipt, and longer messages are
    ///  rejected before sending. This protects against a corrupted or malicious length prefix
    ///  causing huge allocations.
    pub max_message_size: usize,

    /// interval for polling the accept loop's acknowledgement when stopping a listener
    pub stop_poll_interval: Duration,
    pub max_stop_polls: u32,

    /// bind listening sockets to all interfaces (keeping the port) rather than to the exact
    ///  address a host is known by
    pub bind_all_interfaces: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            max_retry_connect: 5,
            wait_retry: Duration::from_millis(20),
            max_chunk_size: 1400,
            max_message_size: 16*1024*1024,
            stop_poll_interval: Duration::from_millis(50),
            max_stop_polls: 100,
            bind_all_interfaces: false,
        }
    }
}

impl NetworkConfig {
    pub fn new() -> NetworkConfig {
        Default::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retry_connect == 0 {
            bail!("max_retry_connect must be at least 1");
        }
        if self.max_chunk_size == 0 {
            bail!("max_chunk_size must be positive");
        }
        if self.max_message_size > u32::MAX as usize {
            bail!("max_message_size must fit into the u32 length prefix");
        }
        if self.max_stop_polls == 0 {
            bail!("max_stop_polls must be at least 1");
        }
        Ok(())
    }

    /// [NetworkConfig::validate] for the transport's constructors
    pub(crate) fn check(&self) -> TransportResult<()> {
        self.validate()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))
    }
}
