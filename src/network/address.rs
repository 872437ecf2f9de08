use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use anyhow::{anyhow, bail};

/// The kind of substrate an [Address] is reachable over.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ConnType {
    /// plain TCP with length-prefixed framing
    PlainTcp,
    /// the in-process virtual network, see [crate::network::local::LocalContext]
    Local,
}

impl ConnType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ConnType::PlainTcp => "tcp",
            ConnType::Local => "local",
        }
    }
}

impl Display for ConnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for ConnType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(ConnType::PlainTcp),
            "local" => Ok(ConnType::Local),
            other => Err(anyhow!("unknown connection type {:?}", other)),
        }
    }
}

/// An [Address] identifies a node's endpoint: the kind of connection it accepts plus a location
///  string that only has meaning for that kind of connection (`host:port` for TCP, an arbitrary
///  name for the virtual network).
///
/// The textual form is `<type>://<location>`, e.g. `tcp://127.0.0.1:2000` or `local://node-1`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address {
    conn_type: ConnType,
    location: String,
}

impl Address {
    pub fn new(conn_type: ConnType, location: impl Into<String>) -> Address {
        Address {
            conn_type,
            location: location.into(),
        }
    }

    pub fn tcp(socket_addr: SocketAddr) -> Address {
        Self::new(ConnType::PlainTcp, socket_addr.to_string())
    }

    pub fn local(name: impl Into<String>) -> Address {
        Self::new(ConnType::Local, name)
    }

    pub fn conn_type(&self) -> ConnType {
        self.conn_type
    }

    /// the location part without the connection type, i.e. what is handed to the network stack
    pub fn network_address(&self) -> &str {
        &self.location
    }

    /// Resolves the location of a TCP address to a socket address. Host names are resolved
    ///  without blocking the runtime, taking the first result.
    pub async fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        if self.conn_type != ConnType::PlainTcp {
            bail!("{} is not a TCP address", self);
        }
        if let Ok(addr) = SocketAddr::from_str(&self.location) {
            return Ok(addr);
        }
        tokio::net::lookup_host(self.location.as_str()).await?
            .next()
            .ok_or_else(|| anyhow!("{} does not resolve to any socket address", self))
    }

    /// The address to bind a listening socket to so that it accepts connections on all
    ///  interfaces, keeping the port of this address.
    pub async fn global_bind(&self) -> anyhow::Result<SocketAddr> {
        let addr = self.socket_addr().await?;
        let any: IpAddr = if addr.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        }
        else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        Ok(SocketAddr::new(any, addr.port()))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.conn_type, self.location)
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (conn_type, location) = s.split_once("://")
            .ok_or_else(|| anyhow!("address {:?} has no connection type prefix", s))?;
        if location.is_empty() {
            bail!("address {:?} has an empty location", s);
        }

        let conn_type = ConnType::from_str(conn_type)?;
        if conn_type == ConnType::PlainTcp && !location.contains(':') {
            bail!("TCP address {:?} has no port", s);
        }

        Ok(Address::new(conn_type, location))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::tcp(addr)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::tcp("tcp://127.0.0.1:2000", Some(Address::new(ConnType::PlainTcp, "127.0.0.1:2000")))]
    #[case::tcp_host_name("tcp://localhost:2000", Some(Address::new(ConnType::PlainTcp, "localhost:2000")))]
    #[case::local("local://node-1", Some(Address::local("node-1")))]
    #[case::no_prefix("127.0.0.1:2000", None)]
    #[case::unknown_prefix("udp://127.0.0.1:2000", None)]
    #[case::empty_location("local://", None)]
    #[case::tcp_without_port("tcp://127.0.0.1", None)]
    fn test_parse(#[case] s: &str, #[case] expected: Option<Address>) {
        match Address::from_str(s) {
            Ok(actual) => assert_eq!(Some(actual), expected),
            Err(e) => {
                println!("{}", e);
                assert!(expected.is_none());
            }
        }
    }

    #[rstest]
    #[case::tcp(Address::new(ConnType::PlainTcp, "1.2.3.4:5678"), "tcp://1.2.3.4:5678")]
    #[case::local(Address::local("abc"), "local://abc")]
    fn test_display(#[case] addr: Address, #[case] expected: &str) {
        assert_eq!(addr.to_string(), expected);
        assert_eq!(Address::from_str(expected).unwrap(), addr);
    }

    #[rstest]
    #[case::v4("tcp://1.2.3.4:5678", "0.0.0.0:5678")]
    #[case::v6("tcp://[::1]:5678", "[::]:5678")]
    #[tokio::test]
    async fn test_global_bind(#[case] addr: &str, #[case] expected: &str) {
        let addr = Address::from_str(addr).unwrap();
        assert_eq!(addr.global_bind().await.unwrap(), SocketAddr::from_str(expected).unwrap());
    }

    #[tokio::test]
    async fn test_socket_addr_resolves_host_name() {
        let addr = Address::from_str("tcp://localhost:5678").unwrap();
        let resolved = addr.socket_addr().await.unwrap();
        assert!(resolved.ip().is_loopback());
        assert_eq!(resolved.port(), 5678);
    }

    #[tokio::test]
    async fn test_socket_addr_of_local_address() {
        assert!(Address::local("x").socket_addr().await.is_err());
    }
}
