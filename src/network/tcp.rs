//! The socket transport: length-prefixed frames over plain TCP.

pub mod tcp_conn;
pub mod tcp_host;
pub mod tcp_listener;

pub use tcp_conn::TcpConn;
pub use tcp_host::{TcpClient, TcpHost};
pub use tcp_listener::TcpListener;
