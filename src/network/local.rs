//! The virtual network: an in-process stand-in for the TCP transport, so that many nodes can run
//!  in a single test process without touching any sockets.

pub mod conn_queue;
pub mod local_conn;
pub mod local_context;
pub mod local_host;
pub mod local_listener;

pub use local_conn::LocalConn;
pub use local_context::{Endpoint, LocalContext};
pub use local_host::{LocalClient, LocalHost};
pub use local_listener::LocalListener;
