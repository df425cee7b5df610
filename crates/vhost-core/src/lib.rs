//! Virtual host sniffing for raw TCP connections.
//!
//! A connection is read just far enough to learn which host it is addressed
//! to (the SNI of a TLS ClientHello, or the `Host` of an HTTP/1.x request),
//! then handed back as a stream that replays every byte consumed along the way.

pub mod config;
pub mod error;
pub mod http;
pub mod replay;
pub mod sniff;
pub mod tls;

pub use config::{SniSelection, SniffConfig};
pub use error::{DecodeError, SniffError};
pub use self::http::{HttpConn, HttpRequestHead};
pub use replay::ReplayStream;
pub use sniff::{sniff, Protocol, Rejected, Sniffed};
pub use tls::{parse_client_hello, ClientHelloMsg, TlsConn};
