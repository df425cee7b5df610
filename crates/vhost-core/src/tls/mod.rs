pub mod clienthello;
pub mod conn;
pub mod grease;
pub mod record;
pub mod types;

pub use clienthello::{parse_client_hello, parse_client_hello_with};
pub use conn::{read_client_hello, TlsConn};
pub use record::HandshakeAssembler;
pub use types::ClientHelloMsg;
