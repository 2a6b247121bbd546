pub mod dns;
pub mod http;
pub mod ip;
pub mod socket;
pub mod tls;
pub mod websocket;

pub use http::HttpClient;
pub use ip::IpAddress;
pub use socket::Socket;
pub use tls::client::TlsClient;
pub use websocket::{WebSocketClient, WebSocketMessage};
