pub mod http_client;
pub mod http_handler;
pub mod memory;
pub mod ws_client;
pub mod ws_upstream;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use memory::{MemoryPeer, ScriptedDialer, memory_duplex};
pub use ws_client::client_channel;
pub use ws_upstream::TungsteniteDialer;
