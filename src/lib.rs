//! Relaygate - a TLS WebSocket relay gateway for bot platforms.
//!
//! Clients open a WebSocket to the gateway naming an application identity and
//! an upstream `ws(s)://` URL. The gateway dials the upstream, relays frames in
//! both directions and transparently re-dials the upstream (bounded, fixed
//! delay) when it drops, while the client connection stays open. A one-shot
//! `/proxy` endpoint forwards plain HTTP requests and decompresses the reply.
//!
//! # Features
//! - Per-identity registry of live relay sessions with introspection (`/health`)
//! - Bounded upstream reconnection with cancellation on teardown
//! - One-shot HTTP forwarding with gzip / deflate / brotli decompression
//! - TLS termination via rustls, permissive CORS, structured tracing
//! - Graceful shutdown that closes every client with "going away"
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use relaygate::{
//!     adapters::{HttpClientAdapter, HttpHandler, TungsteniteDialer},
//!     config::ServerConfig,
//!     core::{ForwardService, ReconnectPolicy, RelayContext, RelayRegistry, SessionAcceptor},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = ServerConfig::builder().without_tls().build();
//! let context = RelayContext::new(
//!     Arc::new(TungsteniteDialer::new(cfg.relay.connect_timeout())),
//!     RelayRegistry::new(),
//!     ReconnectPolicy::from(&cfg.relay),
//! );
//! let forward = ForwardService::new(Arc::new(HttpClientAdapter::new()?), &cfg.forward)?;
//! let app = HttpHandler::new(SessionAcceptor::new(context), forward).router();
//! let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! relay logic inside `core`. The relay only sees [`ports::DuplexChannel`] halves, so the
//! client WebSocket, the upstream WebSocket and in-memory test channels are interchangeable.
//!
//! # Error Handling
//! Domain operations return `thiserror` enums; application plumbing returns
//! `eyre::Result<T>` with `WrapErr` context attached.
//!
//! # Concurrency & Data Structures
//! The session registry is an `scc::HashMap` keyed by identity; each relay instance
//! guards its own lifecycle with a tokio mutex and a cancellation token.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler, TungsteniteDialer},
    core::{ForwardService, RelayRegistry, SessionAcceptor},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
