pub mod graceful_shutdown;
pub mod tls;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
