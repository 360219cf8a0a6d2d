pub mod decompress;
pub mod forward;
pub mod inspect;
pub mod registry;
pub mod relay;
pub mod session;

pub use forward::ForwardService;
pub use registry::{AppId, RelayRegistry};
pub use relay::{ReconnectPolicy, RelayContext, RelayInstance};
pub use session::{SessionAcceptor, SessionParams};
