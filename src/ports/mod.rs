pub mod duplex;
pub mod http_client;

pub use duplex::{
    ChannelError, ChannelResult, CloseReason, DuplexChannel, Frame, FrameReceiver, FrameSender,
    UpstreamDialer,
};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
