use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// Close code sent when the upstream leg cannot be (re)established.
pub const CLOSE_UPSTREAM_UNAVAILABLE: u16 = 1011;

/// Close code sent when the gateway is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A single data message carried over a duplex channel.
///
/// Control traffic (ping/pong) is answered by the transport adapters and a
/// close frame ends the receiving side, so only payload frames surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short label used for logging and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame::Binary(data)
    }
}

/// Close code and reason delivered to a peer when a channel is shut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn upstream_unavailable() -> Self {
        Self::new(CLOSE_UPSTREAM_UNAVAILABLE, "upstream unavailable")
    }

    pub fn going_away() -> Self {
        Self::new(CLOSE_GOING_AWAY, "gateway shutting down")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// Errors raised by duplex channel transports.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// The channel was already closed by either side.
    #[error("Channel closed")]
    Closed,

    /// The underlying transport failed while reading or writing.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Opening a channel to the upstream target failed.
    #[error("Failed to connect to {target}: {reason}")]
    Dial { target: String, reason: String },

    /// Opening a channel did not complete in time.
    #[error("Connecting to {target} timed out after {millis}ms")]
    DialTimeout { target: String, millis: u64 },
}

/// Result type alias for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Write half of a duplex channel.
#[async_trait]
pub trait FrameSender: Send + 'static {
    /// Send one frame to the peer.
    async fn send(&mut self, frame: Frame) -> ChannelResult<()>;

    /// Close the channel, optionally telling the peer why. Closing an already
    /// closed channel is not an error.
    async fn close(&mut self, reason: Option<CloseReason>) -> ChannelResult<()>;
}

/// Read half of a duplex channel.
#[async_trait]
pub trait FrameReceiver: Send + 'static {
    /// Wait for the next frame. `None` means the peer closed the channel.
    async fn recv(&mut self) -> Option<ChannelResult<Frame>>;
}

/// Both halves of one bidirectional message channel.
pub struct DuplexChannel {
    pub sender: Box<dyn FrameSender>,
    pub receiver: Box<dyn FrameReceiver>,
}

impl DuplexChannel {
    pub fn new(sender: impl FrameSender, receiver: impl FrameReceiver) -> Self {
        Self {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
        }
    }

    pub fn into_parts(self) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        (self.sender, self.receiver)
    }
}

impl fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexChannel").finish_non_exhaustive()
    }
}

/// UpstreamDialer defines the port for opening the upstream leg of a relay.
#[async_trait]
pub trait UpstreamDialer: Send + Sync + 'static {
    /// Open a new duplex channel to `target`.
    ///
    /// # Arguments
    /// * `target` - The upstream address, fixed for the lifetime of a relay
    ///
    /// # Returns
    /// A future that resolves to a live channel or a dial error
    async fn dial(&self, target: &Url) -> ChannelResult<DuplexChannel>;
}
