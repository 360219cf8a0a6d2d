//! Upstream WebSocket dialing with tokio-tungstenite.
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use url::Url;

use crate::ports::{
    ChannelError, ChannelResult, CloseReason, DuplexChannel, Frame, FrameReceiver, FrameSender,
    UpstreamDialer,
};

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials `ws://` and `wss://` targets; TLS is verified against native roots.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteDialer {
    connect_timeout: Option<Duration>,
}

impl TungsteniteDialer {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Self { connect_timeout }
    }
}

#[async_trait]
impl UpstreamDialer for TungsteniteDialer {
    async fn dial(&self, target: &Url) -> ChannelResult<DuplexChannel> {
        let connect = connect_async(target.as_str());
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                ChannelError::DialTimeout {
                    target: target.to_string(),
                    millis: limit.as_millis() as u64,
                }
            })?,
            None => connect.await,
        };

        let (stream, response) = result.map_err(|e| ChannelError::Dial {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(status = %response.status(), "Upstream handshake completed");

        let (sink, stream) = stream.split();
        let sender = UpstreamSender {
            sink,
            closed: false,
        };
        Ok(DuplexChannel::new(sender, UpstreamReceiver { stream }))
    }
}

pub struct UpstreamSender {
    sink: SplitSink<UpstreamStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSender for UpstreamSender {
    async fn send(&mut self, frame: Frame) -> ChannelResult<()> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: Option<CloseReason>) -> ChannelResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let frame = reason.map(|reason| CloseFrame {
            code: CloseCode::from(reason.code),
            reason: reason.reason.into(),
        });
        if let Err(e) = self.sink.send(Message::Close(frame)).await {
            tracing::debug!("Upstream close frame not delivered: {}", e);
        }
        let _ = self.sink.close().await;
        Ok(())
    }
}

pub struct UpstreamReceiver {
    stream: SplitStream<UpstreamStream>,
}

#[async_trait]
impl FrameReceiver for UpstreamReceiver {
    async fn recv(&mut self) -> Option<ChannelResult<Frame>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::debug!(
                            code = %frame.code,
                            reason = %frame.reason,
                            "Upstream sent close"
                        );
                    }
                    return None;
                }
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
        None
    }
}
