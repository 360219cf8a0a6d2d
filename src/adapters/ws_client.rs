//! Client-facing duplex channel over an upgraded axum WebSocket.
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};

use crate::ports::{
    ChannelError, ChannelResult, CloseReason, DuplexChannel, Frame, FrameReceiver, FrameSender,
};

/// Split an upgraded socket into relay channel halves.
pub fn client_channel(socket: WebSocket) -> DuplexChannel {
    let (sink, stream) = socket.split();
    DuplexChannel::new(
        ClientSender {
            sink,
            closed: false,
        },
        ClientReceiver { stream },
    )
}

pub struct ClientSender {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSender for ClientSender {
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
            code: reason.code,
            reason: reason.reason.into(),
        });
        // The peer may already be gone; a failed close handshake is not an error.
        if let Err(e) = self.sink.send(Message::Close(frame)).await {
            tracing::debug!("Client close frame not delivered: {}", e);
        }
        let _ = self.sink.close().await;
        Ok(())
    }
}

pub struct ClientReceiver {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReceiver for ClientReceiver {
    async fn recv(&mut self) -> Option<ChannelResult<Frame>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                // Pongs are queued by the socket itself
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        tracing::debug!(
                            code = frame.code,
                            reason = %frame.reason,
                            "Client sent close"
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
