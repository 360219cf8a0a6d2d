//! In-process duplex channels.
//!
//! [`memory_duplex`] returns a channel for the relay plus the [`MemoryPeer`]
//! that plays the remote end. [`ScriptedDialer`] hands out pre-queued outcomes
//! in order, which lets embedders and tests drive connect and reconnect paths
//! without sockets.
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::ports::{
    ChannelError, ChannelResult, CloseReason, DuplexChannel, Frame, FrameReceiver, FrameSender,
    UpstreamDialer,
};

type SharedCloseReason = Arc<Mutex<Option<CloseReason>>>;

/// Create a connected pair: the channel side for a relay and its remote peer.
pub fn memory_duplex() -> (DuplexChannel, MemoryPeer) {
    let (to_peer, from_relay) = mpsc::unbounded_channel();
    let (to_relay, from_peer) = mpsc::unbounded_channel();
    let close_reason = SharedCloseReason::default();

    let channel = DuplexChannel::new(
        MemorySender {
            tx: Some(to_peer),
            close_reason: close_reason.clone(),
        },
        MemoryReceiver { rx: from_peer },
    );
    let peer = MemoryPeer {
        tx: Some(to_relay),
        rx: from_relay,
        close_reason,
    };
    (channel, peer)
}

pub struct MemorySender {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    close_reason: SharedCloseReason,
}

#[async_trait]
impl FrameSender for MemorySender {
    async fn send(&mut self, frame: Frame) -> ChannelResult<()> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(frame).map_err(|_| ChannelError::Closed)
    }

    async fn close(&mut self, reason: Option<CloseReason>) -> ChannelResult<()> {
        if self.tx.take().is_some() {
            if let Ok(mut slot) = self.close_reason.lock() {
                *slot = reason;
            }
        }
        Ok(())
    }
}

pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<ChannelResult<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}

/// The remote end of a [`memory_duplex`] pair.
///
/// Dropping the peer closes the relay's receiving side and makes its sends fail.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<Frame>,
    close_reason: SharedCloseReason,
}

impl MemoryPeer {
    /// Deliver a frame to the relay. Ignored once the peer has hung up.
    pub fn send(&self, frame: impl Into<Frame>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(frame.into());
        }
    }

    /// Next frame sent by the relay; `None` once the relay closed its side.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Close reason the relay supplied when it closed its side, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Stop sending to the relay; it observes a clean close.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Stop accepting frames from the relay; its sends start failing.
    pub fn close_inbound(&mut self) {
        self.rx.close();
    }
}

/// One queued response of a [`ScriptedDialer`].
#[derive(Debug)]
pub enum DialOutcome {
    Connected(DuplexChannel),
    Refuse,
    /// Never completes; exercises timeouts and cancellation.
    Hang,
}

/// Dialer that replays queued outcomes in order and refuses once drained.
#[derive(Debug, Default)]
pub struct ScriptedDialer {
    outcomes: Mutex<VecDeque<DialOutcome>>,
    /// Number of `dial` calls made so far.
    pub attempts: AtomicUsize,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: DialOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    /// Queue a successful dial and return the upstream peer it will connect to.
    pub fn push_connected(&self) -> MemoryPeer {
        let (channel, peer) = memory_duplex();
        self.push(DialOutcome::Connected(channel));
        peer
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamDialer for ScriptedDialer {
    async fn dial(&self, target: &Url) -> ChannelResult<DuplexChannel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().ok().and_then(|mut q| q.pop_front());

        match next {
            Some(DialOutcome::Connected(channel)) => Ok(channel),
            Some(DialOutcome::Hang) => std::future::pending().await,
            Some(DialOutcome::Refuse) | None => Err(ChannelError::Dial {
                target: target.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_carries_frames_both_ways() {
        let (channel, mut peer) = memory_duplex();
        let (mut tx, mut rx) = channel.into_parts();

        tx.send(Frame::from("to-peer")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Frame::from("to-peer")));

        peer.send("to-relay");
        assert_eq!(rx.recv().await.unwrap().unwrap(), Frame::from("to-relay"));
    }

    #[tokio::test]
    async fn test_close_is_observed_with_reason() {
        let (channel, mut peer) = memory_duplex();
        let (mut tx, _rx) = channel.into_parts();

        tx.close(Some(CloseReason::going_away())).await.unwrap();
        tx.close(None).await.unwrap();

        assert_eq!(peer.recv().await, None);
        assert_eq!(peer.close_reason(), Some(CloseReason::going_away()));
        assert!(matches!(
            tx.send(Frame::from("late")).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_hang_up_ends_relay_stream() {
        let (channel, mut peer) = memory_duplex();
        let (_tx, mut rx) = channel.into_parts();
        peer.hang_up();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_scripted_dialer_replays_in_order() {
        let dialer = ScriptedDialer::new();
        let target = Url::parse("ws://upstream.test").unwrap();
        let _peer = dialer.push_connected();
        dialer.push(DialOutcome::Refuse);

        assert!(dialer.dial(&target).await.is_ok());
        assert!(dialer.dial(&target).await.is_err());
        // Drained queue refuses
        assert!(dialer.dial(&target).await.is_err());
        assert_eq!(dialer.attempts(), 3);
    }
}
