//! Relay instance: one client channel, one upstream channel, two forwarding directions.
//!
//! # Tasks
//! * **client task** (started once by [`RelayInstance::start`]): reads the client
//!   channel and writes to whatever upstream channel is installed. Frames arriving
//!   while no upstream is installed are dropped. A client read failure tears the
//!   instance down.
//! * **upstream task** (started by a successful [`RelayInstance::connect`]): runs one
//!   forwarding pass per upstream connection. When a pass ends on an upstream read
//!   failure the task runs the reconnect procedure and, on success, starts a fresh
//!   pass over the new connection. Exhausted or refused reconnects close the client
//!   and tear down. A failed write to the client ends the task without reconnecting.
//!
//! # Locking
//! `lifecycle` serialises the active flag, the reconnect counter and replacement of
//! the upstream sender; it is held across the whole reconnect decision, delay and
//! dial. Lock order is `lifecycle` → `upstream_tx`. The upstream slot is never
//! locked across I/O: the client task takes the sender out for the duration of a
//! write and only puts it back if the slot was not replaced meanwhile. Writes to
//! the client hold `client_tx` but race the instance token.
//!
//! Teardown cancels the instance token before taking `lifecycle`. Every delay, dial
//! and send races that token and every close is bounded by [`CLOSE_TIMEOUT`], so
//! both tasks end even if a transport stalls without reporting an error.
use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    config::RelayConfig,
    core::{
        inspect,
        registry::{AppId, RelayRegistry},
    },
    metrics,
    ports::{
        ChannelError, ChannelResult, CloseReason, DuplexChannel, Frame, FrameReceiver,
        FrameSender, UpstreamDialer,
    },
    tracing_setup,
};

/// Upper bound for closing a channel whose transport stopped responding.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded, fixed-delay reconnect settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&RelayConfig> for ReconnectPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    /// The instance has been torn down; no further upstream work is done.
    #[error("Relay instance is no longer active")]
    Inactive,

    /// The reconnect counter reached the configured maximum.
    #[error("Reconnect attempts exhausted after {0} tries")]
    RetriesExhausted(u32),

    /// Dialing the upstream target failed.
    #[error(transparent)]
    Upstream(#[from] ChannelError),
}

/// Collaborators shared by every instance created by one acceptor.
#[derive(Clone)]
pub struct RelayContext {
    pub dialer: Arc<dyn UpstreamDialer>,
    pub registry: RelayRegistry,
    pub policy: ReconnectPolicy,
}

impl RelayContext {
    pub fn new(
        dialer: Arc<dyn UpstreamDialer>,
        registry: RelayRegistry,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            dialer,
            registry,
            policy,
        }
    }
}

struct Lifecycle {
    active: bool,
    reconnect_count: u32,
}

/// The installed upstream sender. `generation` changes whenever the slot is
/// cleared or refilled, so a sender borrowed for a write can tell whether it
/// is still the current one.
#[derive(Default)]
struct UpstreamSlot {
    sender: Option<Box<dyn FrameSender>>,
    generation: u64,
}

impl UpstreamSlot {
    fn install(&mut self, sender: Box<dyn FrameSender>) -> Option<Box<dyn FrameSender>> {
        self.generation += 1;
        self.sender.replace(sender)
    }

    fn clear(&mut self) -> Option<Box<dyn FrameSender>> {
        self.generation += 1;
        self.sender.take()
    }
}

async fn close_bounded(
    sender: &mut dyn FrameSender,
    reason: Option<CloseReason>,
) -> ChannelResult<()> {
    match tokio::time::timeout(CLOSE_TIMEOUT, sender.close(reason)).await {
        Ok(result) => result,
        Err(_) => Err(ChannelError::Transport(format!(
            "close timed out after {}ms",
            CLOSE_TIMEOUT.as_millis()
        ))),
    }
}

/// Why a forwarding pass over one upstream connection ended.
enum PassEnd {
    UpstreamClosed,
    ClientGone,
    Cancelled,
}

pub struct RelayInstance {
    id: Uuid,
    app_id: AppId,
    target: Url,
    created_at: DateTime<Utc>,
    context: RelayContext,
    lifecycle: Mutex<Lifecycle>,
    upstream_tx: Mutex<UpstreamSlot>,
    client_tx: Mutex<Box<dyn FrameSender>>,
    client_rx: Mutex<Option<Box<dyn FrameReceiver>>>,
    shutdown: CancellationToken,
    span: tracing::Span,
}

impl RelayInstance {
    /// Wrap a live client channel. No upstream is dialed until [`connect`](Self::connect).
    pub fn new(
        app_id: AppId,
        target: Url,
        client: DuplexChannel,
        context: RelayContext,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let span = tracing_setup::create_session_span(
            &app_id.to_string(),
            &id.to_string(),
            target.as_str(),
        );
        let (client_tx, client_rx) = client.into_parts();

        Arc::new(Self {
            id,
            app_id,
            target,
            created_at: Utc::now(),
            context,
            lifecycle: Mutex::new(Lifecycle {
                active: true,
                reconnect_count: 0,
            }),
            upstream_tx: Mutex::new(UpstreamSlot::default()),
            client_tx: Mutex::new(client_tx),
            client_rx: Mutex::new(Some(client_rx)),
            shutdown: CancellationToken::new(),
            span,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub async fn is_active(&self) -> bool {
        self.lifecycle.lock().await.active
    }

    pub async fn reconnect_count(&self) -> u32 {
        self.lifecycle.lock().await.reconnect_count
    }

    /// Whether an upstream channel is currently installed.
    pub async fn has_upstream(&self) -> bool {
        self.upstream_tx.lock().await.sender.is_some()
    }

    /// Dial the target, install the channel and start the upstream task.
    pub async fn connect(self: &Arc<Self>) -> Result<(), RelayError> {
        let receiver = {
            let mut lifecycle = self.lifecycle.lock().await;
            if !lifecycle.active {
                return Err(RelayError::Inactive);
            }
            self.connect_locked(&mut lifecycle).await?
        };

        let relay = Arc::clone(self);
        tokio::spawn(relay.run_upstream(receiver).instrument(self.span.clone()));
        Ok(())
    }

    /// Start the client task. Only the first call has an effect.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(relay.run_client().instrument(self.span.clone()))
    }

    /// Mark inactive, close the upstream channel and leave the registry. Idempotent.
    pub async fn teardown(&self) {
        self.shutdown.cancel();

        let was_active = {
            let mut lifecycle = self.lifecycle.lock().await;
            let was_active = std::mem::replace(&mut lifecycle.active, false);
            self.clear_upstream().await;
            let _ = self.context.registry.remove(self.app_id, self).await;
            was_active
        };

        if was_active {
            tracing::info!(
                parent: &self.span,
                age_secs = (Utc::now() - self.created_at).num_seconds(),
                applications = self.context.registry.identity_count(),
                "Relay session torn down"
            );
        }
    }

    /// Tear down and tell the client why.
    pub async fn shutdown(&self, reason: CloseReason) {
        self.teardown().await;
        self.close_client(Some(reason)).await;
    }

    /// Close the client channel. Errors are only logged; the client may already be gone.
    pub async fn close_client(&self, reason: Option<CloseReason>) {
        let mut client = self.client_tx.lock().await;
        if let Err(e) = close_bounded(&mut **client, reason).await {
            tracing::debug!(parent: &self.span, error = %e, "Closing client channel failed");
        }
    }

    /// Close and forget the current upstream sender, if any.
    async fn clear_upstream(&self) {
        let previous = self.upstream_tx.lock().await.clear();
        if let Some(sender) = previous {
            self.close_upstream(sender).await;
        }
    }

    async fn close_upstream(&self, mut sender: Box<dyn FrameSender>) {
        if let Err(e) = close_bounded(&mut *sender, None).await {
            tracing::debug!(parent: &self.span, error = %e, "Closing upstream channel failed");
        }
    }

    /// Open a fresh upstream channel. Caller holds `lifecycle`.
    async fn connect_locked(
        &self,
        lifecycle: &mut Lifecycle,
    ) -> Result<Box<dyn FrameReceiver>, RelayError> {
        self.clear_upstream().await;

        let dialed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RelayError::Inactive),
            dialed = self.context.dialer.dial(&self.target) => dialed,
        };

        let (sender, receiver) = match dialed {
            Ok(channel) => channel.into_parts(),
            Err(e) => {
                tracing::warn!(parent: &self.span, error = %e, "Failed to connect upstream");
                return Err(e.into());
            }
        };

        let stale = self.upstream_tx.lock().await.install(sender);
        if let Some(stale) = stale {
            self.close_upstream(stale).await;
        }
        lifecycle.reconnect_count = 0;
        tracing::info!(parent: &self.span, "Upstream connected");
        Ok(receiver)
    }

    /// One bounded reconnect attempt: refuse, or wait the fixed delay and dial.
    async fn reconnect(&self) -> Result<Box<dyn FrameReceiver>, RelayError> {
        let mut lifecycle = self.lifecycle.lock().await;

        if !lifecycle.active {
            metrics::increment_reconnect("refused");
            return Err(RelayError::Inactive);
        }
        if lifecycle.reconnect_count >= self.context.policy.max_retries {
            metrics::increment_reconnect("refused");
            tracing::warn!(
                attempts = lifecycle.reconnect_count,
                "Maximum reconnect attempts reached"
            );
            return Err(RelayError::RetriesExhausted(lifecycle.reconnect_count));
        }

        lifecycle.reconnect_count += 1;
        tracing::info!(
            attempt = lifecycle.reconnect_count,
            max = self.context.policy.max_retries,
            "Reconnecting upstream"
        );

        // Client frames are dropped from here until a new upstream is installed.
        self.clear_upstream().await;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(RelayError::Inactive),
            _ = tokio::time::sleep(self.context.policy.retry_delay) => {}
        }

        let result = self.connect_locked(&mut lifecycle).await;
        metrics::increment_reconnect(if result.is_ok() { "success" } else { "failure" });
        result
    }

    async fn run_upstream(self: Arc<Self>, mut receiver: Box<dyn FrameReceiver>) {
        loop {
            match self.forward_from_upstream(receiver.as_mut()).await {
                PassEnd::UpstreamClosed => {}
                PassEnd::ClientGone | PassEnd::Cancelled => return,
            }

            receiver = loop {
                match self.reconnect().await {
                    Ok(next) => break next,
                    Err(RelayError::Upstream(_)) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream lost for good, closing session");
                        self.close_client(Some(CloseReason::upstream_unavailable()))
                            .await;
                        self.teardown().await;
                        return;
                    }
                }
            };
        }
    }

    /// Copy upstream frames to the client until something breaks.
    async fn forward_from_upstream(&self, receiver: &mut dyn FrameReceiver) -> PassEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PassEnd::Cancelled,
                next = receiver.recv() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::info!(error = %e, "Upstream connection failed");
                    return PassEnd::UpstreamClosed;
                }
                None => {
                    tracing::info!("Upstream connection closed");
                    return PassEnd::UpstreamClosed;
                }
            };

            inspect::trace_frame("upstream", &frame);
            let (kind, len) = (frame.kind(), frame.len());

            let sent = {
                let mut client = self.client_tx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return PassEnd::Cancelled,
                    sent = client.send(frame) => sent,
                }
            };
            if let Err(e) = sent {
                tracing::warn!(error = %e, "Failed to forward upstream message to client");
                return PassEnd::ClientGone;
            }

            metrics::record_frame("upstream", kind, len);
            tracing::debug!(len, "Forwarded upstream message");
        }
    }

    async fn run_client(self: Arc<Self>) {
        let Some(mut receiver) = self.client_rx.lock().await.take() else {
            tracing::warn!("Client task already started");
            return;
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = receiver.recv() => next,
            };

            match next {
                Some(Ok(frame)) => self.forward_to_upstream(frame).await,
                Some(Err(e)) => {
                    tracing::info!(error = %e, "Client connection failed");
                    break;
                }
                None => {
                    tracing::info!("Client closed the connection");
                    break;
                }
            }
        }

        self.teardown().await;
    }

    async fn forward_to_upstream(&self, frame: Frame) {
        inspect::trace_frame("client", &frame);
        let (kind, len) = (frame.kind(), frame.len());

        let (mut sender, generation) = {
            let mut slot = self.upstream_tx.lock().await;
            let Some(sender) = slot.sender.take() else {
                metrics::increment_dropped_frames();
                tracing::warn!(len, "Upstream not ready, dropping client message");
                return;
            };
            (sender, slot.generation)
        };

        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            sent = sender.send(frame) => Some(sent),
        };
        match sent {
            Some(Ok(())) => {
                metrics::record_frame("client", kind, len);
                tracing::debug!(len, "Forwarded client message");
            }
            Some(Err(e)) => tracing::warn!(error = %e, "Failed to forward client message"),
            None => tracing::debug!(len, "Write to upstream abandoned on teardown"),
        }

        let sender = {
            let mut slot = self.upstream_tx.lock().await;
            let current = slot.generation == generation && slot.sender.is_none();
            if current && !self.shutdown.is_cancelled() {
                slot.sender = Some(sender);
                return;
            }
            sender
        };
        // Replaced or torn down while the write was in flight
        self.close_upstream(sender).await;
    }
}

impl fmt::Debug for RelayInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayInstance")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("target", &self.target.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::time::timeout;

    use super::*;
    use crate::adapters::memory::{DialOutcome, MemoryPeer, ScriptedDialer, memory_duplex};

    const STEP: Duration = Duration::from_secs(1);

    struct Harness {
        registry: RelayRegistry,
        dialer: Arc<ScriptedDialer>,
        relay: Arc<RelayInstance>,
        client: MemoryPeer,
    }

    /// Sender whose writes and closes never complete.
    struct StalledSender;

    #[async_trait::async_trait]
    impl FrameSender for StalledSender {
        async fn send(&mut self, _frame: Frame) -> ChannelResult<()> {
            std::future::pending().await
        }

        async fn close(&mut self, _reason: Option<CloseReason>) -> ChannelResult<()> {
            std::future::pending().await
        }
    }

    /// Keep the receiving half of `channel` but write through a stalled sender.
    fn stall_writes(channel: DuplexChannel) -> DuplexChannel {
        let (_sender, receiver) = channel.into_parts();
        DuplexChannel {
            sender: Box::new(StalledSender),
            receiver,
        }
    }

    fn harness(policy: ReconnectPolicy) -> Harness {
        harness_with_client(policy, |channel| channel)
    }

    fn harness_with_client(
        policy: ReconnectPolicy,
        wrap: impl FnOnce(DuplexChannel) -> DuplexChannel,
    ) -> Harness {
        let registry = RelayRegistry::new();
        let dialer = Arc::new(ScriptedDialer::new());
        let (client_side, client) = memory_duplex();
        let client_side = wrap(client_side);
        let relay = RelayInstance::new(
            AppId::new(42),
            Url::parse("ws://upstream.test/gateway").unwrap(),
            client_side,
            RelayContext::new(dialer.clone(), registry.clone(), policy),
        );
        Harness {
            registry,
            dialer,
            relay,
            client,
        }
    }

    async fn establish(h: &Harness) -> MemoryPeer {
        let upstream = h.dialer.push_connected();
        h.relay.connect().await.unwrap();
        h.registry.register(h.relay.clone()).await;
        h.relay.start();
        upstream
    }

    #[tokio::test]
    async fn test_upstream_frames_reach_client_in_order() {
        let mut h = harness(ReconnectPolicy::default());
        let upstream = establish(&h).await;

        for text in ["ping", "one", "two"] {
            upstream.send(Frame::from(text));
        }
        upstream.send(Frame::Binary(bytes::Bytes::from_static(&[1, 2, 3])));

        assert_eq!(h.client.recv().await, Some(Frame::from("ping")));
        assert_eq!(h.client.recv().await, Some(Frame::from("one")));
        assert_eq!(h.client.recv().await, Some(Frame::from("two")));
        assert_eq!(
            h.client.recv().await,
            Some(Frame::Binary(bytes::Bytes::from_static(&[1, 2, 3])))
        );
    }

    #[tokio::test]
    async fn test_client_frames_reach_upstream() {
        let h = harness(ReconnectPolicy::default());
        let mut upstream = establish(&h).await;

        h.client.send(Frame::from(r#"{"op":1,"d":null}"#));
        h.client.send(Frame::from("second"));

        assert_eq!(
            upstream.recv().await,
            Some(Frame::from(r#"{"op":1,"d":null}"#))
        );
        assert_eq!(upstream.recv().await, Some(Frame::from("second")));
    }

    #[tokio::test]
    async fn test_client_close_tears_down() {
        let h = harness(ReconnectPolicy::default());
        let mut upstream = establish(&h).await;
        assert_eq!(h.registry.instance_count().await, 1);

        drop(h.client);

        // Upstream sees its channel closed once the instance is gone
        assert_eq!(timeout(STEP, upstream.recv()).await.unwrap(), None);
        assert!(!h.relay.is_active().await);
        assert!(!h.registry.contains(AppId::new(42)).await);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let h = harness(ReconnectPolicy::default());
        let _upstream = establish(&h).await;

        h.relay.teardown().await;
        h.relay.teardown().await;

        assert!(!h.relay.is_active().await);
        assert!(!h.relay.has_upstream().await);
        assert_eq!(h.registry.identity_count(), 0);
        assert!(matches!(h.relay.connect().await, Err(RelayError::Inactive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_upstream_drop() {
        let mut h = harness(ReconnectPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        });
        let first = establish(&h).await;
        let second = h.dialer.push_connected();

        drop(first);
        // Message sent by the replacement upstream arrives after the delay
        second.send(Frame::from("after-reconnect"));
        assert_eq!(
            timeout(Duration::from_secs(6), h.client.recv()).await.unwrap(),
            Some(Frame::from("after-reconnect"))
        );
        assert_eq!(h.dialer.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(h.relay.reconnect_count().await, 0);
        assert!(h.relay.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_frames_dropped_while_reconnecting() {
        let h = harness(ReconnectPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        });
        let first = establish(&h).await;
        let mut second = h.dialer.push_connected();

        drop(first);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!h.relay.has_upstream().await);
        h.client.send(Frame::from("lost"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.relay.has_upstream().await);
        h.client.send(Frame::from("kept"));

        assert_eq!(second.recv().await, Some(Frame::from("kept")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let mut h = harness(ReconnectPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        });
        let upstream = establish(&h).await;
        for _ in 0..5 {
            h.dialer.push(DialOutcome::Refuse);
        }

        drop(upstream);

        // Client is closed once three delayed dials have failed
        assert_eq!(
            timeout(Duration::from_secs(16), h.client.recv()).await.unwrap(),
            None
        );
        assert_eq!(
            h.client.close_reason(),
            Some(CloseReason::upstream_unavailable())
        );
        // Initial connect + exactly max_retries attempts
        assert_eq!(h.dialer.attempts.load(Ordering::SeqCst), 4);
        assert!(!h.relay.is_active().await);
        assert_eq!(h.registry.instance_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_interrupts_reconnect_delay() {
        let h = harness(ReconnectPolicy {
            max_retries: 10,
            retry_delay: Duration::from_secs(60),
        });
        let upstream = establish(&h).await;
        drop(upstream);
        tokio::time::sleep(Duration::from_secs(1)).await;

        timeout(STEP, h.relay.teardown()).await.unwrap();
        assert!(!h.relay.is_active().await);
        // Only the initial dial happened
        assert_eq!(h.dialer.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_write_failure_does_not_reconnect() {
        let mut h = harness(ReconnectPolicy::default());
        let upstream = establish(&h).await;

        h.client.close_inbound();
        upstream.send(Frame::from("undeliverable"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.dialer.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initial_dial_failure_is_reported() {
        let h = harness(ReconnectPolicy::default());
        h.dialer.push(DialOutcome::Refuse);
        assert!(matches!(
            h.relay.connect().await,
            Err(RelayError::Upstream(ChannelError::Dial { .. }))
        ));
        assert!(!h.relay.has_upstream().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_interrupts_hanging_dial() {
        let mut h = harness(ReconnectPolicy {
            max_retries: 10,
            retry_delay: Duration::from_secs(1),
        });
        let upstream = establish(&h).await;
        h.dialer.push(DialOutcome::Hang);

        drop(upstream);
        // Past the delay, the replacement dial is now pending forever
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.dialer.attempts(), 2);

        timeout(STEP, h.relay.teardown()).await.unwrap();
        assert!(!h.relay.is_active().await);
        assert_eq!(h.registry.instance_count().await, 0);
        // The upstream task gave up and closed the client
        assert_eq!(timeout(STEP, h.client.recv()).await.unwrap(), None);
        assert_eq!(h.dialer.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_interrupts_initial_dial() {
        let h = harness(ReconnectPolicy::default());
        h.dialer.push(DialOutcome::Hang);

        let connecting = {
            let relay = h.relay.clone();
            tokio::spawn(async move { relay.connect().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        timeout(STEP, h.relay.teardown()).await.unwrap();
        let result = timeout(STEP, connecting).await.unwrap().unwrap();
        assert!(matches!(result, Err(RelayError::Inactive)));
        assert!(!h.relay.has_upstream().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_behind_stalled_upstream_write() {
        let h = harness(ReconnectPolicy::default());
        let (channel, _upstream) = memory_duplex();
        h.dialer.push(DialOutcome::Connected(stall_writes(channel)));
        h.relay.connect().await.unwrap();
        h.registry.register(h.relay.clone()).await;
        let client_task = h.relay.start();

        // The client task is now parked in a write that never finishes
        h.client.send(Frame::from("stuck"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(h.client);

        let closed = timeout(Duration::from_secs(5), h.registry.shutdown_all())
            .await
            .unwrap();
        assert_eq!(closed, 1);
        assert_eq!(h.registry.instance_count().await, 0);
        assert!(!h.relay.is_active().await);
        timeout(Duration::from_secs(5), client_task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes_behind_stalled_client_write() {
        let h = harness_with_client(ReconnectPolicy::default(), stall_writes);
        let upstream = establish(&h).await;

        // The upstream task is now parked writing to the client
        upstream.send(Frame::from("stuck"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let closed = timeout(Duration::from_secs(5), h.registry.shutdown_all())
            .await
            .unwrap();
        assert_eq!(closed, 1);
        assert_eq!(h.registry.instance_count().await, 0);
        assert!(!h.relay.has_upstream().await);
    }
}
