//! Accepting client sessions: parameter validation and relay start-up.
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::{
    core::{
        registry::{AppId, RelayRegistry},
        relay::{RelayContext, RelayError, RelayInstance},
    },
    metrics,
    ports::{CloseReason, DuplexChannel},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid appid: {0}")]
    InvalidAppId(String),

    #[error("Invalid upstream url: {0}")]
    InvalidTarget(String),
}

/// Validated query parameters of a session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub app_id: AppId,
    pub target: Url,
}

impl SessionParams {
    /// Validate raw `appid` and `url` query values.
    pub fn parse(app_id: Option<&str>, url: Option<&str>) -> Result<Self, SessionError> {
        let app_id = app_id
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingParameter("appid"))?;
        let url = url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SessionError::MissingParameter("url"))?;

        let app_id = app_id
            .parse::<AppId>()
            .map_err(|e| SessionError::InvalidAppId(format!("{app_id}: {e}")))?;

        let target =
            Url::parse(url).map_err(|e| SessionError::InvalidTarget(format!("{url}: {e}")))?;
        if !matches!(target.scheme(), "ws" | "wss") {
            return Err(SessionError::InvalidTarget(format!(
                "{url}: scheme must be ws or wss"
            )));
        }

        Ok(Self { app_id, target })
    }
}

/// Turns an upgraded client connection into a registered, running relay.
#[derive(Clone)]
pub struct SessionAcceptor {
    context: RelayContext,
}

impl SessionAcceptor {
    pub fn new(context: RelayContext) -> Self {
        Self { context }
    }

    pub fn registry(&self) -> &RelayRegistry {
        &self.context.registry
    }

    /// Dial the upstream for `client`, register the relay and start forwarding.
    ///
    /// If the dial fails the client is closed with 1011 and nothing is registered.
    pub async fn accept(
        &self,
        params: SessionParams,
        client: DuplexChannel,
    ) -> Result<Arc<RelayInstance>, RelayError> {
        let SessionParams { app_id, target } = params;
        let relay = RelayInstance::new(app_id, target, client, self.context.clone());

        if let Err(e) = relay.connect().await {
            tracing::warn!(app.id = %app_id, error = %e, "Upstream dial failed, rejecting session");
            metrics::increment_sessions("dial_failed");
            relay.shutdown(CloseReason::upstream_unavailable()).await;
            return Err(e);
        }

        let count = self.context.registry.register(relay.clone()).await;

        // The upstream may already have been lost for good between dial and registration.
        if !relay.is_active().await {
            self.context.registry.remove(app_id, &relay).await;
            metrics::increment_sessions("dial_failed");
            return Err(RelayError::Inactive);
        }

        relay.start();
        metrics::increment_sessions("accepted");
        tracing::info!(
            app.id = %app_id,
            session.id = %relay.id(),
            instances = count,
            applications = self.context.registry.identity_count(),
            "Relay session established"
        );
        Ok(relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::memory::{DialOutcome, ScriptedDialer, memory_duplex},
        core::relay::ReconnectPolicy,
        ports::Frame,
    };

    fn acceptor(dialer: Arc<ScriptedDialer>) -> SessionAcceptor {
        SessionAcceptor::new(RelayContext::new(
            dialer,
            RelayRegistry::new(),
            ReconnectPolicy::default(),
        ))
    }

    fn params() -> SessionParams {
        SessionParams::parse(Some("42"), Some("wss://api.sgroup.qq.com/websocket")).unwrap()
    }

    #[test]
    fn test_parse_valid_params() {
        let params = params();
        assert_eq!(params.app_id, AppId::new(42));
        assert_eq!(params.target.scheme(), "wss");
    }

    #[test]
    fn test_parse_rejects_missing_and_malformed() {
        assert_eq!(
            SessionParams::parse(None, Some("ws://a")),
            Err(SessionError::MissingParameter("appid"))
        );
        assert_eq!(
            SessionParams::parse(Some("1"), Some("  ")),
            Err(SessionError::MissingParameter("url"))
        );
        assert!(matches!(
            SessionParams::parse(Some("abc"), Some("ws://a")),
            Err(SessionError::InvalidAppId(_))
        ));
        assert!(matches!(
            SessionParams::parse(Some(" 42"), Some("ws://a")),
            Err(SessionError::InvalidAppId(_))
        ));
        assert!(matches!(
            SessionParams::parse(Some("1"), Some("not a url")),
            Err(SessionError::InvalidTarget(_))
        ));
        assert!(matches!(
            SessionParams::parse(Some("1"), Some("https://example.com")),
            Err(SessionError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_registers_and_relays() {
        let dialer = Arc::new(ScriptedDialer::new());
        let upstream = dialer.push_connected();
        let acceptor = acceptor(dialer);
        let (client, mut peer) = memory_duplex();

        let relay = acceptor.accept(params(), client).await.unwrap();
        assert!(relay.is_active().await);
        assert_eq!(acceptor.registry().instances(AppId::new(42)).await.len(), 1);

        upstream.send("ping");
        assert_eq!(peer.recv().await, Some(Frame::from("ping")));
    }

    #[tokio::test]
    async fn test_dial_failure_closes_client_and_registers_nothing() {
        let dialer = Arc::new(ScriptedDialer::new());
        dialer.push(DialOutcome::Refuse);
        let acceptor = acceptor(dialer);
        let (client, mut peer) = memory_duplex();

        assert!(acceptor.accept(params(), client).await.is_err());
        assert_eq!(peer.recv().await, None);
        assert_eq!(
            peer.close_reason(),
            Some(CloseReason::upstream_unavailable())
        );
        assert_eq!(acceptor.registry().identity_count(), 0);
    }

    #[tokio::test]
    async fn test_sessions_share_identity() {
        let dialer = Arc::new(ScriptedDialer::new());
        let _a = dialer.push_connected();
        let _b = dialer.push_connected();
        let acceptor = acceptor(dialer);

        let (first, _p1) = memory_duplex();
        let (second, _p2) = memory_duplex();
        acceptor.accept(params(), first).await.unwrap();
        acceptor.accept(params(), second).await.unwrap();

        assert_eq!(acceptor.registry().identity_count(), 1);
        assert_eq!(acceptor.registry().instance_count().await, 2);
    }
}
