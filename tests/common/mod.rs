#![allow(dead_code)]

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body;
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use hyper::{Request, StatusCode, header::HeaderMap};
use relaygate::{
    adapters::{HttpClientAdapter, HttpHandler, TungsteniteDialer},
    config::{ForwardConfig, RelayConfig, ServerConfig},
    core::{ForwardService, ReconnectPolicy, RelayContext, RelayRegistry, SessionAcceptor},
    ports::http_client::HttpClient,
};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub fn test_config(forward_timeout_secs: u64) -> ServerConfig {
    ServerConfig::builder()
        .listen_addr("127.0.0.1:0")
        .without_tls()
        .relay(RelayConfig {
            max_retries: 3,
            retry_delay_ms: 50,
            connect_timeout_ms: 2_000,
        })
        .forward(ForwardConfig {
            timeout_secs: forward_timeout_secs,
            ..ForwardConfig::default()
        })
        .build()
}

/// Run the full router on a loopback port.
pub async fn spawn_gateway(config: ServerConfig) -> (SocketAddr, RelayRegistry) {
    let registry = RelayRegistry::new();
    let context = RelayContext::new(
        Arc::new(TungsteniteDialer::new(config.relay.connect_timeout())),
        registry.clone(),
        ReconnectPolicy::from(&config.relay),
    );
    let client = Arc::new(HttpClientAdapter::new().unwrap());
    let forward = ForwardService::new(client, &config.forward).unwrap();
    let app = HttpHandler::new(SessionAcceptor::new(context), forward).router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (addr, registry)
}

/// WebSocket server echoing every data frame back.
pub async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    let data = message.is_text() || message.is_binary();
                    if data && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// WebSocket server whose first connection says "first" and closes; later ones
/// say "second" and then echo.
pub async fn spawn_flaky_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut accepted = 0usize;
        while let Ok((socket, _)) = listener.accept().await {
            accepted += 1;
            let first = accepted == 1;
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(socket).await else {
                    return;
                };
                if first {
                    let _ = ws.send(Message::Text("first".into())).await;
                    let _ = ws.close(None).await;
                    return;
                }
                let _ = ws.send(Message::Text("second".into())).await;
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() && ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// A loopback address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn session_url(gateway: SocketAddr, path: &str, app_id: &str, upstream: &str) -> String {
    format!(
        "ws://{gateway}{path}?appid={app_id}&url={}",
        encode(upstream)
    )
}

/// Plain HTTP request through the crate's own client adapter.
pub async fn http_get(
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, HeaderMap, bytes::Bytes) {
    let client = HttpClientAdapter::new().unwrap();
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = client
        .send_request(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

/// Poll `check` until it holds or `limit` elapses.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}
