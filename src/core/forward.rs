//! One-shot HTTP forwarding to an arbitrary target URL.
//!
//! The target comes from the `url` query parameter; every other query
//! parameter is set on the target's query. Compressed upstream responses are
//! decompressed before being relayed when the encoding is understood.
use std::{sync::Arc, time::Duration};

use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use thiserror::Error;
use url::Url;

use crate::{
    config::ForwardConfig,
    core::decompress::{self, ContentEncoding},
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
};

/// Request headers copied from the caller to the upstream request.
const FORWARDED_HEADERS: [&str; 3] = ["authorization", "x-union-appid", "content-type"];

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ForwardError {
    #[error("Missing url query parameter")]
    MissingUrl,

    #[error("Invalid target url: {0}")]
    InvalidUrl(String),

    #[error("Failed to build upstream request: {0}")]
    Request(String),

    #[error(transparent)]
    Upstream(#[from] HttpClientError),

    #[error("Failed to read upstream body: {0}")]
    Body(String),

    #[error("Upstream did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
}

impl ForwardError {
    /// Status code returned to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Request(_) | Self::Upstream(_) | Self::Body(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message placed in the JSON `error` field; details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingUrl => "Missing URL",
            Self::InvalidUrl(_) => "Invalid URL",
            Self::Timeout(_) => "Proxy timeout",
            Self::Request(_) | Self::Upstream(_) | Self::Body(_) => "Proxy error",
        }
    }
}

/// Resolve the target URL from the raw query string of a `/proxy` request.
pub fn target_url(query: Option<&str>) -> Result<Url, ForwardError> {
    let pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();

    let raw = pairs
        .iter()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(ForwardError::MissingUrl)?;

    let mut target = Url::parse(raw).map_err(|e| ForwardError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(target.scheme(), "http" | "https") || !target.has_host() {
        return Err(ForwardError::InvalidUrl(raw.to_string()));
    }

    let mut merged: Vec<(String, String)> = target.query_pairs().into_owned().collect();
    let mut overridden: Vec<&str> = Vec::new();
    for (key, value) in pairs.iter().filter(|(k, _)| k != "url") {
        // First value wins for repeated caller parameters
        if overridden.contains(&key.as_str()) {
            continue;
        }
        overridden.push(key);
        merged.retain(|(k, _)| k != key);
        merged.push((key.clone(), value.clone()));
    }

    if !overridden.is_empty() {
        target.query_pairs_mut().clear().extend_pairs(&merged);
    }
    Ok(target)
}

/// Forwards single requests through an [`HttpClient`].
#[derive(Clone)]
pub struct ForwardService {
    client: Arc<dyn HttpClient>,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl ForwardService {
    pub fn new(client: Arc<dyn HttpClient>, config: &ForwardConfig) -> Result<Self, ForwardError> {
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ForwardError::Request(format!("invalid user agent: {e}")))?;
        Ok(Self {
            client,
            user_agent,
            timeout: config.timeout(),
        })
    }

    /// Forward one request and return the (possibly decompressed) response.
    pub async fn forward(
        &self,
        method: Method,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<AxumBody>, ForwardError> {
        let _timer = metrics::ForwardTimer::new();
        let target = target_url(query)?;
        let request = self.build_request(method, &target, headers, body)?;

        tracing::info!(url = %target, method = %request.method(), "Forwarding request");

        let exchange = async {
            let response = self.client.send_request(request).await?;
            let (parts, body) = response.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| ForwardError::Body(e.to_string()))?
                .to_bytes();
            Ok::<_, ForwardError>((parts, bytes))
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ForwardError::Timeout(self.timeout)),
        };

        let (mut parts, bytes) = match result {
            Ok(exchanged) => exchanged,
            Err(e) => {
                tracing::error!(url = %target, error = %e, "Forward request failed");
                metrics::increment_forward_request(e.status().as_u16());
                return Err(e);
            }
        };

        let bytes = decode_body(&mut parts.headers, bytes);
        metrics::increment_forward_request(parts.status.as_u16());
        tracing::debug!(status = %parts.status, len = bytes.len(), "Forward response ready");
        Ok(Response::from_parts(parts, AxumBody::from(bytes)))
    }

    fn build_request(
        &self,
        method: Method,
        target: &Url,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Request<AxumBody>, ForwardError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(target.as_str())
            .header(header::USER_AGENT, self.user_agent.clone())
            .header(
                header::ACCEPT_ENCODING,
                HeaderValue::from_static(ContentEncoding::ACCEPT_ENCODING),
            );

        for name in FORWARDED_HEADERS {
            if let Some(value) = headers.get(name) {
                builder = builder.header(name, value.clone());
            }
        }

        builder
            .body(AxumBody::from(body))
            .map_err(|e| ForwardError::Request(e.to_string()))
    }
}

/// Undo a supported `Content-Encoding`, fixing up the framing headers.
/// Anything else leaves the bytes and headers untouched.
fn decode_body(headers: &mut HeaderMap, bytes: Bytes) -> Bytes {
    let Some(token) = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return bytes;
    };

    let Some(encoding) = ContentEncoding::parse(&token) else {
        tracing::debug!("Leaving response with content encoding '{}' as is", token);
        metrics::increment_decompress(&token, "passthrough");
        return bytes;
    };

    match decompress::decompress_with(&bytes, encoding) {
        Ok(plain) => {
            metrics::increment_decompress(encoding.as_str(), "ok");
            headers.remove(header::CONTENT_ENCODING);
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plain.len()));
            Bytes::from(plain)
        }
        Err(e) => {
            metrics::increment_decompress(encoding.as_str(), "error");
            tracing::warn!(error = %e, "Decompression failed, relaying original body");
            bytes
        }
    }
}
