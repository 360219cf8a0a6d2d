use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Sends fully built absolute-URI requests to arbitrary http/https hosts,
/// verifying servers against the platform's native roots. Retries and
/// timeouts belong to the caller.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!("Created forwarding HTTP client");
        Ok(Self { client })
    }

    /// Derive the `Host` header from the request URI.
    fn host_header(req: &Request<AxumBody>) -> HttpClientResult<HeaderValue> {
        let host = req.uri().host().ok_or_else(|| {
            HttpClientError::InvalidRequest(format!("Outgoing URI has no host: {}", req.uri()))
        })?;
        let value = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        HeaderValue::from_str(&value).map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let host = Self::host_header(&req)?;
        req.headers_mut().insert(header::HOST, host);

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        let span = tracing::info_span!(
            "forward_request",
            http.method = %parts.method,
            http.url = %parts.uri,
            http.status_code = tracing::field::Empty,
        );
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        tracing::debug!(parent: &span, "Outgoing request headers: {:?}", parts.headers);

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                span.record("http.status_code", response.status().as_u16());
                let (mut parts, hyper_body) = response.into_parts();
                // Framing is re-done by the server side once the body is buffered.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                span.record("http.status_code", 599u16);
                tracing::error!(parent: &span, "Forward request {} {} failed: {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}
