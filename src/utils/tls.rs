//! Server-side TLS material loading.
use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use eyre::{Result, WrapErr, eyre};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use rustls_pemfile::{certs, private_key};

/// Build a rustls server config from a PEM certificate chain and private key.
///
/// Accepts PKCS#8, PKCS#1 and SEC1 keys. Only HTTP/1.1 is offered over ALPN
/// so WebSocket upgrades work for every client.
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<ServerConfig> {
    // Install default crypto provider for rustls if not already set
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_file = &mut BufReader::new(
        File::open(cert_path)
            .wrap_err_with(|| format!("Failed to open cert file {}", cert_path.display()))?,
    );
    let cert_chain: Vec<CertificateDer<'static>> = certs(cert_file)
        .collect::<Result<_, _>>()
        .wrap_err("Failed to parse certificate chain")?;
    if cert_chain.is_empty() {
        return Err(eyre!("No certificates found in {}", cert_path.display()));
    }

    let key_file = &mut BufReader::new(
        File::open(key_path)
            .wrap_err_with(|| format!("Failed to open key file {}", key_path.display()))?,
    );
    let key: PrivateKeyDer<'static> = private_key(key_file)
        .wrap_err("Failed to parse private key")?
        .ok_or_else(|| eyre!("No private key found in {}", key_path.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .wrap_err("Certificate and private key do not form a valid identity")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::info!(cert = %cert_path.display(), "Loaded TLS certificate");
    Ok(config)
}

/// Wrap a server config into an acceptor for the TLS listener.
pub fn acceptor(config: ServerConfig) -> tokio_rustls::TlsAcceptor {
    tokio_rustls::TlsAcceptor::from(Arc::new(config))
}
