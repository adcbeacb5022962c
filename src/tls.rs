// ABOUTME: rustls plumbing for both directions: the inbound TLS listener and vendor TLS dials
// ABOUTME: Server certs come from PEM files; vendor certificates are verified against webpki roots

use crate::error::{GatewayError, Result};
use crate::transport::Stream;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Upper bound on a TLS handshake in either direction
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the acceptor for the inbound TLS listener from a PEM cert chain and key
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path).map_err(|e| {
        GatewayError::Tls(format!("cannot open {}: {e}", cert_path.display()))
    })?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| GatewayError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates in {}",
            cert_path.display()
        )));
    }

    let key_file = File::open(key_path)
        .map_err(|e| GatewayError::Tls(format!("cannot open {}: {e}", key_path.display())))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| GatewayError::Tls(format!("invalid key PEM: {e}")))?
        .ok_or_else(|| GatewayError::Tls(format!("no private key in {}", key_path.display())))?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Complete the server side of a handshake on an accepted socket
pub async fn accept(acceptor: &TlsAcceptor, tcp: TcpStream) -> Result<Stream> {
    let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp))
        .await?
        .map_err(|e| GatewayError::Tls(format!("handshake failed: {e}")))?;
    Ok(Stream::ServerTls(Box::new(tls)))
}

/// Client config for vendor links: TLS 1.2 minimum, verified against webpki roots
pub fn client_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_root_certificates(roots)
    .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Wrap a dialled socket in TLS, verifying the certificate against `host`
pub async fn connect(connector: &TlsConnector, host: &str, tcp: TcpStream) -> Result<Stream> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| GatewayError::Tls(format!("invalid server name '{host}': {e}")))?;
    let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, connector.connect(server_name, tcp))
        .await?
        .map_err(|e| GatewayError::Tls(format!("handshake with {host} failed: {e}")))?;
    Ok(Stream::ClientTls(Box::new(tls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_cert_file() {
        let result = load_acceptor(
            &PathBuf::from("/nonexistent/cert.pem"),
            &PathBuf::from("/nonexistent/key.pem"),
        );
        assert!(matches!(result, Err(GatewayError::Tls(ref msg)) if msg.contains("cert.pem")));
    }

    #[test]
    fn test_empty_cert_file_rejected() {
        let dir = std::env::temp_dir();
        let cert = dir.join(format!("smpp-gw-empty-{}.pem", std::process::id()));
        std::fs::write(&cert, b"").unwrap();

        let result = load_acceptor(&cert, &cert);
        std::fs::remove_file(&cert).ok();
        assert!(matches!(result, Err(GatewayError::Tls(ref msg)) if msg.contains("no certificates")));
    }

    #[test]
    fn test_client_connector_builds() {
        let _ = client_connector();
    }
}
