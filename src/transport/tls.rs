//! # TLS Upgrade
//!
//! Client-side rustls configuration used after the server accepts an
//! `SSLRequest`.
//!
//! ## Responsibilities
//! - Build a rustls `ClientConfig` from native roots or a root-cert file
//! - Optional client certificate for servers requiring `clientcert`
//! - Insecure mode (no verification) for development servers
//! - Wrap an established TCP stream

use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};

use crate::error::{ProtocolError, Result};

/// TLS client settings for one server.
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    server_name: String,
    insecure: bool,
    root_cert_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

impl TlsClientConfig {
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            insecure: false,
            root_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
        }
    }

    /// Trust the PEM certificates in `path` instead of the system roots.
    pub fn with_root_cert<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.root_cert_path = Some(path.into());
        self
    }

    pub fn with_client_certificate<P: Into<PathBuf>>(mut self, cert_path: P, key_path: P) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Skip certificate verification entirely. Development servers only.
    pub fn insecure(mut self) -> Self {
        warn!("INSECURE MODE ENABLED: server certificate verification is disabled");
        self.insecure = true;
        self
    }

    fn load_certs(path: &PathBuf) -> Result<Vec<Certificate>> {
        let file = File::open(path).map_err(|e| {
            ProtocolError::TlsError(format!("Failed to open {}: {e}", path.display()))
        })?;
        let mut reader = BufReader::new(file);
        let certs = certs(&mut reader)
            .map_err(|_| ProtocolError::TlsError(format!("Failed to parse {}", path.display())))?;
        if certs.is_empty() {
            return Err(ProtocolError::TlsError(format!(
                "No certificates found in {}",
                path.display()
            )));
        }
        Ok(certs.into_iter().map(Certificate).collect())
    }

    // PKCS8 first, then PKCS1 (`BEGIN RSA PRIVATE KEY`).
    fn load_private_key(path: &PathBuf) -> Result<PrivateKey> {
        let file = File::open(path).map_err(ProtocolError::Io)?;
        let mut reader = BufReader::new(file);
        let keys = pkcs8_private_keys(&mut reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse PKCS8 private key".into()))?;
        if let Some(key) = keys.into_iter().next() {
            return Ok(PrivateKey(key));
        }

        reader
            .seek(std::io::SeekFrom::Start(0))
            .map_err(ProtocolError::Io)?;
        let keys = rsa_private_keys(&mut reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse RSA private key".into()))?;
        keys.into_iter()
            .next()
            .map(PrivateKey)
            .ok_or_else(|| ProtocolError::TlsError("No supported private key format found".into()))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();
        match &self.root_cert_path {
            Some(path) => {
                for cert in Self::load_certs(path)? {
                    root_store.add(&cert).map_err(|e| {
                        ProtocolError::TlsError(format!("Failed to add root certificate: {e}"))
                    })?;
                }
            }
            None => {
                let native_certs = rustls_native_certs::load_native_certs().map_err(|e| {
                    ProtocolError::TlsError(format!("Failed to load native certs: {e}"))
                })?;
                for cert in native_certs {
                    // Unparseable system certificates are skipped, not fatal.
                    if let Err(e) = root_store.add(&Certificate(cert.0)) {
                        debug!(error = %e, "Skipping native certificate");
                    }
                }
            }
        }
        Ok(root_store)
    }

    fn client_auth(&self) -> Result<Option<(Vec<Certificate>, PrivateKey)>> {
        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert_path), Some(key_path)) => Ok(Some((
                Self::load_certs(cert_path)?,
                Self::load_private_key(key_path)?,
            ))),
            _ => Ok(None),
        }
    }

    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();
        let client_auth = self.client_auth()?;
        let auth_err =
            |e: rustls::Error| ProtocolError::TlsError(format!("Failed to set client certificate: {e}"));

        if self.insecure {
            struct AcceptAnyServerCert;

            impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
                fn verify_server_cert(
                    &self,
                    _end_entity: &Certificate,
                    _intermediates: &[Certificate],
                    _server_name: &ServerName,
                    _scts: &mut dyn Iterator<Item = &[u8]>,
                    _ocsp_response: &[u8],
                    _now: std::time::SystemTime,
                ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
                    Ok(rustls::client::ServerCertVerified::assertion())
                }
            }

            let builder = builder.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert));
            match client_auth {
                Some((chain, key)) => builder.with_client_auth_cert(chain, key).map_err(auth_err),
                None => Ok(builder.with_no_client_auth()),
            }
        } else {
            let builder = builder.with_root_certificates(self.root_store()?);
            match client_auth {
                Some((chain, key)) => builder.with_client_auth_cert(chain, key).map_err(auth_err),
                None => Ok(builder.with_no_client_auth()),
            }
        }
    }

    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| ProtocolError::TlsError(format!("Invalid server name '{}'", self.server_name)))
    }
}

/// Run the TLS handshake over a TCP stream whose `SSLRequest` was accepted.
#[instrument(skip(stream, config), fields(server_name = %config.server_name))]
pub async fn upgrade(stream: TcpStream, config: &TlsClientConfig) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(Arc::new(config.load_client_config()?));
    let domain = config.server_name()?;
    let tls = connector
        .connect(domain, stream)
        .await
        .map_err(|e| ProtocolError::TlsError(format!("TLS connection failed: {e}")))?;
    debug!("TLS established");
    Ok(tls)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insecure_config_builds_without_roots() {
        let config = TlsClientConfig::new("db.internal").insecure();
        assert!(config.load_client_config().is_ok());
        assert!(config.server_name().is_ok());
    }

    #[test]
    fn missing_root_file_is_tls_error() {
        let config = TlsClientConfig::new("db.internal").with_root_cert("/nonexistent/root.crt");
        assert!(matches!(
            config.load_client_config(),
            Err(ProtocolError::TlsError(_))
        ));
    }

    #[test]
    fn empty_root_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = TlsClientConfig::new("db.internal").with_root_cert(file.path());
        assert!(config.load_client_config().is_err());
    }
}
