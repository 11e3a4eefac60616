//! TLS configuration for the control and data channels.
//!
//! The server certificate is loaded from PEM files at startup. Session IDs
//! are cached server side so clients resuming (FileZilla does this on every
//! data connection) skip the full handshake.

use moka::sync::Cache;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::StoresServerSessions;
use rustls::{ClientConfig, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures building the TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key file could not be read.
    #[error("failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),
    /// The PEM contents were unusable.
    #[error("invalid TLS material: {0}")]
    Invalid(String),
}

/// Build the server-side rustls config from PEM certificate chain and key
/// files. Used for both the control channel upgrade and PROT P passive
/// data connections.
pub fn new_server_config<P: AsRef<Path>>(certs_file: P, key_file: P) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certs(certs_file.as_ref())?;
    let key = load_private_key(key_file.as_ref())?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Invalid(e.to_string()))?;
    config.session_storage = TlsSessionCache::new(1024);
    Ok(Arc::new(config))
}

fn load_certs(filename: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certfile = File::open(filename)?;
    let mut reader = BufReader::new(certfile);
    let certs: Result<Vec<CertificateDer<'static>>, std::io::Error> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs?;
    if certs.is_empty() {
        return Err(TlsError::Invalid(format!("no certificates in {}", filename.display())));
    }
    Ok(certs)
}

fn load_private_key(filename: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let keyfile = File::open(filename)?;
    let mut reader = BufReader::new(keyfile);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TlsError::Invalid(format!("no private key in {}", filename.display())))
}

/// Client-mode rustls config for PROT P active-mode data connections.
///
/// In FTPS the server dials the client's data socket in active mode; the
/// peer presents whatever ephemeral certificate its client library cooked
/// up, so verification is deliberately skipped. The channel is still
/// encrypted, which is all PROT P promises here.
pub fn data_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::AcceptAnyServerCert::new()))
        .with_no_client_auth();
    Arc::new(config)
}

/// Server name for the active-mode TLS dial; data sockets are addressed by
/// IP, never by hostname.
pub fn data_server_name(ip: IpAddr) -> ServerName<'static> {
    ServerName::IpAddress(ip.into())
}

// Caches TLS session IDs server side.
#[derive(Debug)]
struct TlsSessionCache {
    cache: Cache<Vec<u8>, Vec<u8>>,
}

impl TlsSessionCache {
    fn new(size: u64) -> Arc<TlsSessionCache> {
        Arc::new(TlsSessionCache {
            cache: Cache::builder().max_capacity(size).time_to_idle(Duration::from_secs(5 * 60)).build(),
        })
    }
}

impl StoresServerSessions for TlsSessionCache {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.cache.insert(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(&key.to_vec())
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        // Not really taking: some clients resume the same session ID for
        // every data connection of a transfer burst.
        self.cache.get(&key.to_vec())
    }

    fn can_cache(&self) -> bool {
        true
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::DigitallySignedStruct;

    #[derive(Debug)]
    pub(super) struct AcceptAnyServerCert {
        provider: CryptoProvider,
    }

    impl AcceptAnyServerCert {
        pub(super) fn new() -> AcceptAnyServerCert {
            AcceptAnyServerCert {
                provider: rustls::crypto::ring::default_provider(),
            }
        }
    }

    impl ServerCertVerifier for AcceptAnyServerCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.provider.signature_verification_algorithms.supported_schemes()
        }
    }
}
