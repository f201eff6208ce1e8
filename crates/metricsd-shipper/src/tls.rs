//! Client-side TLS for the shipping transport.

use crate::error::TlsError;
use crate::USER_AGENT;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{Resumption, WebPkiServerVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type Result<T> = std::result::Result<T, TlsError>;

/// TLS settings for the connection to the receiver.
///
/// Versions are written as `"1.2"` or `"1.3"`. Cipher suites use their IANA
/// names, e.g. `TLS13_AES_128_GCM_SHA256`; an empty list keeps the provider
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSecurity {
    pub enabled: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    /// Name checked against the server certificate instead of the URL host.
    pub server_name: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub cipher_suites: Vec<String>,
    pub session_resumption: bool,
}

impl Default for TransportSecurity {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            insecure_skip_verify: false,
            server_name: None,
            min_version: None,
            max_version: None,
            cipher_suites: Vec::new(),
            session_resumption: true,
        }
    }
}

/// Builds the HTTP client used by every transport.
pub fn build_client(security: &TransportSecurity, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT);
    if security.enabled {
        builder = builder.use_preconfigured_tls(client_config(security)?);
    }
    Ok(builder.build()?)
}

/// Assembles the rustls configuration described by `security`.
pub fn client_config(security: &TransportSecurity) -> Result<ClientConfig> {
    let versions = protocol_versions(
        security.min_version.as_deref(),
        security.max_version.as_deref(),
    )?;

    let mut provider = ring::default_provider();
    provider.cipher_suites = select_cipher_suites(&provider, &security.cipher_suites)?;
    let provider = Arc::new(provider);

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)?;

    let builder = if security.insecure_skip_verify {
        tracing::warn!("TLS certificate verification is disabled; the receiver is not authenticated");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
    } else {
        let roots = Arc::new(root_store(security.ca_file.as_deref())?);
        match security.server_name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => {
                let name = ServerName::try_from(name.to_string())
                    .map_err(|_| TlsError::InvalidServerName(name.to_string()))?;
                let inner = WebPkiServerVerifier::builder_with_provider(roots, provider).build()?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(ServerNameOverride { inner, name }))
            }
            None => builder.with_root_certificates(roots),
        }
    };

    let mut config = match (&security.cert_file, &security.key_file) {
        (Some(cert), Some(key)) => {
            builder.with_client_auth_cert(load_certificates(cert)?, load_private_key(key)?)?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => return Err(TlsError::IncompleteClientAuth),
    };

    if !security.session_resumption {
        config.resumption = Resumption::disabled();
    }
    Ok(config)
}

fn parse_version(raw: &str) -> Result<u8> {
    match raw.trim() {
        "1.2" => Ok(12),
        "1.3" => Ok(13),
        other => Err(TlsError::UnsupportedVersion(other.to_string())),
    }
}

/// Resolves the enabled protocol versions; missing bounds mean 1.2 and 1.3.
pub fn protocol_versions(
    min: Option<&str>,
    max: Option<&str>,
) -> Result<Vec<&'static SupportedProtocolVersion>> {
    let lo = min.filter(|v| !v.is_empty()).map(parse_version).transpose()?.unwrap_or(12);
    let hi = max.filter(|v| !v.is_empty()).map(parse_version).transpose()?.unwrap_or(13);
    if lo > hi {
        return Err(TlsError::VersionRange {
            min: min.unwrap_or_default().to_string(),
            max: max.unwrap_or_default().to_string(),
        });
    }

    let mut versions = Vec::with_capacity(2);
    if lo <= 12 && hi >= 12 {
        versions.push(&rustls::version::TLS12);
    }
    if hi >= 13 {
        versions.push(&rustls::version::TLS13);
    }
    Ok(versions)
}

/// Keeps the provider's suites whose IANA name is in `allowed`, in provider
/// preference order.
fn select_cipher_suites(
    provider: &CryptoProvider,
    allowed: &[String],
) -> Result<Vec<rustls::SupportedCipherSuite>> {
    if allowed.is_empty() {
        return Ok(provider.cipher_suites.clone());
    }
    let selected: Vec<_> = provider
        .cipher_suites
        .iter()
        .filter(|suite| {
            let name = format!("{:?}", suite.suite());
            allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(&name))
        })
        .copied()
        .collect();
    if selected.is_empty() {
        return Err(TlsError::NoCipherSuites(allowed.to_vec()));
    }
    Ok(selected)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            for cert in load_certificates(path)? {
                roots.add(cert)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Verifies the chain normally but checks it against a fixed name.
#[derive(Debug)]
struct ServerNameOverride {
    inner: Arc<WebPkiServerVerifier>,
    name: ServerName<'static>,
}

impl ServerCertVerifier for ServerNameOverride {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, &self.name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
