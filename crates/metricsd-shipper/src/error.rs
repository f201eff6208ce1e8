use std::path::PathBuf;

/// Failures while building the transport's TLS configuration.
///
/// All of these are fatal at startup: an agent configured for TLS never
/// falls back to plaintext.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS: failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TLS: no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("TLS: no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS: client certificate and key must be configured together")]
    IncompleteClientAuth,

    #[error("TLS: unsupported protocol version '{0}' (expected \"1.2\" or \"1.3\")")]
    UnsupportedVersion(String),

    #[error("TLS: min_version {min} is greater than max_version {max}")]
    VersionRange { min: String, max: String },

    #[error("TLS: none of the configured cipher suites are supported: {0:?}")]
    NoCipherSuites(Vec<String>),

    #[error("TLS: invalid server name '{0}'")]
    InvalidServerName(String),

    #[error("TLS: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),

    #[error("TLS: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("TLS: failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failures while delivering one batch.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("Ship: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-2xx status.
    #[error("Ship: receiver returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Ship: failed to encode batch: {0}")]
    Encode(String),

    #[error("Ship: unknown shipper type '{0}'")]
    UnknownKind(String),
}

pub type Result<T> = std::result::Result<T, ShipError>;
