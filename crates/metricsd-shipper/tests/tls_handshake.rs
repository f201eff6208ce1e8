use metricsd_common::Metric;
use metricsd_shipper::tls::TransportSecurity;
use metricsd_shipper::{build_shipper, ShipError, ShipperConfig, ShipperKind};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn issue(&self, names: &[&str], usage: ExtendedKeyUsagePurpose) -> Leaf {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names).unwrap();
        params.extended_key_usages = vec![usage];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        Leaf { cert, key }
    }

    fn write(&self, dir: &Path, stem: &str) -> PathBuf {
        let path = dir.join(format!("{stem}.pem"));
        std::fs::write(&path, self.cert.pem()).unwrap();
        path
    }
}

struct Leaf {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Leaf {
    fn self_signed(name: &str) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        Self {
            cert: certified.cert,
            key: certified.key_pair,
        }
    }

    fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert.der().clone()]
    }

    fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivatePkcs8KeyDer::from(self.key.serialize_der()).into()
    }

    /// Writes `<stem>.crt` and `<stem>.key` as PEM.
    fn write(&self, dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
        let cert = dir.join(format!("{stem}.crt"));
        let key = dir.join(format!("{stem}.key"));
        std::fs::write(&cert, self.cert.pem()).unwrap();
        std::fs::write(&key, self.key.serialize_pem()).unwrap();
        (cert, key)
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads one HTTP/1.1 request (head plus `content-length` body).
async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < end + 4 + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// TLS receiver answering every request with 204. When `client_ca` is set,
/// clients must present a certificate issued by it.
async fn tls_receiver(
    leaf: &Leaf,
    client_ca: Option<&Authority>,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let provider = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = match client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            roots.add(ca.cert.der().clone()).unwrap();
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let config = builder
        .with_single_cert(leaf.chain(), leaf.private_key())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut stream) = acceptor.accept(tcp).await else {
                    return;
                };
                if let Some(request) = read_request(&mut stream).await {
                    let _ = tx.send(request);
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, rx)
}

fn config(addr: SocketAddr, security: TransportSecurity) -> ShipperConfig {
    ShipperConfig {
        security,
        ..ShipperConfig::new(
            ShipperKind::HttpJson,
            format!("https://localhost:{}/ingest", addr.port()),
        )
    }
}

fn batch() -> Vec<Metric> {
    vec![Metric::gauge("up", 1.0).with_label("hostname", "h1")]
}

#[tokio::test]
async fn mutual_tls_delivers_batch() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Authority::new("metricsd test ca");
    let server = ca.issue(&["localhost"], ExtendedKeyUsagePurpose::ServerAuth);
    let client = ca.issue(&["agent-01"], ExtendedKeyUsagePurpose::ClientAuth);
    let (addr, mut requests) = tls_receiver(&server, Some(&ca)).await;

    let (cert_file, key_file) = client.write(dir.path(), "client");
    let security = TransportSecurity {
        enabled: true,
        ca_file: Some(ca.write(dir.path(), "ca")),
        cert_file: Some(cert_file),
        key_file: Some(key_file),
        ..Default::default()
    };
    let shipper = build_shipper(&config(addr, security)).unwrap();
    shipper.ship(&batch()).await.unwrap();

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /ingest HTTP/1.1"));
    assert!(request.contains("\"name\":\"up\""));
}

#[tokio::test]
async fn untrusted_authority_fails_the_ship() {
    let dir = tempfile::tempdir().unwrap();
    let issuer = Authority::new("receiver ca");
    let other = Authority::new("unrelated ca");
    let server = issuer.issue(&["localhost"], ExtendedKeyUsagePurpose::ServerAuth);
    let (addr, _requests) = tls_receiver(&server, None).await;

    let security = TransportSecurity {
        enabled: true,
        ca_file: Some(other.write(dir.path(), "other")),
        ..Default::default()
    };
    let shipper = build_shipper(&config(addr, security)).unwrap();
    let err = shipper.ship(&batch()).await.unwrap_err();
    assert!(matches!(err, ShipError::Http(_)), "{err}");
}

#[tokio::test]
async fn server_name_override_checks_the_configured_name() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Authority::new("metricsd test ca");
    let server = ca.issue(&["receiver.internal"], ExtendedKeyUsagePurpose::ServerAuth);
    let (addr, mut requests) = tls_receiver(&server, None).await;
    let ca_file = ca.write(dir.path(), "ca");

    // The URL host is localhost, which the certificate does not cover.
    let plain = TransportSecurity {
        enabled: true,
        ca_file: Some(ca_file.clone()),
        ..Default::default()
    };
    let err = build_shipper(&config(addr, plain))
        .unwrap()
        .ship(&batch())
        .await
        .unwrap_err();
    assert!(matches!(err, ShipError::Http(_)), "{err}");

    let overridden = TransportSecurity {
        enabled: true,
        ca_file: Some(ca_file),
        server_name: Some("receiver.internal".into()),
        ..Default::default()
    };
    build_shipper(&config(addr, overridden))
        .unwrap()
        .ship(&batch())
        .await
        .unwrap();
    assert!(requests.recv().await.is_some());
}

#[tokio::test]
async fn insecure_mode_accepts_self_signed_receiver() {
    let server = Leaf::self_signed("localhost");
    let (addr, mut requests) = tls_receiver(&server, None).await;

    let verified = TransportSecurity {
        enabled: true,
        ..Default::default()
    };
    let err = build_shipper(&config(addr, verified))
        .unwrap()
        .ship(&batch())
        .await
        .unwrap_err();
    assert!(matches!(err, ShipError::Http(_)), "{err}");

    let insecure = TransportSecurity {
        enabled: true,
        insecure_skip_verify: true,
        ..Default::default()
    };
    build_shipper(&config(addr, insecure))
        .unwrap()
        .ship(&batch())
        .await
        .unwrap();
    assert!(requests.recv().await.unwrap().contains("\"hostname\":\"h1\""));
}
