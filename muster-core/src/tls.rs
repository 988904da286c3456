//! TLS plumbing for the collective channel.
//!
//! Collective peers do not use a CA. Trust is pinned: every member
//! stores the SHA-256 fingerprint of every other member's certificate,
//! chain validation is disabled, and the presented certificate is
//! compared byte-for-byte against the pin after the handshake. The
//! verifiers here therefore accept any certificate; callers MUST check
//! [`fingerprint_matches`] on the peer certificate before exchanging
//! application data.

use muster_plugin_sdk::ApiError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    ClientConfig, DigitallySignedStruct, DistinguishedName, Error as TlsError, ServerConfig,
    SignatureScheme,
};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// `sha256$<hex>` fingerprint of a DER-encoded certificate.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    format!("sha256${}", hex::encode(Sha256::digest(der)))
}

/// Compare a stored fingerprint against a presented certificate.
pub fn fingerprint_matches(pinned: &str, der: &[u8]) -> bool {
    pinned.to_ascii_lowercase() == certificate_fingerprint(der)
}

/// This member's certificate and private key.
pub struct TlsIdentity {
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Load a PEM certificate chain and private key from disk.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<TlsIdentity, ApiError> {
        let mut cert_reader = BufReader::new(File::open(cert_path)?);
        let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "No certificate found in {}",
                cert_path.display()
            )));
        }
        let mut key_reader = BufReader::new(File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
            ApiError::InvalidArgument(format!("No private key found in {}", key_path.display()))
        })?;
        Ok(TlsIdentity { certs, key })
    }

    /// Fingerprint of the leaf certificate, as peers would pin it.
    pub fn fingerprint(&self) -> String {
        certificate_fingerprint(self.certs[0].as_ref())
    }

    fn clone_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.certs.clone(), self.key.clone_key())
    }
}

fn supported_schemes() -> Vec<SignatureScheme> {
    vec![
        SignatureScheme::ECDSA_NISTP256_SHA256,
        SignatureScheme::ECDSA_NISTP384_SHA384,
        SignatureScheme::ED25519,
        SignatureScheme::RSA_PSS_SHA256,
        SignatureScheme::RSA_PSS_SHA384,
        SignatureScheme::RSA_PSS_SHA512,
        SignatureScheme::RSA_PKCS1_SHA256,
        SignatureScheme::RSA_PKCS1_SHA384,
        SignatureScheme::RSA_PKCS1_SHA512,
    ]
}

/// Accepts any server certificate; trust comes from the post-handshake
/// fingerprint pin, not the chain.
#[derive(Debug)]
struct PinnedByCaller;

impl ServerCertVerifier for PinnedByCaller {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes()
    }
}

/// Demands a client certificate but accepts any; the listener compares
/// its fingerprint against the stored member record afterwards.
#[derive(Debug)]
struct AnyClientCert {
    subjects: Vec<DistinguishedName>,
}

impl ClientCertVerifier for AnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.subjects
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, TlsError> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        supported_schemes()
    }

    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }
}

fn tls_err(context: &str, err: impl std::fmt::Display) -> ApiError {
    ApiError::Wire(format!("{context}: {err}"))
}

/// Connector presenting this member's certificate and deferring peer
/// verification to the fingerprint pin.
pub fn client_connector(identity: &TlsIdentity) -> Result<TlsConnector, ApiError> {
    let (certs, key) = identity.clone_parts();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(PinnedByCaller))
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_err("building client tls config", e))?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Acceptor for the collective listener; requires a client certificate.
pub fn server_acceptor(identity: &TlsIdentity) -> Result<TlsAcceptor, ApiError> {
    let (certs, key) = identity.clone_parts();
    let config = ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(AnyClientCert {
            subjects: Vec::new(),
        }))
        .with_single_cert(certs, key)
        .map_err(|e| tls_err("building server tls config", e))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// How an outbound peer connection can fail before any data flows.
#[derive(Debug, thiserror::Error)]
pub enum PeerConnectError {
    /// TCP or TLS never came up; degrades to per-node unavailability
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    /// The peer is up but presented the wrong certificate; fatal
    #[error("peer certificate does not match pinned fingerprint")]
    CertificateMismatch,
}

/// Connect to a peer and verify its certificate against the pinned
/// fingerprint before returning the stream.
pub async fn connect_pinned(
    address: &str,
    port: u16,
    identity: &TlsIdentity,
    pinned: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, PeerConnectError> {
    let connector =
        client_connector(identity).map_err(|e| PeerConnectError::Unreachable(e.to_string()))?;
    let tcp = TcpStream::connect((address, port))
        .await
        .map_err(|e| PeerConnectError::Unreachable(e.to_string()))?;
    let server_name = ServerName::try_from(address.to_string())
        .map_err(|e| PeerConnectError::Unreachable(e.to_string()))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| PeerConnectError::Unreachable(e.to_string()))?;

    let presented = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or(PeerConnectError::CertificateMismatch)?;
    if !fingerprint_matches(pinned, presented.as_ref()) {
        return Err(PeerConnectError::CertificateMismatch);
    }
    Ok(stream)
}
