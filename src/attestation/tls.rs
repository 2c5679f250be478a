//! Attested TLS: binding reports to X.509 certificates.
//!
//! A report-bearing certificate carries the raw evidence in a custom
//! extension, with the report data holding the SHA-256 hash of the
//! certificate's public key. The verifier recomputes the hash from the
//! certificate it actually received, so the TLS identity and the hardware
//! evidence are cryptographically bound without a certificate authority.

use std::sync::Arc;

use der::Encode;
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::attestation::report::Report;
use crate::error::{ErrorKind, TeeError, TeeResult};

/// Object identifier of the X.509 extension holding the raw evidence.
// https://github.com/openenclave/openenclave/blob/master/include/openenclave/internal/report.h
pub const ATTESTATION_OID: [u64; 9] = [1, 3, 6, 1, 4, 1, 311, 105, 1];

const ATTESTATION_EXTENSION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.105.1");

/// Attestation options for the client-side TLS verifier.
///
/// `ignore_err` whitelists exactly one error kind: if report verification
/// fails with that kind, the handshake continues with the report the error
/// carried. Any other failure aborts. There is deliberately no richer
/// policy surface.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub ignore_err: Option<ErrorKind>,
}

impl Options {
    /// Tolerates an invalid TCB level. Callers must then check the report's
    /// `tcb_status` themselves.
    pub fn ignore_tcb_level() -> Self {
        Self {
            ignore_err: Some(ErrorKind::TcbLevelInvalid),
        }
    }
}

/// Issuer certificate and key for signing a non-self-signed certificate.
pub struct CertificateIssuer<'a> {
    pub certificate: &'a rcgen::Certificate,
    pub key_pair: &'a KeyPair,
}

/// SHA-256 over the canonical (SPKI DER) encoding of a public key.
pub fn hash_public_key(spki_der: &[u8]) -> [u8; 32] {
    Sha256::digest(spki_der).into()
}

/// Creates an X.509 certificate with an embedded report from
/// `get_remote_report`.
///
/// The report is requested over the hash of `key_pair`'s public key and
/// attached under [`ATTESTATION_OID`]. Without an `issuer` the certificate
/// is self-signed.
pub fn create_attestation_certificate<F>(
    get_remote_report: F,
    mut params: CertificateParams,
    key_pair: &KeyPair,
    issuer: Option<CertificateIssuer<'_>>,
) -> TeeResult<CertificateDer<'static>>
where
    F: FnOnce(&[u8]) -> TeeResult<Vec<u8>>,
{
    let hash = hash_public_key(&key_pair.public_key_der());
    let report = get_remote_report(&hash)?;

    params
        .custom_extensions
        .push(CustomExtension::from_oid_content(&ATTESTATION_OID, report));

    let certificate = match issuer {
        None => params.self_signed(key_pair),
        Some(issuer) => params.signed_by(key_pair, issuer.certificate, issuer.key_pair),
    }
    .map_err(|e| TeeError::Certificate(format!("failed to sign certificate: {e}")))?;

    Ok(certificate.der().clone())
}

/// Creates a server-side TLS config with a self-signed, report-bearing
/// certificate (P-256, one-year validity).
pub fn create_attestation_server_tls_config<F>(
    get_remote_report: F,
) -> TeeResult<rustls::ServerConfig>
where
    F: FnOnce(&[u8]) -> TeeResult<Vec<u8>>,
{
    let _ = rustls::crypto::ring::default_provider().install_default();

    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .map_err(|e| TeeError::Certificate(format!("failed to generate key pair: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "attested enclave");
    params.distinguished_name = dn;
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(365);

    let cert = create_attestation_certificate(get_remote_report, params, &key_pair, None)?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|e| TeeError::Certificate(format!("failed to build server config: {e}")))
}

/// Creates a client-side TLS config that verifies a report-bearing
/// certificate instead of a CA chain.
///
/// `verify_report` is called after the certificate has been verified against
/// the report data. The caller must check either the unique ID or the tuple
/// (signer ID, product ID, security version, debug) in the callback.
pub fn create_attestation_client_tls_config<V, C>(
    verify_remote_report: V,
    options: Options,
    verify_report: C,
) -> rustls::ClientConfig
where
    V: Fn(&[u8]) -> TeeResult<Report> + Send + Sync + 'static,
    C: Fn(&Report) -> TeeResult<()> + Send + Sync + 'static,
{
    let _ = rustls::crypto::ring::default_provider().install_default();

    let verifier = AttestedServerVerifier {
        verify_remote_report: Box::new(verify_remote_report),
        verify_report: Box::new(verify_report),
        options,
        supported: rustls::crypto::ring::default_provider().signature_verification_algorithms,
    };

    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth()
}

type VerifyRemoteReportFn = dyn Fn(&[u8]) -> TeeResult<Report> + Send + Sync;
type VerifyReportFn = dyn Fn(&Report) -> TeeResult<()> + Send + Sync;

/// Peer-certificate verifier substituting attestation for chain validation.
struct AttestedServerVerifier {
    verify_remote_report: Box<VerifyRemoteReportFn>,
    verify_report: Box<VerifyReportFn>,
    options: Options,
    supported: WebPkiSupportedAlgorithms,
}

impl std::fmt::Debug for AttestedServerVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestedServerVerifier")
            .field("options", &self.options)
            .finish()
    }
}

fn tls_error(err: TeeError) -> rustls::Error {
    rustls::Error::General(err.to_string())
}

impl AttestedServerVerifier {
    fn verify_attested_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        now: UnixTime,
    ) -> Result<(), TeeError> {
        let cert = Certificate::from_der(end_entity.as_ref())
            .map_err(|e| TeeError::Certificate(format!("failed to parse certificate: {e}")))?;

        // The certificate must validate against itself as the only root.
        // This defeats arbitrary CA chains; trust comes from the report.
        let anchor = webpki::anchor_from_trusted_cert(end_entity)
            .map_err(|e| TeeError::Certificate(format!("invalid trust anchor: {e}")))?;
        let end_entity_cert = webpki::EndEntityCert::try_from(end_entity)
            .map_err(|e| TeeError::Certificate(format!("invalid end-entity certificate: {e}")))?;
        end_entity_cert
            .verify_for_usage(
                self.supported.all,
                &[anchor],
                &[],
                now,
                webpki::KeyUsage::server_auth(),
                None,
                None,
            )
            .map_err(|e| TeeError::Certificate(format!("certificate is not self-signed: {e}")))?;

        let spki_der = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| TeeError::Certificate(format!("failed to encode public key: {e}")))?;
        let hash = hash_public_key(&spki_der);

        let raw_report = cert
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|ext| ext.extn_id == ATTESTATION_EXTENSION_OID)
            .map(|ext| ext.extn_value.as_bytes())
            .ok_or(TeeError::MissingReportExtension)?;

        let report = match (self.verify_remote_report)(raw_report) {
            Ok(report) => report,
            Err(err) if self.options.ignore_err == Some(err.kind()) => {
                warn!(error = %err, "continuing with whitelisted verification error");
                err.into_report().unwrap_or_default()
            }
            Err(err) => return Err(err),
        };

        if report.data.len() < hash.len() || report.data[..hash.len()] != hash {
            return Err(TeeError::ReportDataMismatch);
        }

        (self.verify_report)(&report)?;
        debug!("peer certificate verified against embedded report");
        Ok(())
    }
}

impl ServerCertVerifier for AttestedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.verify_attested_cert(end_entity, now)
            .map_err(tls_error)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported.supported_schemes()
    }
}
