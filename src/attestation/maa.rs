//! Token exchange with an Azure Attestation provider.
//!
//! A raw report plus arbitrary runtime data go in, a signed JWT comes out.
//! The relying party verifies the token offline against the provider's
//! published signing certificates, so the TLS channel to the provider does
//! not need to be trusted.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use x509_cert::der::Decode;

use crate::attestation::report::Report;
use crate::error::{TeeError, TeeResult};

const ATTEST_PATH: &str = "/attest/OpenEnclave?api-version=2020-10-01";
const CERTS_PATH: &str = "/certs";

/// A validated attestation-provider base URL.
///
/// Keeps the caller's original string: the token issuer claim must match it
/// byte for byte, and URL normalization (e.g. an appended trailing slash)
/// would silently break that comparison.
#[derive(Debug, Clone)]
pub struct BaseUrl {
    url: Url,
    raw: String,
}

impl BaseUrl {
    /// Parses an attestation-provider URL, requiring the `https` scheme.
    pub fn parse_https(s: &str) -> TeeResult<Self> {
        let base = Self::parse(s)?;
        if base.url.scheme() != "https" {
            return Err(TeeError::NotHttps);
        }
        Ok(base)
    }

    fn parse(s: &str) -> TeeResult<Self> {
        let url = Url::parse(s).map_err(|e| TeeError::InvalidUrl(format!("{s}: {e}")))?;
        Ok(Self {
            url,
            raw: s.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.raw.trim_end_matches('/'))
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttestOpenEnclaveRequest {
    report: String,
    runtime_data: RuntimeData,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeData {
    data: String,
    data_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct KeySet {
    keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
struct KeyEntry {
    kid: String,
    #[serde(default)]
    x5c: Vec<String>,
}

#[derive(Deserialize)]
struct TokenClaims {
    iat: Option<i64>,
    #[serde(rename = "x-ms-sgx-ehd", default)]
    enclave_held_data: String,
    #[serde(rename = "x-ms-sgx-svn", default)]
    security_version: u32,
    #[serde(rename = "x-ms-sgx-is-debuggable", default)]
    is_debuggable: bool,
    #[serde(rename = "x-ms-sgx-mrenclave", default)]
    mrenclave: String,
    #[serde(rename = "x-ms-sgx-mrsigner", default)]
    mrsigner: String,
    #[serde(rename = "x-ms-sgx-product-id", default)]
    product_id: u16,
}

/// Sends a raw report and `data` to the attestation provider and returns
/// the resulting token.
///
/// `data` must be the same bytes the report's data field commits to; the
/// provider rejects the request otherwise. The provider's TLS certificate is
/// not checked: the token is the trust anchor, and the caller may not have
/// any CA roots available.
pub fn create_azure_attestation_token(
    report: &[u8],
    data: &[u8],
    url: &BaseUrl,
) -> TeeResult<String> {
    let request = AttestOpenEnclaveRequest {
        report: URL_SAFE_NO_PAD.encode(report),
        runtime_data: RuntimeData {
            data: URL_SAFE_NO_PAD.encode(data),
            data_type: "Binary",
        },
    };

    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| TeeError::Transport(format!("failed to build client: {e}")))?;

    let endpoint = url.endpoint(ATTEST_PATH);
    debug!(%endpoint, "requesting attestation token");
    let response = client
        .post(&endpoint)
        .json(&request)
        .send()
        .map_err(|e| TeeError::Transport(format!("attestation request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(TeeError::ProviderStatus(status.as_u16()));
    }

    let body: TokenResponse = response
        .json()
        .map_err(|e| TeeError::Token(format!("invalid token response: {e}")))?;
    Ok(body.token)
}

/// Verifies a token issued by the attestation provider at `url` and returns
/// the report attested by its claims.
///
/// The signing key is looked up by key ID in the provider's certificate
/// endpoint, and the token must name `url` as its issuer. The returned
/// report has an unknown TCB status; the provider already gated on it when
/// issuing the token.
pub fn verify_azure_attestation_token(raw_token: &str, url: &BaseUrl) -> TeeResult<Report> {
    let header = jsonwebtoken::decode_header(raw_token)
        .map_err(|e| TeeError::Token(format!("invalid token header: {e}")))?;
    let kid = header
        .kid
        .ok_or_else(|| TeeError::Token("token header has no key ID".into()))?;

    let key = fetch_signing_key(url, &kid)?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&[url.as_str()]);
    validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
    validation.validate_nbf = true;
    validation.leeway = 0;

    let token = jsonwebtoken::decode::<TokenClaims>(raw_token, &key, &validation)
        .map_err(|e| TeeError::Token(format!("token validation failed: {e}")))?;
    let claims = token.claims;

    // exp and nbf are checked above; iat needs a manual bound.
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| TeeError::Token(e.to_string()))?
        .as_secs() as i64;
    if claims.iat.is_some_and(|iat| iat > now) {
        return Err(TeeError::Token("token issued in the future".into()));
    }

    Ok(Report {
        data: URL_SAFE_NO_PAD
            .decode(claims.enclave_held_data.trim_end_matches('='))
            .map_err(|e| TeeError::Token(format!("invalid enclave-held data: {e}")))?,
        security_version: claims.security_version,
        debug: claims.is_debuggable,
        unique_id: hex::decode(&claims.mrenclave)
            .map_err(|e| TeeError::Token(format!("invalid mrenclave: {e}")))?,
        signer_id: hex::decode(&claims.mrsigner)
            .map_err(|e| TeeError::Token(format!("invalid mrsigner: {e}")))?,
        product_id: product_id_bytes(claims.product_id),
        ..Default::default()
    })
}

/// Product IDs are 16-byte fields on the platform but small integers in the
/// token; re-encode little-endian into the full-width field.
fn product_id_bytes(product_id: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 16];
    bytes[..2].copy_from_slice(&product_id.to_le_bytes());
    bytes
}

fn fetch_signing_key(url: &BaseUrl, kid: &str) -> TeeResult<DecodingKey> {
    let endpoint = url.endpoint(CERTS_PATH);
    let key_set: KeySet = reqwest::blocking::get(&endpoint)
        .map_err(|e| TeeError::Transport(format!("certificate request failed: {e}")))?
        .json()
        .map_err(|e| TeeError::Token(format!("invalid certificate response: {e}")))?;

    let entry = key_set
        .keys
        .iter()
        .find(|entry| entry.kid == kid)
        .ok_or_else(|| TeeError::Token(format!("no signing key with ID {kid}")))?;
    let leaf = entry
        .x5c
        .first()
        .ok_or_else(|| TeeError::Token(format!("signing key {kid} has no certificate")))?;

    let der = STANDARD
        .decode(leaf)
        .map_err(|e| TeeError::Token(format!("invalid signing certificate: {e}")))?;
    let cert = x509_cert::Certificate::from_der(&der)
        .map_err(|e| TeeError::Token(format!("failed to parse signing certificate: {e}")))?;

    let public_key = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| TeeError::Token("signing key has unused bits".into()))?;
    Ok(DecodingKey::from_rsa_der(public_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::sync::OnceLock;
    use std::thread;

    use jsonwebtoken::{EncodingKey, Header};
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePrivateKey;
    use serde_json::json;

    struct TestKey {
        encoding: EncodingKey,
        x5c: String,
    }

    fn test_key() -> &'static TestKey {
        static KEY: OnceLock<TestKey> = OnceLock::new();
        KEY.get_or_init(|| {
            let private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();

            let pkcs1_pem = private_key
                .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
                .unwrap();
            let encoding = EncodingKey::from_rsa_pem(pkcs1_pem.as_bytes()).unwrap();

            let pkcs8_pem = private_key
                .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
                .unwrap();
            let key_pair = rcgen::KeyPair::from_pkcs8_pem_and_sign_algo(
                &pkcs8_pem,
                &rcgen::PKCS_RSA_SHA256,
            )
            .unwrap();
            let cert = rcgen::CertificateParams::default()
                .self_signed(&key_pair)
                .unwrap();
            let x5c = STANDARD.encode(cert.der().as_ref());

            TestKey { encoding, x5c }
        })
    }

    fn jwks_body() -> String {
        json!({ "keys": [{ "kid": "test-key", "x5c": [test_key().x5c] }] }).to_string()
    }

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn sign_token(claims: serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("test-key".into());
        jsonwebtoken::encode(&header, &claims, &test_key().encoding).unwrap()
    }

    fn standard_claims(issuer: &str) -> serde_json::Value {
        json!({
            "iss": issuer,
            "iat": now() - 60,
            "nbf": now() - 60,
            "exp": now() + 600,
            "x-ms-sgx-ehd": URL_SAFE_NO_PAD.encode([0xaau8; 32]),
            "x-ms-sgx-svn": 3,
            "x-ms-sgx-is-debuggable": true,
            "x-ms-sgx-mrenclave": hex::encode([0x11u8; 32]),
            "x-ms-sgx-mrsigner": hex::encode([0x22u8; 32]),
            "x-ms-sgx-product-id": 0x1234,
        })
    }

    /// Serves one HTTP request with a canned JSON response, handing the raw
    /// request back through the channel.
    fn serve_once(status: &str, body: String) -> (BaseUrl, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        let status = status.to_string();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });

        let base = BaseUrl::parse(&format!("http://{addr}")).unwrap();
        (base, rx)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text
            .lines()
            .find_map(|line| {
                line.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().parse::<usize>().unwrap())
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    #[test]
    fn test_parse_https() {
        let base = BaseUrl::parse_https("https://shared.attest.example").unwrap();
        assert_eq!(base.to_string(), "https://shared.attest.example");
        // No normalization: the raw string survives for issuer matching.
        assert_eq!(base.as_str(), "https://shared.attest.example");
    }

    #[test]
    fn test_parse_https_rejects_other_schemes() {
        assert!(matches!(
            BaseUrl::parse_https("http://attest.example"),
            Err(TeeError::NotHttps)
        ));
        assert!(matches!(
            BaseUrl::parse_https("not a url"),
            Err(TeeError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_create_token_posts_report_and_runtime_data() {
        let (base, rx) = serve_once("200 OK", json!({ "token": "tok" }).to_string());

        let token = create_azure_attestation_token(b"raw report", b"held data", &base).unwrap();
        assert_eq!(token, "tok");

        let request = rx.recv().unwrap();
        assert!(request.starts_with("POST /attest/OpenEnclave?api-version=2020-10-01 "));
        let body: serde_json::Value =
            serde_json::from_str(request.split("\r\n\r\n").nth(1).unwrap()).unwrap();
        assert_eq!(body["report"], URL_SAFE_NO_PAD.encode(b"raw report"));
        assert_eq!(body["runtimeData"]["data"], URL_SAFE_NO_PAD.encode(b"held data"));
        assert_eq!(body["runtimeData"]["dataType"], "Binary");
    }

    #[test]
    fn test_create_token_surfaces_provider_status() {
        let (base, _rx) = serve_once("403 Forbidden", "{}".to_string());
        assert!(matches!(
            create_azure_attestation_token(b"r", b"d", &base),
            Err(TeeError::ProviderStatus(403))
        ));
    }

    #[test]
    fn test_verify_token() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let token = sign_token(standard_claims(base.as_str()));

        let report = verify_azure_attestation_token(&token, &base).unwrap();
        assert_eq!(report.data, vec![0xaa; 32]);
        assert_eq!(report.security_version, 3);
        assert!(report.debug);
        assert_eq!(report.unique_id, vec![0x11; 32]);
        assert_eq!(report.signer_id, vec![0x22; 32]);
        let mut product_id = vec![0u8; 16];
        product_id[..2].copy_from_slice(&0x1234u16.to_le_bytes());
        assert_eq!(report.product_id, product_id);
    }

    #[test]
    fn test_verify_token_rejects_wrong_issuer() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let token = sign_token(standard_claims("https://other.attest.example"));
        assert!(verify_azure_attestation_token(&token, &base).is_err());
    }

    #[test]
    fn test_verify_token_rejects_expired() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let mut claims = standard_claims(base.as_str());
        claims["exp"] = json!(now() - 10);
        let token = sign_token(claims);
        assert!(verify_azure_attestation_token(&token, &base).is_err());
    }

    #[test]
    fn test_verify_token_rejects_not_yet_valid() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let mut claims = standard_claims(base.as_str());
        claims["nbf"] = json!(now() + 600);
        let token = sign_token(claims);
        assert!(verify_azure_attestation_token(&token, &base).is_err());
    }

    #[test]
    fn test_verify_token_rejects_future_iat() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let mut claims = standard_claims(base.as_str());
        claims["iat"] = json!(now() + 600);
        let token = sign_token(claims);
        assert!(matches!(
            verify_azure_attestation_token(&token, &base),
            Err(TeeError::Token(_))
        ));
    }

    #[test]
    fn test_verify_token_rejects_unknown_key_id() {
        let (base, _rx) = serve_once(
            "200 OK",
            json!({ "keys": [{ "kid": "another-key", "x5c": [test_key().x5c] }] }).to_string(),
        );
        let token = sign_token(standard_claims(base.as_str()));
        assert!(matches!(
            verify_azure_attestation_token(&token, &base),
            Err(TeeError::Token(_))
        ));
    }

    #[test]
    fn test_verify_token_rejects_tampered_signature() {
        let (base, _rx) = serve_once("200 OK", jwks_body());
        let token = sign_token(standard_claims(base.as_str()));
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(verify_azure_attestation_token(&tampered, &base).is_err());
    }
}
