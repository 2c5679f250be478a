//! Remote attestation: reports, claims, certificate binding, and token
//! exchange.

pub mod claims;
pub mod maa;
pub mod report;
pub mod tls;

pub use claims::{parse_claims, Claim, ClaimList};
pub use maa::{create_azure_attestation_token, verify_azure_attestation_token, BaseUrl};
pub use report::{Report, TcbStatus};
pub use tls::{
    create_attestation_certificate, create_attestation_client_tls_config,
    create_attestation_server_tls_config, CertificateIssuer, Options, ATTESTATION_OID,
};

use crate::error::{TeeError, TeeResult};
use crate::gate::TeeGate;

/// Verifies raw remote evidence through the gate and parses the resulting
/// claims into a [`Report`].
pub fn verify_remote_report(gate: &dyn TeeGate, raw_report: &[u8]) -> TeeResult<Report> {
    if raw_report.is_empty() {
        return Err(TeeError::EmptyReport);
    }
    let claims = gate.verify_evidence(raw_report)?;
    parse_claims(&claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::claims::{ATTRIBUTE_REMOTE, CLAIM_ATTRIBUTES, CLAIM_UNIQUE_ID};
    use crate::gate::{SealKeyResponse, SealMasks};

    struct VerifyOnlyGate;

    impl TeeGate for VerifyOnlyGate {
        fn local_report(
            &self,
            _report_data: Option<&[u8]>,
            _target_info: Option<&[u8]>,
        ) -> TeeResult<Vec<u8>> {
            unimplemented!()
        }

        fn remote_report(&self, _report_data: &[u8]) -> TeeResult<Vec<u8>> {
            unimplemented!()
        }

        fn verify_evidence(&self, raw_report: &[u8]) -> TeeResult<ClaimList> {
            if raw_report != b"evidence" {
                return Err(TeeError::Platform("verification failed".into()));
            }
            Ok(ClaimList::new(vec![
                Claim::from_u32(CLAIM_ATTRIBUTES, ATTRIBUTE_REMOTE),
                Claim::new(CLAIM_UNIQUE_ID, vec![0x11; 32]),
            ]))
        }

        fn seal_key(&self, _key_info: &[u8]) -> TeeResult<SealKeyResponse> {
            unimplemented!()
        }

        fn seal_masks(&self) -> SealMasks {
            SealMasks::default()
        }
    }

    #[test]
    fn test_verify_remote_report() {
        let report = verify_remote_report(&VerifyOnlyGate, b"evidence").unwrap();
        assert_eq!(report.unique_id, vec![0x11; 32]);
        assert!(!report.debug);
    }

    #[test]
    fn test_verify_remote_report_rejects_empty_input() {
        assert!(matches!(
            verify_remote_report(&VerifyOnlyGate, &[]),
            Err(TeeError::EmptyReport)
        ));
    }

    #[test]
    fn test_verify_remote_report_propagates_gate_error() {
        assert!(matches!(
            verify_remote_report(&VerifyOnlyGate, b"garbage"),
            Err(TeeError::Platform(_))
        ));
    }
}
