//! Trusted-execution-environment attestation and sealing primitives.
//!
//! This crate covers the enclave lifecycle pieces that sit between an
//! application and the TEE platform:
//!
//! - **Reports and claims**: verifying raw remote evidence into a typed
//!   [`Report`] with a TCB trust level.
//! - **Attested TLS**: X.509 certificates carrying evidence bound to the
//!   certificate key, and rustls configs that verify peers by report instead
//!   of by CA chain.
//! - **Attestation tokens**: exchanging evidence for a signed JWT at an
//!   Azure-style attestation provider, and verifying such tokens offline.
//! - **Sealing**: deriving hardware-bound keys and sealing data so only the
//!   same enclave (or the same signer's product line) can read it back.
//!
//! All platform access goes through the [`TeeGate`] trait, so every
//! operation works against a simulated gate in tests and development.

pub mod attestation;
pub mod enclave;
pub mod error;
pub mod gate;

pub use attestation::{
    create_attestation_certificate, create_attestation_client_tls_config,
    create_attestation_server_tls_config, create_azure_attestation_token, parse_claims,
    verify_azure_attestation_token, verify_remote_report, BaseUrl, CertificateIssuer, Claim,
    ClaimList, Options, Report, TcbStatus, ATTESTATION_OID,
};
pub use enclave::{DerivedKey, DerivedSealKey, SealKeyDeriver, SealPolicy, Sealer};
pub use error::{ErrorKind, TeeError, TeeResult};
pub use gate::{SealKeyResponse, SealMasks, TeeGate};
