//! Evidence claims and their conversion into a [`Report`].
//!
//! Evidence verification yields a list of named, typed, variable-length
//! claims. On the native platform this list is a foreign array backed by
//! platform-owned memory with an explicit free call; [`ClaimList`] wraps it
//! as a bounded buffer whose release hook runs on every exit path.

use std::ops::Deref;

use crate::attestation::report::{Report, TcbStatus};
use crate::error::{TeeError, TeeResult};

pub const CLAIM_SECURITY_VERSION: &str = "security_version";
pub const CLAIM_ATTRIBUTES: &str = "attributes";
pub const CLAIM_UNIQUE_ID: &str = "unique_id";
pub const CLAIM_SIGNER_ID: &str = "signer_id";
pub const CLAIM_PRODUCT_ID: &str = "product_id";
pub const CLAIM_TCB_STATUS: &str = "tcb_status";
pub const CLAIM_SGX_REPORT_DATA: &str = "sgx_report_data";

/// Attribute bit set for debug enclaves.
pub const ATTRIBUTE_DEBUG: u32 = 0x1;
/// Attribute bit set for remotely verifiable evidence.
pub const ATTRIBUTE_REMOTE: u32 = 0x2;

/// One named claim from an evidence-verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub name: String,
    pub value: Vec<u8>,
}

impl Claim {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Claim with a little-endian u32 value, as the platform encodes
    /// integer claims.
    pub fn from_u32(name: impl Into<String>, value: u32) -> Self {
        Self::new(name, value.to_le_bytes().to_vec())
    }

    /// Reads the claim value as a little-endian u32. Values shorter than
    /// four bytes read as zero, matching the platform's accessor.
    pub fn as_u32(&self) -> u32 {
        if self.value.len() < 4 {
            return 0;
        }
        u32::from_le_bytes([self.value[0], self.value[1], self.value[2], self.value[3]])
    }
}

/// A claims buffer with scoped release.
///
/// Dereferences to `[Claim]`. If a release hook is attached, it runs exactly
/// once when the list is dropped, including on error paths. Claims must not
/// be retained past the drop; the borrowed-slice API enforces this.
pub struct ClaimList {
    claims: Vec<Claim>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ClaimList {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self {
            claims,
            release: None,
        }
    }

    /// Attaches a hook that frees the underlying platform buffer on drop.
    pub fn with_release(claims: Vec<Claim>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            claims,
            release: Some(Box::new(release)),
        }
    }
}

impl Deref for ClaimList {
    type Target = [Claim];

    fn deref(&self) -> &[Claim] {
        &self.claims
    }
}

impl Drop for ClaimList {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ClaimList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimList")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Parses an evidence claims list into a [`Report`].
///
/// Unknown claim names are ignored. The attributes claim is mandatory and
/// must assert the remote bit; the TCB status defaults to `Unknown` unless a
/// `tcb_status` claim is present.
pub fn parse_claims(claims: &[Claim]) -> TeeResult<Report> {
    if claims.is_empty() {
        return Err(TeeError::EmptyClaims);
    }

    let mut report = Report::default();
    let mut has_attributes = false;

    for claim in claims {
        match claim.name.as_str() {
            CLAIM_SECURITY_VERSION => report.security_version = claim.as_u32(),
            CLAIM_ATTRIBUTES => {
                has_attributes = true;
                let attributes = claim.as_u32();
                if attributes & ATTRIBUTE_REMOTE == 0 {
                    return Err(TeeError::NotARemoteReport);
                }
                report.debug = attributes & ATTRIBUTE_DEBUG != 0;
            }
            CLAIM_UNIQUE_ID => report.unique_id = claim.value.clone(),
            CLAIM_SIGNER_ID => report.signer_id = claim.value.clone(),
            CLAIM_PRODUCT_ID => report.product_id = claim.value.clone(),
            CLAIM_TCB_STATUS => report.tcb_status = TcbStatus::from(claim.as_u32()),
            CLAIM_SGX_REPORT_DATA => report.data = claim.value.clone(),
            _ => {}
        }
    }

    if !has_attributes {
        return Err(TeeError::MissingAttributesClaim);
    }

    Ok(report)
}
