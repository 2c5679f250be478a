//! The call gate into the TEE platform.
//!
//! All operations that need raw reports or hardware-derived keys take their
//! gate as an explicit dependency. The crate never talks to the platform
//! directly, so a simulated gate can stand in for tests and development.
//! Thread safety of the underlying platform call is the caller's contract;
//! the gate itself is treated as opaque.

use crate::attestation::claims::ClaimList;
use crate::error::TeeResult;

/// Platform masks copied into a seal-key request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SealMasks {
    pub flags: u64,
    pub xfrm: u64,
    pub misc_mask: u32,
}

/// Result of a key-derivation call to the platform.
///
/// `Unsupported` is a documented platform signal, not an error: the platform
/// exists but does not implement key derivation (e.g. simulation mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealKeyResponse {
    Key(Vec<u8>),
    Unsupported,
}

/// Low-level operations provided by the TEE platform.
pub trait TeeGate: Send + Sync {
    /// Produces a raw report for local consumption. Both parameters may be
    /// empty; a report without target data is only used to read the
    /// platform's own policy fields.
    fn local_report(&self, report_data: Option<&[u8]>, target_info: Option<&[u8]>)
        -> TeeResult<Vec<u8>>;

    /// Produces a raw report signed for remote verification, binding up to
    /// 64 bytes of caller data.
    fn remote_report(&self, report_data: &[u8]) -> TeeResult<Vec<u8>>;

    /// Verifies raw evidence and returns the resulting claims buffer.
    fn verify_evidence(&self, raw_report: &[u8]) -> TeeResult<ClaimList>;

    /// Derives a key from a serialized key request.
    fn seal_key(&self, key_info: &[u8]) -> TeeResult<SealKeyResponse>;

    /// Platform feature masks for seal-key requests.
    fn seal_masks(&self) -> SealMasks;
}
