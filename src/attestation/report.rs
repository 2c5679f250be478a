//! Parsed attestation report and TCB status.

use serde::{Deserialize, Serialize};

/// A parsed enclave report.
///
/// A `Report` is only meaningful together with the verification outcome that
/// produced it: either plain success, or a degraded-trust result carried by
/// [`TeeError::TcbLevelInvalid`](crate::error::TeeError::TcbLevelInvalid).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// The report data that has been included in the report (at most 64
    /// bytes), e.g. the hash of a public key.
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    /// Security version of the enclave image (ISVSVN for SGX).
    pub security_version: u32,
    /// True if the report is for a debug enclave.
    pub debug: bool,
    /// Unique ID of the enclave binary (MRENCLAVE for SGX).
    #[serde(with = "hex")]
    pub unique_id: Vec<u8>,
    /// ID of the enclave's signing authority (MRSIGNER for SGX).
    #[serde(with = "hex")]
    pub signer_id: Vec<u8>,
    /// Product ID of the enclave (ISVPRODID for SGX).
    #[serde(with = "hex")]
    pub product_id: Vec<u8>,
    /// TCB level status of the platform; `Unknown` unless evidence
    /// verification reported one.
    #[serde(default)]
    pub tcb_status: TcbStatus,
}

/// TCB level status of the enclave platform.
///
/// The variants mirror the platform's severity tiers in declaration order.
/// This is not a trust ranking; callers must branch on the exact value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TcbStatus {
    UpToDate,
    OutOfDate,
    Revoked,
    ConfigurationNeeded,
    OutOfDateConfigurationNeeded,
    SwHardeningNeeded,
    ConfigurationAndSwHardeningNeeded,
    Unknown,
}

impl Default for TcbStatus {
    fn default() -> Self {
        TcbStatus::Unknown
    }
}

impl From<u32> for TcbStatus {
    fn from(value: u32) -> Self {
        match value {
            0 => TcbStatus::UpToDate,
            1 => TcbStatus::OutOfDate,
            2 => TcbStatus::Revoked,
            3 => TcbStatus::ConfigurationNeeded,
            4 => TcbStatus::OutOfDateConfigurationNeeded,
            5 => TcbStatus::SwHardeningNeeded,
            6 => TcbStatus::ConfigurationAndSwHardeningNeeded,
            _ => TcbStatus::Unknown,
        }
    }
}

impl TcbStatus {
    /// Returns a description of the TCB status.
    // https://api.portal.trustedservices.intel.com/documentation
    pub fn explain(&self) -> &'static str {
        match self {
            TcbStatus::UpToDate => "TCB level of the SGX platform is up-to-date.",
            TcbStatus::OutOfDate => "TCB level of SGX platform is outdated.",
            TcbStatus::Revoked => {
                "TCB level of SGX platform is revoked. The platform is not trustworthy."
            }
            TcbStatus::ConfigurationNeeded => {
                "TCB level of the SGX platform is up-to-date but additional configuration \
                 of SGX platform may be needed."
            }
            TcbStatus::OutOfDateConfigurationNeeded => {
                "TCB level of SGX platform is outdated and additional configuration \
                 of SGX platform may be needed."
            }
            TcbStatus::SwHardeningNeeded => {
                "TCB level of the SGX platform is up-to-date but due to certain issues \
                 affecting the platform, additional SW Hardening in the attesting SGX \
                 enclaves may be needed."
            }
            TcbStatus::ConfigurationAndSwHardeningNeeded => {
                "TCB level of the SGX platform is up-to-date but additional configuration \
                 for the platform and SW Hardening in the attesting SGX enclaves may be needed."
            }
            TcbStatus::Unknown => "unknown status",
        }
    }
}
