//! Error types for attestation and sealing operations.

use thiserror::Error;

use crate::attestation::report::Report;

/// Errors returned by attestation, attested-TLS and seal-key operations.
#[derive(Error, Debug)]
pub enum TeeError {
    #[error("empty report")]
    EmptyReport,

    #[error("empty claims list")]
    EmptyClaims,

    #[error("missing attributes in report claims")]
    MissingAttributesClaim,

    #[error("not a remote report")]
    NotARemoteReport,

    /// Evidence verified cryptographically, but the platform's TCB level is
    /// degraded. The parsed report is carried so callers can decide policy.
    #[error("TCB level is invalid: {}", .0.tcb_status.explain())]
    TcbLevelInvalid(Report),

    #[error("certificate hash does not match report data")]
    ReportDataMismatch,

    #[error("certificate does not contain attestation report")]
    MissingReportExtension,

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("attestation provider returned status code {0}")]
    ProviderStatus(u16),

    #[error("token error: {0}")]
    Token(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("the provided URL does not use HTTPS")]
    NotHttps,

    #[error("could not parse URL: {0}")]
    InvalidUrl(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("sealing failed: {0}")]
    SealingFailed(String),

    #[error("unsealing failed: {0}")]
    UnsealingFailed(String),
}

/// Discriminant-only view of [`TeeError`], used where errors are compared for
/// identity (e.g. the client TLS whitelist in
/// [`Options`](crate::attestation::tls::Options)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyReport,
    EmptyClaims,
    MissingAttributesClaim,
    NotARemoteReport,
    TcbLevelInvalid,
    ReportDataMismatch,
    MissingReportExtension,
    Certificate,
    ProviderStatus,
    Token,
    Transport,
    NotHttps,
    InvalidUrl,
    Platform,
    Crypto,
    SealingFailed,
    UnsealingFailed,
}

impl TeeError {
    /// The kind of this error, for identity comparisons.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TeeError::EmptyReport => ErrorKind::EmptyReport,
            TeeError::EmptyClaims => ErrorKind::EmptyClaims,
            TeeError::MissingAttributesClaim => ErrorKind::MissingAttributesClaim,
            TeeError::NotARemoteReport => ErrorKind::NotARemoteReport,
            TeeError::TcbLevelInvalid(_) => ErrorKind::TcbLevelInvalid,
            TeeError::ReportDataMismatch => ErrorKind::ReportDataMismatch,
            TeeError::MissingReportExtension => ErrorKind::MissingReportExtension,
            TeeError::Certificate(_) => ErrorKind::Certificate,
            TeeError::ProviderStatus(_) => ErrorKind::ProviderStatus,
            TeeError::Token(_) => ErrorKind::Token,
            TeeError::Transport(_) => ErrorKind::Transport,
            TeeError::NotHttps => ErrorKind::NotHttps,
            TeeError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            TeeError::Platform(_) => ErrorKind::Platform,
            TeeError::Crypto(_) => ErrorKind::Crypto,
            TeeError::SealingFailed(_) => ErrorKind::SealingFailed,
            TeeError::UnsealingFailed(_) => ErrorKind::UnsealingFailed,
        }
    }

    /// Takes the report carried by a degraded-trust error, if any.
    pub fn into_report(self) -> Option<Report> {
        match self {
            TeeError::TcbLevelInvalid(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type for TEE operations.
pub type TeeResult<T> = Result<T, TeeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(TeeError::EmptyReport.kind(), ErrorKind::EmptyReport);
        assert_eq!(
            TeeError::TcbLevelInvalid(Report::default()).kind(),
            ErrorKind::TcbLevelInvalid
        );
        assert_ne!(TeeError::EmptyReport.kind(), ErrorKind::EmptyClaims);
    }

    #[test]
    fn test_into_report() {
        let mut report = Report::default();
        report.security_version = 7;
        let err = TeeError::TcbLevelInvalid(report);
        assert_eq!(err.into_report().unwrap().security_version, 7);
        assert!(TeeError::EmptyReport.into_report().is_none());
    }
}
