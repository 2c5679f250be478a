//! Hardware seal-key derivation.
//!
//! Builds the platform-defined key-request structure and asks the call gate
//! to derive a key from the CPU's root sealing key. The serialized request is
//! also the `key_info` token a caller persists to re-derive the same key.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::{TeeError, TeeResult};
use crate::gate::{SealKeyResponse, TeeGate};

/// Key-name selector for seal keys.
pub const KEY_SELECT_SEAL: u16 = 4;

/// Size of the serialized key request.
pub const KEY_REQUEST_SIZE: usize = 512;

/// Size of the zero placeholder returned on unsupported platforms.
const PLACEHOLDER_KEY_SIZE: usize = 16;

// The local report starts with a fixed-size platform header, followed by the
// SGX report body. CPUSVN and ISVSVN sit at fixed offsets in the body.
// https://github.com/intel/linux-sgx/blob/sgx_2.3/common/inc/sgx_report.h
const REPORT_HEADER_SIZE: usize = 16;
const OFFSET_REPORT_CPU_SVN: usize = 0;
const OFFSET_REPORT_ISV_SVN: usize = 258;

/// Derivation policy: what enclave identity the key is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SealPolicy {
    /// Bound to the exact enclave measurement (MRENCLAVE). The key changes
    /// whenever the unique ID of the enclave changes.
    Unique = 1,
    /// Bound to signer and product ID (MRSIGNER). Stable across enclave
    /// versions signed by the same authority.
    Product = 2,
}

/// SGX key request, fixed little-endian layout.
// https://github.com/intel/linux-sgx/blob/sgx_2.3/common/inc/sgx_key.h
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRequest {
    pub key_name: u16,
    pub key_policy: u16,
    pub isv_svn: u16,
    pub cpu_svn: [u8; 16],
    pub flags: u64,
    pub xfrm: u64,
    pub key_id: [u8; 32],
    pub misc_mask: u32,
}

impl KeyRequest {
    /// Serializes to the fixed 512-byte request buffer, zero-padded past the
    /// last field.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bin = Vec::with_capacity(KEY_REQUEST_SIZE);
        bin.extend_from_slice(&self.key_name.to_le_bytes());
        bin.extend_from_slice(&self.key_policy.to_le_bytes());
        bin.extend_from_slice(&self.isv_svn.to_le_bytes());
        bin.extend_from_slice(&0u16.to_le_bytes()); // reserved
        bin.extend_from_slice(&self.cpu_svn);
        bin.extend_from_slice(&self.flags.to_le_bytes());
        bin.extend_from_slice(&self.xfrm.to_le_bytes());
        bin.extend_from_slice(&self.key_id);
        bin.extend_from_slice(&self.misc_mask.to_le_bytes());
        bin.resize(KEY_REQUEST_SIZE, 0);
        bin
    }

    /// Parses a serialized key request. Accepts any buffer that covers all
    /// fields; trailing padding is ignored.
    pub fn from_bytes(bytes: &[u8]) -> TeeResult<Self> {
        const FIELDS_SIZE: usize = 76;
        if bytes.len() < FIELDS_SIZE {
            return Err(TeeError::Platform(format!(
                "key request too short: {} bytes",
                bytes.len()
            )));
        }
        let mut cpu_svn = [0u8; 16];
        cpu_svn.copy_from_slice(&bytes[8..24]);
        let mut key_id = [0u8; 32];
        key_id.copy_from_slice(&bytes[40..72]);
        Ok(Self {
            key_name: u16::from_le_bytes([bytes[0], bytes[1]]),
            key_policy: u16::from_le_bytes([bytes[2], bytes[3]]),
            isv_svn: u16::from_le_bytes([bytes[4], bytes[5]]),
            cpu_svn,
            flags: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            xfrm: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            key_id,
            misc_mask: u32::from_le_bytes(bytes[72..76].try_into().unwrap()),
        })
    }
}

/// A derived key, distinguishing hardware-backed keys from the insecure
/// placeholder substituted on platforms without key-derivation support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedKey {
    /// Key derived by the platform from its hardware root of trust.
    Derived(Vec<u8>),
    /// Fixed zero placeholder; NOT cryptographically protected. Returned
    /// when the call gate signals the operation is unimplemented.
    Unsupported(Vec<u8>),
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DerivedKey::Derived(key) | DerivedKey::Unsupported(key) => key,
        }
    }

    /// False if this is the insecure placeholder.
    pub fn is_hardware_backed(&self) -> bool {
        matches!(self, DerivedKey::Derived(_))
    }
}

impl Zeroize for DerivedKey {
    fn zeroize(&mut self) {
        match self {
            DerivedKey::Derived(key) | DerivedKey::Unsupported(key) => key.zeroize(),
        }
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Derivation result: the key plus the `key_info` token that reproduces it.
#[derive(Debug, Clone)]
pub struct DerivedSealKey {
    pub key: DerivedKey,
    /// Serialized key request. The only durable artifact of a derivation;
    /// callers persist it alongside sealed data.
    pub key_info: Vec<u8>,
}

/// The single place the unsupported-platform fallback is decided.
///
/// Callers relying on this path are not cryptographically protected and must
/// check [`DerivedKey::is_hardware_backed`].
fn unsupported_placeholder() -> DerivedKey {
    warn!("platform does not support seal keys, substituting zero placeholder");
    DerivedKey::Unsupported(vec![0u8; PLACEHOLDER_KEY_SIZE])
}

/// Derives hardware-sealed keys through an injected call gate.
pub struct SealKeyDeriver<G> {
    gate: G,
}

impl<G: TeeGate> SealKeyDeriver<G> {
    pub fn new(gate: G) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    /// Derives a key bound to the exact enclave measurement.
    ///
    /// With `random` set, the 32-byte key ID is randomized and the derived
    /// key differs on every call; the returned `key_info` is then the only
    /// way to ever reproduce the key.
    pub fn derive_unique_key(&self, random: bool) -> TeeResult<DerivedSealKey> {
        self.derive_by_policy(SealPolicy::Unique, random)
    }

    /// Derives a key bound to the signer and product ID.
    pub fn derive_product_key(&self, random: bool) -> TeeResult<DerivedSealKey> {
        self.derive_by_policy(SealPolicy::Product, random)
    }

    /// Re-derives a key from persisted `key_info`. Deterministic on the same
    /// CPU as long as the request's security-version constraints are still
    /// satisfied by the current image.
    pub fn derive_seal_key(&self, key_info: &[u8]) -> TeeResult<DerivedKey> {
        match self.gate.seal_key(key_info)? {
            SealKeyResponse::Key(key) => Ok(DerivedKey::Derived(key)),
            SealKeyResponse::Unsupported => Ok(unsupported_placeholder()),
        }
    }

    /// Derives a non-secret ID unique to the CPU's root seal key.
    ///
    /// Only the key name is set in the request, so the derivation binds
    /// nothing but the product identity; any enclave with the same product
    /// ID can reproduce it, which is what makes it usable as a CPU ID.
    pub fn seal_key_id(&self) -> TeeResult<DerivedKey> {
        let request = KeyRequest {
            key_name: KEY_SELECT_SEAL,
            ..Default::default()
        };
        self.derive_seal_key(&request.to_bytes())
    }

    fn derive_by_policy(&self, policy: SealPolicy, random: bool) -> TeeResult<DerivedSealKey> {
        // A self-report without target data, only read for its policy fields.
        let report = self.gate.local_report(None, None)?;
        if report.len() < REPORT_HEADER_SIZE + OFFSET_REPORT_ISV_SVN + 2 {
            return Err(TeeError::Platform(format!(
                "local report too short: {} bytes",
                report.len()
            )));
        }
        let body = &report[REPORT_HEADER_SIZE..];

        let mut request = KeyRequest {
            key_name: KEY_SELECT_SEAL,
            key_policy: policy as u16,
            isv_svn: u16::from_le_bytes([
                body[OFFSET_REPORT_ISV_SVN],
                body[OFFSET_REPORT_ISV_SVN + 1],
            ]),
            ..Default::default()
        };
        request
            .cpu_svn
            .copy_from_slice(&body[OFFSET_REPORT_CPU_SVN..OFFSET_REPORT_CPU_SVN + 16]);

        let masks = self.gate.seal_masks();
        request.flags = masks.flags;
        request.xfrm = masks.xfrm;
        request.misc_mask = masks.misc_mask;

        if random {
            OsRng.fill_bytes(&mut request.key_id);
        }

        let key_info = request.to_bytes();
        let key = self.derive_seal_key(&key_info)?;
        debug!(policy = ?policy, random, hardware = key.is_hardware_backed(), "derived seal key");
        Ok(DerivedSealKey { key, key_info })
    }
}
