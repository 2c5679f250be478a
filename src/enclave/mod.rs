//! In-enclave primitives: seal-key derivation and data sealing.

pub mod seal;
pub mod sealing;

pub use seal::{DerivedKey, DerivedSealKey, KeyRequest, SealKeyDeriver, SealPolicy};
pub use sealing::{decrypt, encrypt, Sealer};
