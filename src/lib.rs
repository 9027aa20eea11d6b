// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Confidential VM attestation token acquisition and verification.
//!
//! This crate obtains attestation tokens from the vTPM-backed root of trust
//! of a confidential VM (the Confidential Space launcher) and verifies them.
//! Tokens are JWS compact serialisations whose signing key is certified by a
//! chain ending at a pinned root.
//!
//! The API allows:
//! * Requesting a token bound to an audience and a nonce
//! * Decoding a token into its header and claims-set
//! * Validating the certificate chain against pinned root fingerprints
//! * Verifying the token signature with an explicit algorithm allow-list
//! * Appraising the claims against a policy, and refusing replayed nonces
//!
//! ```no_run
//! use vtpmtoken::config::Config;
//! use vtpmtoken::source::Nonce;
//! use vtpmtoken::AttestationService;
//!
//! let c = Config::load_file("/etc/vtpmtoken.json").unwrap();
//! let s = AttestationService::from_config(&c).unwrap();
//!
//! let nonce = Nonce::generate().unwrap();
//! let t = s.request_token("https://verifier.example", nonce.as_str()).unwrap();
//!
//! let r = s.verify(t.as_str(), "https://verifier.example", nonce.as_str());
//! assert!(r.is_verified());
//! ```

pub mod config;
pub mod service;
pub mod source;
pub mod store;
pub mod token;
pub mod verifier;

pub use service::AttestationService;
pub use verifier::{RejectKind, RejectReason, ValidationResult};

#[cfg(test)]
mod testutil;

/// Seconds since the epoch, as per the system clock
pub(crate) fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
