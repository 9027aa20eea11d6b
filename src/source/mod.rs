// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Acquisition of attestation tokens from the local hardware root of trust.
//!
//! A [TokenSource] is chosen once, when the service is built: either the
//! Confidential Space launcher ([TeeServerSource]) or an in-process stand-in
//! for local development ([SimulatedSource]).

pub use self::errors::SourceError;
pub use self::simulated::SimulatedSource;
pub use self::teeserver::{TeeServerSource, DEFAULT_SOCKET_PATH, DEFAULT_TIMEOUT_SECS};

mod errors;
pub(crate) mod simulated;
mod teeserver;

use crate::token::{is_valid_nonce, MAX_NONCE_LEN, MIN_NONCE_LEN};
use std::fmt;

const NONCE_BYTES: usize = 32;
const MAX_AUDIENCE_LEN: usize = 512;

/// An encoded attestation token, as handed out by a [TokenSource].  The
/// contents are opaque until decoded by the verifier.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationToken(String);

impl AttestationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for AttestationToken {
    fn from(raw: String) -> Self {
        AttestationToken(raw)
    }
}

// tokens are bearer credentials: keep them out of logs
impl fmt::Debug for AttestationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestationToken({} bytes)", self.0.len())
    }
}

/// A single-use challenge to be bound into an attestation token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    /// Draw a fresh 256-bit nonce from the OpenSSL CSPRNG, hex encoded
    pub fn generate() -> Result<Self, SourceError> {
        let mut buf = [0u8; NONCE_BYTES];

        openssl::rand::rand_bytes(&mut buf)
            .map_err(|e| SourceError::Unavailable(format!("random number generator: {e}")))?;

        Ok(Nonce(hex::encode(buf)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that can obtain an attestation token bound to an audience and a
/// caller-supplied nonce
pub trait TokenSource: Send + Sync {
    fn request(&self, audience: &str, nonce: &str) -> Result<AttestationToken, SourceError>;
}

/// Sanity check the arguments of a token request before any I/O happens
pub fn check_request(audience: &str, nonce: &str) -> Result<(), SourceError> {
    if audience.is_empty() {
        return Err(SourceError::InvalidRequest("empty audience".to_string()));
    }

    if audience.len() > MAX_AUDIENCE_LEN {
        return Err(SourceError::InvalidRequest(format!(
            "audience longer than {MAX_AUDIENCE_LEN} bytes"
        )));
    }

    if !is_valid_nonce(nonce) {
        return Err(SourceError::InvalidRequest(format!(
            "nonce must be {MIN_NONCE_LEN} to {MAX_NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }

    Ok(())
}
