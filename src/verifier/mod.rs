// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The verification pipeline stages: certificate chain, token signature and
//! claims, plus the outcome of a verification.

pub use self::chain::{
    validate as validate_chain, CertificateChain, ChainError, ChainSource, ChainSummary,
    EmbeddedChain, StaticChain,
};
pub use self::claims::{validate as validate_claims, ClaimError};
pub use self::signature::{verify as verify_signature, SignatureError};

mod chain;
mod claims;
mod signature;

use crate::token::{self, TokenPayload};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::fmt;

/// Why a token was rejected
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("malformed token: {0}")]
    MalformedToken(#[from] token::Error),
    #[error("certificate chain: {0}")]
    Chain(#[from] ChainError),
    #[error("signature: {0}")]
    Signature(#[from] SignatureError),
    #[error("claims: {0}")]
    Claim(#[from] ClaimError),
    #[error("nonce already consumed")]
    Replay,
}

/// Coarse classification of a [RejectReason]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    MalformedToken,
    ChainError,
    SignatureError,
    ClaimError,
    ReplayError,
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectKind::MalformedToken => "malformed_token",
            RejectKind::ChainError => "chain_error",
            RejectKind::SignatureError => "signature_error",
            RejectKind::ClaimError => "claim_error",
            RejectKind::ReplayError => "replay_error",
        };

        f.write_str(s)
    }
}

impl RejectReason {
    pub fn kind(&self) -> RejectKind {
        match self {
            RejectReason::MalformedToken(_) => RejectKind::MalformedToken,
            RejectReason::Chain(_) => RejectKind::ChainError,
            RejectReason::Signature(_) => RejectKind::SignatureError,
            RejectReason::Claim(_) => RejectKind::ClaimError,
            RejectReason::Replay => RejectKind::ReplayError,
        }
    }
}

impl Serialize for RejectReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("RejectReason", 2)?;
        s.serialize_field("kind", &self.kind())?;
        s.serialize_field("detail", &self.to_string())?;
        s.end()
    }
}

/// The outcome of a verification: either all checks passed and the claims
/// can be trusted, or the first failing check
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Verified { claims: TokenPayload },
    Rejected { reason: RejectReason },
}

impl ValidationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, ValidationResult::Verified { .. })
    }

    pub fn claims(&self) -> Option<&TokenPayload> {
        match self {
            ValidationResult::Verified { claims } => Some(claims),
            ValidationResult::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            ValidationResult::Verified { .. } => None,
            ValidationResult::Rejected { reason } => Some(reason),
        }
    }
}

impl From<Result<TokenPayload, RejectReason>> for ValidationResult {
    fn from(r: Result<TokenPayload, RejectReason>) -> Self {
        match r {
            Ok(claims) => ValidationResult::Verified { claims },
            Err(reason) => ValidationResult::Rejected { reason },
        }
    }
}
