// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The attestation service: token acquisition on one side, and the
//! verification pipeline on the other.
//!
//! A token goes through decoding, chain validation, signature verification,
//! claims appraisal and nonce consumption, in this order.  The first failing
//! step rejects the token, and nothing is retried.

use crate::config::{self, Config};
use crate::source::{AttestationToken, SourceError, TokenSource};
use crate::store::{NonceLedger, Policy, TrustedRootSet};
use crate::token::{self, TokenPayload};
use crate::verifier::{self, ChainSource, RejectReason, ValidationResult};
use std::fmt;

pub struct AttestationService {
    source: Box<dyn TokenSource>,
    chains: Box<dyn ChainSource>,
    roots: TrustedRootSet,
    policy: Policy,
    ledger: NonceLedger,
}

impl fmt::Debug for AttestationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationService")
            .field("roots", &self.roots)
            .field("policy", &self.policy)
            .field("consumed_nonces", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl AttestationService {
    /// Build a service around a token source, a chain source, the pinned
    /// roots and the appraisal policy.  None of them can be changed later:
    /// build a new service instead.
    pub fn new(
        source: Box<dyn TokenSource>,
        chains: Box<dyn ChainSource>,
        roots: TrustedRootSet,
        policy: Policy,
    ) -> Self {
        Self {
            source,
            chains,
            roots,
            policy,
            ledger: NonceLedger::new(),
        }
    }

    pub fn from_config(c: &Config) -> Result<Self, config::Error> {
        c.policy.validate()?;

        let roots = c.trusted_root_set()?;

        tracing::info!(roots = roots.len(), "attestation service configured");

        Ok(Self::new(c.token_source()?, c.chain_source()?, roots, c.policy.clone()))
    }

    /// Obtain a fresh token from the configured source
    pub fn request_token(
        &self,
        audience: &str,
        nonce: &str,
    ) -> Result<AttestationToken, SourceError> {
        self.source.request(audience, nonce)
    }

    /// Verify `raw` against the current system time
    pub fn verify(&self, raw: &str, expected_audience: &str, expected_nonce: &str) -> ValidationResult {
        self.verify_at(raw, expected_audience, expected_nonce, crate::unix_time())
    }

    /// Verify `raw` at time `at`, in seconds since the epoch.  A successful
    /// verification consumes `expected_nonce`.
    pub fn verify_at(
        &self,
        raw: &str,
        expected_audience: &str,
        expected_nonce: &str,
        at: u64,
    ) -> ValidationResult {
        let result = ValidationResult::from(self.run(raw, expected_audience, expected_nonce, at));

        match &result {
            ValidationResult::Verified { claims } => {
                tracing::info!(
                    audience = expected_audience,
                    hwmodel = %claims.hardware_model,
                    "attestation token verified"
                );

                let pruned = self.ledger.prune(at);
                if pruned > 0 {
                    tracing::debug!(pruned, "expired nonces dropped");
                }
            }
            ValidationResult::Rejected { reason } => {
                tracing::warn!(kind = %reason.kind(), %reason, "attestation token rejected");
            }
        }

        result
    }

    fn run(
        &self,
        raw: &str,
        expected_audience: &str,
        expected_nonce: &str,
        at: u64,
    ) -> Result<TokenPayload, RejectReason> {
        let t = token::decode(raw)?;

        let chain = self.chains.chain_for(&t.header)?;
        let summary = verifier::validate_chain(&chain, &self.roots, at)?;

        tracing::debug!(root = %summary.root, depth = summary.depth, "certificate chain valid");

        let leaf_key = chain.leaf_key()?;

        verifier::verify_signature(
            &t.signed,
            &t.signature,
            &leaf_key,
            &t.header.alg,
            &self.policy.accepted_algorithms,
        )?;

        verifier::validate_claims(&t.payload, expected_audience, expected_nonce, &self.policy, at)?;

        if !self
            .ledger
            .consume(expected_nonce, at, t.payload.expires_at)
        {
            return Err(RejectReason::Replay);
        }

        Ok(t.payload)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn roots(&self) -> &TrustedRootSet {
        &self.roots
    }

    pub fn ledger(&self) -> &NonceLedger {
        &self.ledger
    }
}
