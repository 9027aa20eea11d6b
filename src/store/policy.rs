// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use jsonwebtoken::Algorithm;
use multimap::MultiMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Issuer of Google Confidential Space attestation tokens
pub const CONFIDENTIAL_SPACE_ISSUER: &str = "https://confidentialcomputing.googleapis.com";

/// Hardware model claimed by tokens that do not come from real hardware
pub const SIMULATED_HWMODEL: &str = "SIMULATED";

/// Issuer of simulated tokens.  It replaces `issuer` when a simulated token
/// is appraised under `allow-simulated`.
pub const SIMULATED_ISSUER: &str = "https://simulated.attestation.invalid";

/// `dbgstat` value of a workload that could not have been debugged
pub const DEBUG_DISABLED: &str = "disabled-since-boot";

const DEFAULT_CLOCK_SKEW_SECS: u64 = 30;
const MAX_CLOCK_SKEW_SECS: u64 = 300;

/// The appraisal policy applied to the claims of an attestation token, and
/// the signature algorithms accepted for it.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Policy {
    /// Expected `iss`.  `None` accepts any issuer.
    #[serde(default = "default_issuer")]
    pub issuer: Option<String>,

    /// Accepted `hwmodel` values, e.g. "GCP_AMD_SEV"
    #[serde(default = "default_hardware")]
    pub accepted_hardware: BTreeSet<String>,

    /// JOSE algorithms a token may be signed with.  HMAC algorithms are
    /// refused at load time.
    #[serde(default = "default_algorithms")]
    pub accepted_algorithms: Vec<Algorithm>,

    /// Tolerance applied to `iat` and `nbf`.  Fixed for the lifetime of the
    /// policy.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    #[serde(default = "yes")]
    pub require_secure_boot: bool,

    #[serde(default = "yes")]
    pub require_debug_disabled: bool,

    /// Accepted digests, indexed by measurement name (e.g.
    /// "container.image_digest").  There may be several good digests for the
    /// same measurement.  Empty means that any software is acceptable.
    #[serde(default)]
    pub measurements: MultiMap<String, String>,

    /// Accept tokens minted by the simulated token source.  Never set this
    /// outside local testing.
    #[serde(default)]
    pub allow_simulated: bool,
}

fn default_issuer() -> Option<String> {
    Some(CONFIDENTIAL_SPACE_ISSUER.to_string())
}

fn default_hardware() -> BTreeSet<String> {
    ["GCP_AMD_SEV", "GCP_AMD_SEV_ES", "GCP_INTEL_TDX"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![
        Algorithm::RS256,
        Algorithm::RS384,
        Algorithm::RS512,
        Algorithm::PS256,
        Algorithm::PS384,
        Algorithm::PS512,
        Algorithm::ES256,
        Algorithm::ES384,
        Algorithm::EdDSA,
    ]
}

fn default_clock_skew() -> u64 {
    DEFAULT_CLOCK_SKEW_SECS
}

fn yes() -> bool {
    true
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            accepted_hardware: default_hardware(),
            accepted_algorithms: default_algorithms(),
            clock_skew_secs: default_clock_skew(),
            require_secure_boot: true,
            require_debug_disabled: true,
            measurements: MultiMap::new(),
            allow_simulated: false,
        }
    }
}

impl Policy {
    /// Parse and sanity check a policy from JSON
    pub fn load_json(j: &str) -> Result<Self, Error> {
        let p: Policy = serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        p.validate()?;

        Ok(p)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.accepted_algorithms.is_empty() {
            return Err(Error::Sema("no accepted algorithm".to_string()));
        }

        for alg in self.accepted_algorithms.iter() {
            if is_symmetric(*alg) {
                return Err(Error::UnsafePolicy(format!(
                    "{alg:?} is a symmetric algorithm"
                )));
            }
        }

        if self.accepted_hardware.is_empty() {
            return Err(Error::Sema("no accepted hardware model".to_string()));
        }

        if self.accepted_hardware.contains(SIMULATED_HWMODEL) {
            return Err(Error::UnsafePolicy(format!(
                "{SIMULATED_HWMODEL} cannot be listed as accepted hardware, use allow-simulated"
            )));
        }

        if self.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            return Err(Error::UnsafePolicy(format!(
                "clock skew {}s exceeds {MAX_CLOCK_SKEW_SECS}s",
                self.clock_skew_secs
            )));
        }

        if let Some(iss) = &self.issuer {
            if iss.is_empty() {
                return Err(Error::Sema("empty issuer".to_string()));
            }
        }

        if self.allow_simulated {
            tracing::warn!("policy accepts simulated attestation tokens");
        }

        Ok(())
    }

    /// Lookup all the accepted digests for the given measurement
    pub fn lookup_measurement(&self, name: &str) -> Option<&Vec<String>> {
        self.measurements.get_vec(name)
    }
}

/// HMAC algorithms need a shared secret and are never acceptable
pub(crate) fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
