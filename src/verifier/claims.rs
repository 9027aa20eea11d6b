// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::store::{Policy, DEBUG_DISABLED, SIMULATED_HWMODEL, SIMULATED_ISSUER};
use crate::token::{is_valid_nonce, TokenPayload};

/// A claim that does not satisfy the appraisal policy.  Only the claim is
/// named: claim values stay out of error messages and logs.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("token expired")]
    Expired,
    #[error("token issued in the future")]
    IssuedInFuture,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("expected nonce not found in eat_nonce")]
    NonceMismatch,
    #[error("hardware model not accepted")]
    HardwareNotAccepted,
    #[error("simulated hardware not accepted")]
    SimulatedHardware,
    #[error("secure boot disabled")]
    SecureBootDisabled,
    #[error("debugging not disabled")]
    DebugEnabled,
    #[error("measurement {0} missing")]
    MeasurementMissing(String),
    #[error("measurement {0} does not match any accepted value")]
    MeasurementMismatch(String),
    #[error("issuer mismatch")]
    IssuerMismatch,
}

/// Appraise the claims of a token at time `at`.  Checks run in a fixed order
/// and the first failure is returned.
pub fn validate(
    payload: &TokenPayload,
    expected_audience: &str,
    expected_nonce: &str,
    policy: &Policy,
    at: u64,
) -> Result<(), ClaimError> {
    if payload.audience != expected_audience {
        return Err(ClaimError::AudienceMismatch);
    }

    let skew = policy.clock_skew_secs;

    if at >= payload.expires_at {
        return Err(ClaimError::Expired);
    }

    if payload.issued_at > at.saturating_add(skew) {
        return Err(ClaimError::IssuedInFuture);
    }

    if let Some(nbf) = payload.not_before {
        if nbf > at.saturating_add(skew) {
            return Err(ClaimError::NotYetValid);
        }
    }

    if !is_valid_nonce(expected_nonce) || !payload.has_nonce(expected_nonce) {
        return Err(ClaimError::NonceMismatch);
    }

    let simulated = payload.hardware_model == SIMULATED_HWMODEL;

    if simulated {
        if !policy.allow_simulated {
            return Err(ClaimError::SimulatedHardware);
        }
    } else if !policy.accepted_hardware.contains(&payload.hardware_model) {
        return Err(ClaimError::HardwareNotAccepted);
    }

    if policy.require_secure_boot && !payload.secure_boot {
        return Err(ClaimError::SecureBootDisabled);
    }

    if policy.require_debug_disabled && payload.debug_status.as_deref() != Some(DEBUG_DISABLED) {
        return Err(ClaimError::DebugEnabled);
    }

    check_measurements(payload, policy)?;

    let expected_issuer = match (simulated, &policy.issuer) {
        (true, _) => Some(SIMULATED_ISSUER),
        (false, Some(iss)) => Some(iss.as_str()),
        (false, None) => None,
    };

    if let Some(iss) = expected_issuer {
        if payload.issuer != iss {
            return Err(ClaimError::IssuerMismatch);
        }
    }

    Ok(())
}

fn check_measurements(payload: &TokenPayload, policy: &Policy) -> Result<(), ClaimError> {
    if policy.measurements.is_empty() {
        return Ok(());
    }

    let actual = payload.measurements();

    // sorted, so that the reported failure does not depend on hashing
    let mut names: Vec<&String> = policy.measurements.keys().collect();
    names.sort();

    for name in names {
        let accepted = policy.lookup_measurement(name).map(Vec::as_slice).unwrap_or(&[]);

        match actual.get(name.as_str()) {
            None => return Err(ClaimError::MeasurementMissing(name.clone())),
            Some(d) if !accepted.contains(d) => {
                return Err(ClaimError::MeasurementMismatch(name.clone()))
            }
            Some(_) => {}
        }
    }

    Ok(())
}
