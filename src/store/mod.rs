// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Verifier-side state: the pinned trust anchors, the appraisal policy, and
//! the ledger of consumed nonces.

pub use self::errors::Error;
pub use self::itrustanchorstore::ITrustedRootStore;
pub use self::nonce::{NonceLedger, NonceRecord};
pub(crate) use self::policy::is_symmetric;
pub use self::policy::{
    Policy, CONFIDENTIAL_SPACE_ISSUER, DEBUG_DISABLED, SIMULATED_HWMODEL, SIMULATED_ISSUER,
};
pub use self::trustanchor::{Fingerprint, TrustedRootSet};

mod errors;
mod itrustanchorstore;
mod nonce;
mod policy;
mod trustanchor;
