// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::trustanchor::Fingerprint;

/// Interface to the store where the pinned root certificates are stashed.
pub trait ITrustedRootStore {
    /// Whether the certificate with the given fingerprint is a trust anchor
    fn is_trusted(&self, fp: &Fingerprint) -> bool;
}
