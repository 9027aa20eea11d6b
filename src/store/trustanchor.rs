// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::ITrustedRootStore;
use openssl::hash::MessageDigest;
use openssl::x509::{X509Ref, X509};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// SHA-256 digest of the DER encoding of a certificate.  Serialised as 64 hex
/// digits; colon-separated pairs (as printed by `openssl x509 -fingerprint`)
/// are accepted on input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn of_cert(cert: &X509Ref) -> Result<Self, Error> {
        let d = cert
            .digest(MessageDigest::sha256())
            .map_err(|e| Error::Syntax(format!("certificate digest: {e}")))?;

        let mut fp = [0u8; 32];
        fp.clone_from_slice(&d);

        Ok(Fingerprint(fp))
    }

    pub fn of_der(der: &[u8]) -> Result<Self, Error> {
        let cert = X509::from_der(der).map_err(|e| Error::Syntax(format!("DER certificate: {e}")))?;

        Self::of_cert(&cert)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s: String = s.chars().filter(|c| *c != ':').collect();

        let mut fp = [0u8; 32];

        hex::decode_to_slice(&s, &mut fp)
            .map_err(|e| Error::Syntax(format!("fingerprint {s:?}: {e}")))?;

        Ok(Fingerprint(fp))
    }
}

/// The set of pinned root certificates.  It is built once and never mutated:
/// replacing the trusted roots means building a new set (and a new service
/// around it).
#[derive(Debug, Clone, Default)]
pub struct TrustedRootSet {
    roots: BTreeSet<Fingerprint>,
}

impl TrustedRootSet {
    pub fn new<I>(fps: I) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        Self {
            roots: fps.into_iter().collect(),
        }
    }

    /// Build a TrustedRootSet from a JSON array of hex fingerprints
    pub fn from_json(j: &str) -> Result<Self, Error> {
        let fps: Vec<Fingerprint> =
            serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        Ok(Self::new(fps))
    }

    /// Build a TrustedRootSet pinning every certificate found in the given
    /// PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let certs = X509::stack_from_pem(pem).map_err(|e| Error::Syntax(e.to_string()))?;

        if certs.is_empty() {
            return Err(Error::Sema("no certificate in PEM bundle".to_string()));
        }

        let fps = certs
            .iter()
            .map(|c| Fingerprint::of_cert(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(fps))
    }

    /// Returns a new set containing the roots of both `self` and `other`
    pub fn union(&self, other: &TrustedRootSet) -> Self {
        Self::new(self.roots.union(&other.roots).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.roots.iter()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl ITrustedRootStore for TrustedRootSet {
    fn is_trusted(&self, fp: &Fingerprint) -> bool {
        self.roots.contains(fp)
    }
}
