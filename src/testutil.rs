// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Synthetic PKI and token minting shared by the unit tests

use crate::source::simulated::{issue_certificate, p256_key};
use crate::store::{Fingerprint, TrustedRootSet, CONFIDENTIAL_SPACE_ISSUER, DEBUG_DISABLED};
use crate::token::{self, Der, TokenHeader, TokenPayload};
use jsonwebtoken::Algorithm;
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use serde_json::{Map, Value};

pub const NOW: u64 = 1_750_000_000;
pub const DAY: u64 = 24 * 3600;
pub const AUDIENCE: &str = "https://verifier.example";
pub const NONCE: &str = "9f86d081884c7d659a2feaa0c55ad015";
pub const IMAGE_DIGEST: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

/// root -> intermediate -> leaf, with the root and intermediate on P-256
pub struct TestPki {
    pub root: X509,
    pub root_key: PKey<Private>,
    pub intermediate: X509,
    pub intermediate_key: PKey<Private>,
    pub leaf: X509,
    pub leaf_key: PKey<Private>,
}

impl TestPki {
    pub fn ec() -> Self {
        Self::with_leaf(p256_key().unwrap(), (NOW - DAY, NOW + 365 * DAY))
    }

    pub fn p384() -> Self {
        Self::with_leaf(ec_key(Nid::SECP384R1), (NOW - DAY, NOW + 365 * DAY))
    }

    pub fn rsa(bits: u32) -> Self {
        let key = PKey::from_rsa(Rsa::generate(bits).unwrap()).unwrap();

        Self::with_leaf(key, (NOW - DAY, NOW + 365 * DAY))
    }

    pub fn ed25519() -> Self {
        Self::with_leaf(PKey::generate_ed25519().unwrap(), (NOW - DAY, NOW + 365 * DAY))
    }

    /// The leaf expired a minute before `NOW`
    pub fn expired_leaf() -> Self {
        Self::with_leaf(p256_key().unwrap(), (NOW - 2 * DAY, NOW - 60))
    }

    pub fn with_leaf(leaf_key: PKey<Private>, leaf_validity: (u64, u64)) -> Self {
        let ca_validity = (NOW - 30 * DAY, NOW + 10 * 365 * DAY);

        let root_key = p256_key().unwrap();
        let root = issue_certificate("Test Root CA", &root_key, None, true, 1, ca_validity).unwrap();

        let intermediate_key = p256_key().unwrap();
        let intermediate = issue_certificate(
            "Test Intermediate CA",
            &intermediate_key,
            Some((&root, &root_key)),
            true,
            2,
            ca_validity,
        )
        .unwrap();

        let leaf = issue_certificate(
            "Test Token Signer",
            &leaf_key,
            Some((&intermediate, &intermediate_key)),
            false,
            3,
            leaf_validity,
        )
        .unwrap();

        Self {
            root,
            root_key,
            intermediate,
            intermediate_key,
            leaf,
            leaf_key,
        }
    }

    pub fn root_fingerprint(&self) -> Fingerprint {
        Fingerprint::of_cert(&self.root).unwrap()
    }

    pub fn roots(&self) -> TrustedRootSet {
        TrustedRootSet::new([self.root_fingerprint()])
    }

    /// leaf first
    pub fn x5c(&self) -> Vec<Der> {
        [&self.leaf, &self.intermediate, &self.root]
            .iter()
            .map(|c| Der::from(c.to_der().unwrap()))
            .collect()
    }

    pub fn chain_pem(&self) -> Vec<u8> {
        let mut pem = self.leaf.to_pem().unwrap();
        pem.extend(self.intermediate.to_pem().unwrap());
        pem.extend(self.root.to_pem().unwrap());
        pem
    }

    /// Mint a token signed with the leaf key and carrying the full chain
    pub fn mint(&self, alg: Algorithm, payload: &TokenPayload) -> String {
        let header = TokenHeader::new(&format!("{alg:?}")).with_x5c(self.x5c());

        mint_with(&header, payload, alg, &self.leaf_key)
    }
}

pub fn ec_key(nid: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(nid).unwrap();

    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Sign `payload` under an arbitrary header with `alg`, which need not be the
/// algorithm the header claims
pub fn mint_with(
    header: &TokenHeader,
    payload: &TokenPayload,
    alg: Algorithm,
    key: &PKey<Private>,
) -> String {
    let signing_input = token::encode_signing_input(header, payload).unwrap();
    let signature = token::sign(alg, key, signing_input.as_bytes()).unwrap();

    token::assemble(&signing_input, &signature)
}

/// A well-formed Confidential Space claims-set issued ten seconds before
/// `NOW`, valid for an hour
pub fn payload() -> TokenPayload {
    let mut p = TokenPayload::new(
        CONFIDENTIAL_SPACE_ISSUER,
        AUDIENCE,
        NOW - 10,
        NOW + 3600,
        NONCE,
        "GCP_AMD_SEV",
        true,
    );

    p.not_before = Some(NOW - 10);
    p.debug_status = Some(DEBUG_DISABLED.to_string());
    p.software_name = Some("CONFIDENTIAL_SPACE".to_string());
    p.software_version = vec!["240900".to_string()];

    let mut container = Map::new();
    container.insert(
        "image_reference".to_string(),
        Value::from("us-docker.pkg.dev/flare-network/ai-social:latest"),
    );
    container.insert("image_digest".to_string(), Value::from(IMAGE_DIGEST));
    container.insert("restart_policy".to_string(), Value::from("Never"));
    p.submods.insert("container".to_string(), container);

    p
}
