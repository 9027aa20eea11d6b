// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::{check_request, AttestationToken, SourceError, TokenSource};
use crate::store::{Fingerprint, DEBUG_DISABLED, SIMULATED_HWMODEL, SIMULATED_ISSUER};
use crate::token::{self, Der, TokenHeader, TokenPayload};
use jsonwebtoken::Algorithm;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509NameBuilder, X509Ref, X509};
use serde_json::{Map, Value};

const TOKEN_LIFETIME_SECS: u64 = 3600;
const CERT_LIFETIME_SECS: u64 = 30 * 24 * 3600;
const BACKDATE_SECS: u64 = 60;

/// An in-process stand-in for the launcher, for development on machines
/// without confidential computing hardware.  It owns a throw-away P-256 root
/// and signing key, and mints ES256 tokens claiming the `SIMULATED` hardware
/// model, which the default policy refuses.
pub struct SimulatedSource {
    root: X509,
    leaf: X509,
    leaf_key: PKey<Private>,
}

impl std::fmt::Debug for SimulatedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSource").finish_non_exhaustive()
    }
}

impl SimulatedSource {
    pub fn new() -> Result<Self, SourceError> {
        Self::new_at(crate::unix_time())
    }

    /// Build a source whose certificates are valid from `at` onwards
    pub fn new_at(at: u64) -> Result<Self, SourceError> {
        Self::build(at).map_err(|e| SourceError::Unavailable(format!("simulated PKI: {e}")))
    }

    fn build(at: u64) -> Result<Self, ErrorStack> {
        let validity = (at.saturating_sub(BACKDATE_SECS), at + CERT_LIFETIME_SECS);

        let root_key = p256_key()?;
        let root = issue_certificate(
            "Simulated Attestation Root",
            &root_key,
            None,
            true,
            1,
            validity,
        )?;

        let leaf_key = p256_key()?;
        let leaf = issue_certificate(
            "Simulated Attestation Signer",
            &leaf_key,
            Some((&root, &root_key)),
            false,
            2,
            validity,
        )?;

        Ok(Self {
            root,
            leaf,
            leaf_key,
        })
    }

    /// Fingerprint of the simulated root, to be pinned explicitly by whoever
    /// wants to accept simulated tokens
    pub fn root_fingerprint(&self) -> Result<Fingerprint, SourceError> {
        Fingerprint::of_cert(&self.root)
            .map_err(|e| SourceError::Unavailable(format!("simulated root: {e}")))
    }

    pub fn root_pem(&self) -> Result<Vec<u8>, SourceError> {
        self.root
            .to_pem()
            .map_err(|e| SourceError::Unavailable(format!("simulated root: {e}")))
    }

    /// Mint a token issued at `at`
    pub fn request_at(
        &self,
        audience: &str,
        nonce: &str,
        at: u64,
    ) -> Result<AttestationToken, SourceError> {
        check_request(audience, nonce)?;

        let mut payload = TokenPayload::new(
            SIMULATED_ISSUER,
            audience,
            at,
            at + TOKEN_LIFETIME_SECS,
            nonce,
            SIMULATED_HWMODEL,
            true,
        );
        payload.not_before = Some(at.saturating_sub(BACKDATE_SECS));
        payload.debug_status = Some(DEBUG_DISABLED.to_string());
        payload.software_name = Some("SIMULATED".to_string());
        payload.extensions.insert("simulated".to_string(), Value::Bool(true));

        let mut container = Map::new();
        container.insert(
            "image_reference".to_string(),
            Value::from("localhost/simulated:latest"),
        );
        container.insert(
            "image_digest".to_string(),
            Value::from(format!("sha256:{}", hex::encode([0u8; 32]))),
        );
        payload.submods.insert("container".to_string(), container);

        let chain = [&self.leaf, &self.root]
            .iter()
            .map(|c| c.to_der().map(Der::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SourceError::Unavailable(format!("simulated chain: {e}")))?;

        let header = TokenHeader::new("ES256").with_x5c(chain);

        let signing_input = token::encode_signing_input(&header, &payload)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let signature = token::sign(Algorithm::ES256, &self.leaf_key, signing_input.as_bytes())
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        tracing::debug!(audience, "minted simulated attestation token");

        Ok(AttestationToken::from(token::assemble(
            &signing_input,
            &signature,
        )))
    }
}

impl TokenSource for SimulatedSource {
    fn request(&self, audience: &str, nonce: &str) -> Result<AttestationToken, SourceError> {
        self.request_at(audience, nonce, crate::unix_time())
    }
}

pub(crate) fn p256_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;

    PKey::from_ec_key(EcKey::generate(&group)?)
}

/// Issue an X.509 v3 certificate for `key`, signed by `issuer` or self-signed.
/// CA certificates get the basicConstraints and keyCertSign usage needed for
/// path validation, the others digitalSignature only.
pub(crate) fn issue_certificate(
    subject: &str,
    key: &PKeyRef<Private>,
    issuer: Option<(&X509Ref, &PKeyRef<Private>)>,
    ca: bool,
    serial: u32,
    (not_before, not_after): (u64, u64),
) -> Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", subject)?;
    let name = name.build();

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial = BigNum::from_u32(serial)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_pubkey(key)?;
    let not_before = Asn1Time::from_unix(not_before as i64)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::from_unix(not_after as i64)?;
    builder.set_not_after(&not_after)?;

    if ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;
    } else {
        builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
    }

    match issuer {
        Some((cert, signing_key)) => {
            builder.set_issuer_name(cert.subject_name())?;
            builder.sign(signing_key, MessageDigest::sha256())?;
        }
        None => {
            builder.set_issuer_name(&name)?;
            builder.sign(key, MessageDigest::sha256())?;
        }
    }

    Ok(builder.build())
}
