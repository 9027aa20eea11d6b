// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::store::is_symmetric;
use crate::token::{ecdsa_coordinate_len, message_digest};
use jsonwebtoken::Algorithm;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKeyRef, Public};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use std::str::FromStr;

const MIN_RSA_BITS: u32 = 2048;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("unknown algorithm {0:?}")]
    UnknownAlgorithm(String),
    #[error("algorithm {0} is not allowed")]
    NotAllowed(String),
    #[error("{alg} cannot be used with this key: {detail}")]
    KeyMismatch { alg: String, detail: String },
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signature does not verify")]
    Invalid,
    #[error("crypto error: {0}")]
    Crypto(String),
}

fn crypto(e: openssl::error::ErrorStack) -> SignatureError {
    SignatureError::Crypto(e.to_string())
}

/// Verify `signature` over the `signed` bytes with the leaf public key,
/// using the algorithm named in the token header.
///
/// The algorithm must be in `allowed`, HMAC algorithms and "none" are never
/// accepted, and the key must be of the type (and size) the algorithm
/// implies.  Returns the algorithm that was used.
pub fn verify(
    signed: &[u8],
    signature: &[u8],
    key: &PKeyRef<Public>,
    alg: &str,
    allowed: &[Algorithm],
) -> Result<Algorithm, SignatureError> {
    let a = Algorithm::from_str(alg).map_err(|_| SignatureError::UnknownAlgorithm(alg.to_string()))?;

    if is_symmetric(a) || !allowed.contains(&a) {
        return Err(SignatureError::NotAllowed(alg.to_string()));
    }

    check_key(a, key)?;

    let ok = match a {
        Algorithm::ES256 | Algorithm::ES384 => verify_ecdsa(a, signed, signature, key)?,
        Algorithm::EdDSA => {
            let mut v = Verifier::new_without_digest(key).map_err(crypto)?;

            v.verify_oneshot(signature, signed).unwrap_or(false)
        }
        _ => verify_rsa(a, signed, signature, key)?,
    };

    if !ok {
        return Err(SignatureError::Invalid);
    }

    Ok(a)
}

fn check_key(alg: Algorithm, key: &PKeyRef<Public>) -> Result<(), SignatureError> {
    let mismatch = |detail: String| SignatureError::KeyMismatch {
        alg: format!("{alg:?}"),
        detail,
    };

    match alg {
        Algorithm::ES256 | Algorithm::ES384 => {
            let want = if alg == Algorithm::ES256 {
                Nid::X9_62_PRIME256V1
            } else {
                Nid::SECP384R1
            };

            let ec = key
                .ec_key()
                .map_err(|_| mismatch("not an EC key".to_string()))?;

            match ec.group().curve_name() {
                Some(nid) if nid == want => Ok(()),
                Some(nid) => Err(mismatch(format!("curve {}", nid.as_raw()))),
                None => Err(mismatch("unnamed curve".to_string())),
            }
        }
        Algorithm::EdDSA => match key.id() {
            Id::ED25519 => Ok(()),
            _ => Err(mismatch("not an Ed25519 key".to_string())),
        },
        _ => {
            if key.id() != Id::RSA {
                return Err(mismatch("not an RSA key".to_string()));
            }

            if key.bits() < MIN_RSA_BITS {
                return Err(mismatch(format!(
                    "{} bits RSA key, need at least {MIN_RSA_BITS}",
                    key.bits()
                )));
            }

            Ok(())
        }
    }
}

fn verify_rsa(
    alg: Algorithm,
    signed: &[u8],
    signature: &[u8],
    key: &PKeyRef<Public>,
) -> Result<bool, SignatureError> {
    let md = message_digest(alg).unwrap_or_else(MessageDigest::sha256);

    let mut v = Verifier::new(md, key).map_err(crypto)?;

    if matches!(alg, Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512) {
        v.set_rsa_padding(Padding::PKCS1_PSS).map_err(crypto)?;
        v.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
            .map_err(crypto)?;
        v.set_rsa_mgf1_md(md).map_err(crypto)?;
    } else {
        v.set_rsa_padding(Padding::PKCS1).map_err(crypto)?;
    }

    v.update(signed).map_err(crypto)?;

    // OpenSSL reports some malformed signatures (e.g. of the wrong length)
    // as errors
    Ok(v.verify(signature).unwrap_or(false))
}

// JWS carries ECDSA signatures as the fixed-size concatenation r || s
// (RFC 7518 §3.4), not DER
fn verify_ecdsa(
    alg: Algorithm,
    signed: &[u8],
    signature: &[u8],
    key: &PKeyRef<Public>,
) -> Result<bool, SignatureError> {
    let n = ecdsa_coordinate_len(alg).unwrap_or_default();

    if signature.len() != 2 * n {
        return Err(SignatureError::Malformed(format!(
            "{alg:?} signature must be {} bytes, got {}",
            2 * n,
            signature.len()
        )));
    }

    let md = message_digest(alg).unwrap_or_else(MessageDigest::sha256);

    let r = BigNum::from_slice(&signature[..n]).map_err(crypto)?;
    let s = BigNum::from_slice(&signature[n..]).map_err(crypto)?;
    let sig = EcdsaSig::from_private_components(r, s).map_err(crypto)?;

    let hash = openssl::hash::hash(md, signed).map_err(crypto)?;
    let ec = key.ec_key().map_err(crypto)?;

    Ok(sig.verify(&hash, &ec).unwrap_or(false))
}
