// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use jsonwebtoken::Algorithm;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Signer};

/// Message digest for the given JOSE algorithm, `None` for EdDSA which signs
/// the message itself
pub fn message_digest(alg: Algorithm) -> Option<MessageDigest> {
    match alg {
        Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 | Algorithm::HS256 => {
            Some(MessageDigest::sha256())
        }
        Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 | Algorithm::HS384 => {
            Some(MessageDigest::sha384())
        }
        Algorithm::RS512 | Algorithm::PS512 | Algorithm::HS512 => Some(MessageDigest::sha512()),
        Algorithm::EdDSA => None,
    }
}

/// Size in bytes of each of the `r` and `s` halves of a JWS ECDSA signature
pub fn ecdsa_coordinate_len(alg: Algorithm) -> Option<usize> {
    match alg {
        Algorithm::ES256 => Some(32),
        Algorithm::ES384 => Some(48),
        _ => None,
    }
}

/// Produce the JWS signature of `signing_input` with `key`.  Used by the
/// simulated token source; real tokens are signed by the attestation service.
pub fn sign(alg: Algorithm, key: &PKeyRef<Private>, signing_input: &[u8]) -> Result<Vec<u8>, Error> {
    let enc = |e: openssl::error::ErrorStack| Error::Encoding(format!("signing with {alg:?}: {e}"));

    match alg {
        Algorithm::ES256 | Algorithm::ES384 => {
            let n = ecdsa_coordinate_len(alg).unwrap_or_default();
            let md = message_digest(alg).unwrap_or_else(MessageDigest::sha256);

            let hash = openssl::hash::hash(md, signing_input).map_err(enc)?;
            let ec = key.ec_key().map_err(enc)?;
            let sig = EcdsaSig::sign(&hash, &ec).map_err(enc)?;

            let mut raw = sig.r().to_vec_padded(n as i32).map_err(enc)?;
            raw.extend(sig.s().to_vec_padded(n as i32).map_err(enc)?);

            Ok(raw)
        }
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
            let md = message_digest(alg).unwrap_or_else(MessageDigest::sha256);

            let mut s = Signer::new(md, key).map_err(enc)?;
            s.set_rsa_padding(Padding::PKCS1).map_err(enc)?;
            s.update(signing_input).map_err(enc)?;

            s.sign_to_vec().map_err(enc)
        }
        Algorithm::PS256 | Algorithm::PS384 | Algorithm::PS512 => {
            let md = message_digest(alg).unwrap_or_else(MessageDigest::sha256);

            let mut s = Signer::new(md, key).map_err(enc)?;
            s.set_rsa_padding(Padding::PKCS1_PSS).map_err(enc)?;
            s.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                .map_err(enc)?;
            s.set_rsa_mgf1_md(md).map_err(enc)?;
            s.update(signing_input).map_err(enc)?;

            s.sign_to_vec().map_err(enc)
        }
        Algorithm::EdDSA => {
            let mut s = Signer::new_without_digest(key).map_err(enc)?;

            s.sign_oneshot_to_vec(signing_input).map_err(enc)
        }
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Err(Error::Encoding(format!(
            "{alg:?} is not an asymmetric signature algorithm"
        ))),
    }
}
