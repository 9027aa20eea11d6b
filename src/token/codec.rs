// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::errors::Error;
use super::header::TokenHeader;
use super::payload::TokenPayload;

const SEPARATOR: char = '.';

// Confidential Space PKI tokens, x5c chain included, are a few KiB
const MAX_TOKEN_LEN: usize = 64 * 1024;

/// All the components of a compact-serialised attestation token
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedToken {
    /// Decoded JOSE header
    pub header: TokenHeader,
    /// Decoded claims-set
    pub payload: TokenPayload,
    /// Raw signature bytes
    pub signature: Vec<u8>,
    /// The exact `header.payload` span of the raw token, i.e. the JWS signing
    /// input.  Signatures are checked over these bytes and never over a
    /// re-serialisation of `header` and `payload`.
    pub signed: Vec<u8>,
}

/// Decode a compact-serialised token.  Any malformed segment fails the whole
/// decode.
pub fn decode(raw: &str) -> Result<DecodedToken, Error> {
    if raw.len() > MAX_TOKEN_LEN {
        return Err(Error::Syntax(format!(
            "token too large: {} bytes (max {MAX_TOKEN_LEN})",
            raw.len()
        )));
    }

    let parts: Vec<&str> = raw.split(SEPARATOR).collect();

    let (h, p, s) = match parts.as_slice() {
        [h, p, s] => (*h, *p, *s),
        _ => {
            return Err(Error::Syntax(format!(
                "expecting 3 segments, got {}",
                parts.len()
            )))
        }
    };

    for (seg, what) in [(h, "header"), (p, "payload"), (s, "signature")] {
        if seg.is_empty() {
            return Err(Error::Syntax(format!("empty {what} segment")));
        }
    }

    let header = TokenHeader::decode(&base64::decode_segment(h, "header")?)?;
    let payload = TokenPayload::decode(&base64::decode_segment(p, "payload")?)?;
    let signature = base64::decode_segment(s, "signature")?;

    let signed = raw.as_bytes()[..h.len() + 1 + p.len()].to_vec();

    Ok(DecodedToken {
        header,
        payload,
        signature,
        signed,
    })
}

/// Serialise header and claims-set into a JWS signing input
pub fn encode_signing_input(header: &TokenHeader, payload: &TokenPayload) -> Result<String, Error> {
    let h = serde_json::to_vec(header).map_err(|e| Error::Encoding(e.to_string()))?;
    let p = serde_json::to_vec(payload).map_err(|e| Error::Encoding(e.to_string()))?;

    Ok(format!(
        "{}{SEPARATOR}{}",
        base64::encode_segment(&h),
        base64::encode_segment(&p)
    ))
}

/// Append the signature to a signing input obtained from
/// [encode_signing_input]
pub fn assemble(signing_input: &str, signature: &[u8]) -> String {
    format!(
        "{signing_input}{SEPARATOR}{}",
        base64::encode_segment(signature)
    )
}
