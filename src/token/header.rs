// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64::Der;
use super::common::json_error;
use super::errors::Error;
use serde::{Deserialize, Serialize};

/// The JOSE header of an attestation token.  See RFC 7515 §4.1.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenHeader {
    /// Signature algorithm identifier, e.g. "RS256".  Checked against the
    /// allow-list by the signature verifier, not here.
    pub alg: String,

    /// Key identifier of the signing key, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Certificate chain, leaf first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<Der>>,

    // we do not implement any JOSE extension, so a token that insists on one
    // being understood must be refused (RFC 7515 §4.1.11)
    #[serde(default, skip_serializing)]
    crit: Option<serde_json::Value>,
}

impl TokenHeader {
    pub fn new(alg: &str) -> Self {
        Self {
            alg: alg.to_string(),
            kid: None,
            typ: Some("JWT".to_string()),
            x5c: None,
            crit: None,
        }
    }

    pub fn with_x5c(mut self, chain: Vec<Der>) -> Self {
        self.x5c = Some(chain);
        self
    }

    /// Decode a JSON encoded JOSE header
    pub fn decode(buf: &[u8]) -> Result<TokenHeader, Error> {
        let h: TokenHeader =
            serde_json::from_slice(buf).map_err(|e| json_error("header", &e))?;

        h.validate()?;

        Ok(h)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.alg.is_empty() {
            return Err(Error::Sema("header: empty alg".to_string()));
        }

        if self.crit.is_some() {
            return Err(Error::Sema(
                "header: critical extensions are not supported".to_string(),
            ));
        }

        if let Some(x5c) = &self.x5c {
            if x5c.is_empty() {
                return Err(Error::Sema("header: empty x5c".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_ok() {
        let h = TokenHeader::decode(br#"{"alg":"RS256","kid":"k1","typ":"JWT","x5c":["AAEC"]}"#)
            .unwrap();

        assert_eq!(h.alg, "RS256");
        assert_eq!(h.kid.as_deref(), Some("k1"));
        assert_eq!(h.x5c.unwrap()[0].as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn header_missing_alg() {
        assert!(TokenHeader::decode(br#"{"typ":"JWT"}"#).is_err());
    }

    #[test]
    fn header_dup_alg() {
        assert!(TokenHeader::decode(br#"{"alg":"RS256","alg":"none"}"#).is_err());
    }

    #[test]
    fn header_crit() {
        assert!(TokenHeader::decode(br#"{"alg":"RS256","crit":["exp"]}"#).is_err());
    }

    #[test]
    fn header_bad_x5c() {
        assert!(TokenHeader::decode(br#"{"alg":"RS256","x5c":[]}"#).is_err());
        assert!(TokenHeader::decode(br#"{"alg":"RS256","x5c":["***"]}"#).is_err());
        assert!(TokenHeader::decode(br#"{"alg":"RS256","x5c":"AAEC"}"#).is_err());
    }

    #[test]
    fn header_not_object() {
        assert!(TokenHeader::decode(b"[]").is_err());
        assert!(TokenHeader::decode(b"").is_err());
    }
}
