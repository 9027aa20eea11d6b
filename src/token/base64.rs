// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use base64::{self, engine::general_purpose, Engine as _};
use serde::{
    de::{self, Deserialize, Visitor},
    ser::{Serialize, Serializer},
};

use super::errors::Error;

/// decodes one unpadded base64url token segment
pub fn decode_segment(v: &str, what: &str) -> Result<Vec<u8>, Error> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(v)
        .map_err(|_| Error::Syntax(format!("{what}: invalid base64url")))
}

/// encodes bytes as one unpadded base64url token segment
pub fn encode_segment(v: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(v)
}

/// A DER certificate carried in an `x5c` header entry.  RFC 7515 §4.1.6 uses
/// standard (padded, non URL-safe) base64 for these, unlike the token
/// segments themselves.
#[derive(Clone, PartialEq, Eq)]
pub struct Der(Vec<u8>);

impl Der {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Debug for Der {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Der({} bytes)", self.0.len())
    }
}

impl From<&[u8]> for Der {
    fn from(v: &[u8]) -> Self {
        Self(v.to_owned())
    }
}

impl From<Vec<u8>> for Der {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl TryFrom<&str> for Der {
    type Error = Error;

    fn try_from(v: &str) -> Result<Self, Error> {
        general_purpose::STANDARD
            .decode(v)
            .map(Der)
            .map_err(|_| Error::Syntax("x5c: invalid base64".to_string()))
    }
}

impl Serialize for Der {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&base64::display::Base64Display::new(
            &self.0,
            &general_purpose::STANDARD,
        ))
    }
}

impl<'de> Deserialize<'de> for Der {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(DerVisitor {})
    }
}

struct DerVisitor;

impl<'de> Visitor<'de> for DerVisitor {
    type Value = Der;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a base64 encoded DER certificate")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Der::try_from(v).map_err(de::Error::custom)
    }
}
