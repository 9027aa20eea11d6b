// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::common::*;
use super::errors::Error;
use bitmask::*;
use serde::de::{Deserialize, MapAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const ISSUER_LABEL: &str = "iss";
const AUDIENCE_LABEL: &str = "aud";
const ISSUED_AT_LABEL: &str = "iat";
const EXPIRES_AT_LABEL: &str = "exp";
const NOT_BEFORE_LABEL: &str = "nbf";
const NONCE_LABEL: &str = "eat_nonce";
const HWMODEL_LABEL: &str = "hwmodel";
const SECBOOT_LABEL: &str = "secboot";
const DBGSTAT_LABEL: &str = "dbgstat";
const SWNAME_LABEL: &str = "swname";
const SWVERSION_LABEL: &str = "swversion";
const SUBMODS_LABEL: &str = "submods";

const DIGEST_SUFFIX: &str = "digest";

bitmask! {
    #[derive(Debug)]
    mask ClaimsSet: u16 where flags Claims {
        Issuer     = 0x0001,
        Audience   = 0x0002,
        IssuedAt   = 0x0004,
        ExpiresAt  = 0x0008,
        NotBefore  = 0x0010,
        Nonce      = 0x0020,
        HwModel    = 0x0040,
        SecBoot    = 0x0080,
        DbgStat    = 0x0100,
        SwName     = 0x0200,
        SwVersion  = 0x0400,
        Submods    = 0x0800,
    }
}

/// The claims-set of a vTPM attestation token, using the Confidential Space
/// claim names.  Unknown claims are retained verbatim in `extensions`.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenPayload {
    pub issuer: String,                  // iss, text
    pub audience: String,                // aud, text
    pub issued_at: u64,                  // iat, NumericDate
    pub expires_at: u64,                 // exp, NumericDate
    pub not_before: Option<u64>,         // nbf, NumericDate
    pub nonces: Vec<String>,             // eat_nonce, text / [+ text]
    pub hardware_model: String,          // hwmodel, text (e.g. "GCP_AMD_SEV")
    pub secure_boot: bool,               // secboot, bool
    pub debug_status: Option<String>,    // dbgstat, text
    pub software_name: Option<String>,   // swname, text
    pub software_version: Vec<String>,   // swversion, [* text]
    pub submods: BTreeMap<String, Map<String, Value>>, // submods, { * text => {} }
    pub extensions: BTreeMap<String, Value>,
}

impl TokenPayload {
    pub fn new(
        issuer: &str,
        audience: &str,
        issued_at: u64,
        expires_at: u64,
        nonce: &str,
        hardware_model: &str,
        secure_boot: bool,
    ) -> Self {
        Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            issued_at,
            expires_at,
            not_before: None,
            nonces: vec![nonce.to_string()],
            hardware_model: hardware_model.to_string(),
            secure_boot,
            debug_status: None,
            software_name: None,
            software_version: Vec::new(),
            submods: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Decode a JSON encoded claims-set.  Duplicated keys are an error even
    /// though JSON parsers usually let the last one win.
    pub fn decode(buf: &[u8]) -> Result<TokenPayload, Error> {
        let entries: ClaimEntries =
            serde_json::from_slice(buf).map_err(|e| json_error("payload", &e))?;

        let mut d = PayloadDecoder::new();

        d.parse(entries.0)?;
        d.validate()?;

        Ok(d.p)
    }

    /// Software measurements, flattened out of `submods` as
    /// `"<submodule>.<claim>" => digest` for every claim whose name ends in
    /// "digest", e.g. "container.image_digest".
    pub fn measurements(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();

        for (sub, claims) in self.submods.iter() {
            for (k, v) in claims.iter() {
                if let (true, Value::String(d)) = (k.ends_with(DIGEST_SUFFIX), v) {
                    m.insert(format!("{sub}.{k}"), d.clone());
                }
            }
        }

        m
    }

    pub fn has_nonce(&self, nonce: &str) -> bool {
        self.nonces.iter().any(|n| n == nonce)
    }

    /// Render the claims-set as a JSON object
    pub fn to_json(&self) -> Map<String, Value> {
        let mut m = Map::new();

        for (k, v) in self.extensions.iter() {
            m.insert(k.clone(), v.clone());
        }

        m.insert(ISSUER_LABEL.into(), Value::from(self.issuer.as_str()));
        m.insert(AUDIENCE_LABEL.into(), Value::from(self.audience.as_str()));
        m.insert(ISSUED_AT_LABEL.into(), Value::from(self.issued_at));
        m.insert(EXPIRES_AT_LABEL.into(), Value::from(self.expires_at));
        if let Some(nbf) = self.not_before {
            m.insert(NOT_BEFORE_LABEL.into(), Value::from(nbf));
        }
        let nonce = match self.nonces.as_slice() {
            [one] => Value::from(one.as_str()),
            many => Value::from(many.to_vec()),
        };
        m.insert(NONCE_LABEL.into(), nonce);
        m.insert(
            HWMODEL_LABEL.into(),
            Value::from(self.hardware_model.as_str()),
        );
        m.insert(SECBOOT_LABEL.into(), Value::from(self.secure_boot));
        if let Some(x) = &self.debug_status {
            m.insert(DBGSTAT_LABEL.into(), Value::from(x.as_str()));
        }
        if let Some(x) = &self.software_name {
            m.insert(SWNAME_LABEL.into(), Value::from(x.as_str()));
        }
        if !self.software_version.is_empty() {
            m.insert(
                SWVERSION_LABEL.into(),
                Value::from(self.software_version.clone()),
            );
        }
        if !self.submods.is_empty() {
            let s: Map<String, Value> = self
                .submods
                .iter()
                .map(|(k, v)| (k.clone(), Value::Object(v.clone())))
                .collect();
            m.insert(SUBMODS_LABEL.into(), Value::Object(s));
        }

        m
    }
}

impl Serialize for TokenPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

struct PayloadDecoder {
    p: TokenPayload,
    claims_set: ClaimsSet,
}

impl PayloadDecoder {
    fn new() -> Self {
        Self {
            p: TokenPayload::new("", "", 0, 0, "", "", false),
            claims_set: ClaimsSet::none(),
        }
    }

    fn parse(&mut self, contents: Vec<(String, Value)>) -> Result<(), Error> {
        self.p.nonces.clear();

        for (k, v) in contents.iter() {
            match k.as_str() {
                ISSUER_LABEL => self.set_issuer(v)?,
                AUDIENCE_LABEL => self.set_audience(v)?,
                ISSUED_AT_LABEL => self.set_issued_at(v)?,
                EXPIRES_AT_LABEL => self.set_expires_at(v)?,
                NOT_BEFORE_LABEL => self.set_not_before(v)?,
                NONCE_LABEL => self.set_nonce(v)?,
                HWMODEL_LABEL => self.set_hwmodel(v)?,
                SECBOOT_LABEL => self.set_secboot(v)?,
                DBGSTAT_LABEL => self.set_dbgstat(v)?,
                SWNAME_LABEL => self.set_swname(v)?,
                SWVERSION_LABEL => self.set_swversion(v)?,
                SUBMODS_LABEL => self.set_submods(v)?,
                other => self.set_extension(other, v)?,
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        let mandatory_claims = [
            (Claims::Issuer, ISSUER_LABEL),
            (Claims::Audience, AUDIENCE_LABEL),
            (Claims::IssuedAt, ISSUED_AT_LABEL),
            (Claims::ExpiresAt, EXPIRES_AT_LABEL),
            (Claims::Nonce, NONCE_LABEL),
            (Claims::HwModel, HWMODEL_LABEL),
            (Claims::SecBoot, SECBOOT_LABEL),
        ];

        for (c, n) in mandatory_claims.iter() {
            if !self.claims_set.contains(*c) {
                return Err(Error::MissingClaim(n.to_string()));
            }
        }

        if self.p.expires_at <= self.p.issued_at {
            return Err(Error::Sema(format!(
                "{EXPIRES_AT_LABEL} MUST be later than {ISSUED_AT_LABEL}"
            )));
        }

        Ok(())
    }

    fn claim(&mut self, c: Claims, n: &str) -> Result<(), Error> {
        if self.claims_set.contains(c) {
            return Err(Error::DuplicatedClaim(n.to_string()));
        }

        self.claims_set.set(c);

        Ok(())
    }

    fn set_issuer(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::Issuer, ISSUER_LABEL)?;

        let x = to_tstr(v, ISSUER_LABEL)?;

        if x.is_empty() {
            return Err(Error::Sema(format!("{ISSUER_LABEL}: empty")));
        }

        self.p.issuer = x;

        Ok(())
    }

    fn set_audience(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::Audience, AUDIENCE_LABEL)?;

        let x = to_tstr(v, AUDIENCE_LABEL)?;

        if x.is_empty() {
            return Err(Error::Sema(format!("{AUDIENCE_LABEL}: empty")));
        }

        self.p.audience = x;

        Ok(())
    }

    fn set_issued_at(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::IssuedAt, ISSUED_AT_LABEL)?;

        self.p.issued_at = to_numeric_date(v, ISSUED_AT_LABEL)?;

        Ok(())
    }

    fn set_expires_at(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::ExpiresAt, EXPIRES_AT_LABEL)?;

        self.p.expires_at = to_numeric_date(v, EXPIRES_AT_LABEL)?;

        Ok(())
    }

    fn set_not_before(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::NotBefore, NOT_BEFORE_LABEL)?;

        self.p.not_before = Some(to_numeric_date(v, NOT_BEFORE_LABEL)?);

        Ok(())
    }

    fn set_nonce(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::Nonce, NONCE_LABEL)?;

        let x = to_tstr_or_array(v, NONCE_LABEL)?;

        if x.iter().any(|n| n.is_empty()) {
            return Err(Error::Sema(format!("{NONCE_LABEL}: empty nonce")));
        }

        self.p.nonces = x;

        Ok(())
    }

    fn set_hwmodel(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::HwModel, HWMODEL_LABEL)?;

        let x = to_tstr(v, HWMODEL_LABEL)?;

        if x.is_empty() {
            return Err(Error::Sema(format!("{HWMODEL_LABEL}: empty")));
        }

        self.p.hardware_model = x;

        Ok(())
    }

    fn set_secboot(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::SecBoot, SECBOOT_LABEL)?;

        self.p.secure_boot = to_bool(v, SECBOOT_LABEL)?;

        Ok(())
    }

    fn set_dbgstat(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::DbgStat, DBGSTAT_LABEL)?;

        self.p.debug_status = Some(to_tstr(v, DBGSTAT_LABEL)?);

        Ok(())
    }

    fn set_swname(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::SwName, SWNAME_LABEL)?;

        self.p.software_name = Some(to_tstr(v, SWNAME_LABEL)?);

        Ok(())
    }

    fn set_swversion(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::SwVersion, SWVERSION_LABEL)?;

        self.p.software_version = to_tstr_array(v, SWVERSION_LABEL)?;

        Ok(())
    }

    fn set_submods(&mut self, v: &Value) -> Result<(), Error> {
        self.claim(Claims::Submods, SUBMODS_LABEL)?;

        let x = v
            .as_object()
            .ok_or_else(|| Error::TypeMismatch(format!("{SUBMODS_LABEL} MUST be object")))?;

        for (name, sub) in x.iter() {
            let claims = sub.as_object().ok_or_else(|| {
                Error::TypeMismatch(format!("{SUBMODS_LABEL}.{name} MUST be object"))
            })?;

            for (k, d) in claims.iter() {
                if k.ends_with(DIGEST_SUFFIX) {
                    to_tstr(d, &format!("{SUBMODS_LABEL}.{name}.{k}"))?;
                }
            }

            self.p.submods.insert(name.clone(), claims.clone());
        }

        Ok(())
    }

    fn set_extension(&mut self, k: &str, v: &Value) -> Result<(), Error> {
        if self.p.extensions.insert(k.to_string(), v.clone()).is_some() {
            return Err(Error::DuplicatedClaim(k.to_string()));
        }

        Ok(())
    }
}

/// Top-level members of a JSON object in document order, duplicates included
struct ClaimEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for ClaimEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ClaimEntriesVisitor {})
    }
}

struct ClaimEntriesVisitor;

impl<'de> Visitor<'de> for ClaimEntriesVisitor {
    type Value = ClaimEntries;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut v = Vec::with_capacity(access.size_hint().unwrap_or(16));

        while let Some((k, x)) = access.next_entry::<String, Value>()? {
            v.push((k, x));
        }

        Ok(ClaimEntries(v))
    }
}
