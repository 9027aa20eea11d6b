// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use serde_json::Value;

/// Confidential Space accepts nonces of 10 to 74 bytes; we additionally
/// require 16 bytes so that a random nonce carries at least 128 bits.
pub const MIN_NONCE_LEN: usize = 16;
pub const MAX_NONCE_LEN: usize = 74;

pub fn is_valid_nonce(value: &str) -> bool {
    (MIN_NONCE_LEN..=MAX_NONCE_LEN).contains(&value.len())
}

// NumericDate, see RFC 7519 §2
pub fn to_numeric_date(v: &Value, n: &str) -> Result<u64, Error> {
    match v {
        Value::Number(x) => x
            .as_u64()
            .ok_or_else(|| Error::Sema(format!("{n}: expecting non-negative integer"))),
        _ => Err(Error::TypeMismatch(format!("{n} MUST be integer"))),
    }
}

pub fn to_tstr(v: &Value, n: &str) -> Result<String, Error> {
    match v {
        Value::String(x) => Ok(x.clone()),
        _ => Err(Error::TypeMismatch(format!("{n} MUST be text"))),
    }
}

pub fn to_bool(v: &Value, n: &str) -> Result<bool, Error> {
    match v {
        Value::Bool(x) => Ok(*x),
        _ => Err(Error::TypeMismatch(format!("{n} MUST be bool"))),
    }
}

pub fn to_tstr_array(v: &Value, n: &str) -> Result<Vec<String>, Error> {
    let x = v
        .as_array()
        .ok_or_else(|| Error::TypeMismatch(format!("{n} MUST be array")))?;

    x.iter()
        .enumerate()
        .map(|(i, xi)| to_tstr(xi, &format!("{n}[{i}]")))
        .collect()
}

/// Describe a JSON decoding failure by position only, serde_json messages
/// may quote the offending value.
pub(crate) fn json_error(what: &str, e: &serde_json::Error) -> Error {
    Error::Syntax(format!(
        "{what}: {:?} error at line {} column {}",
        e.classify(),
        e.line(),
        e.column()
    ))
}

/// A claim that may be carried either as a single text string or as an array
/// of text strings (e.g., `eat_nonce`).  Never empty.
pub fn to_tstr_or_array(v: &Value, n: &str) -> Result<Vec<String>, Error> {
    let x = match v {
        Value::String(s) => vec![s.clone()],
        Value::Array(_) => to_tstr_array(v, n)?,
        _ => {
            return Err(Error::TypeMismatch(format!(
                "{n} MUST be text or array of text"
            )))
        }
    };

    if x.is_empty() {
        return Err(Error::Sema(format!("{n}: expecting at least one entry")));
    }

    Ok(x)
}
