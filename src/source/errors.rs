// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

#[derive(thiserror::Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Attestation source unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid token request: {0}")]
    InvalidRequest(String),
}

impl std::fmt::Debug for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(e) | SourceError::InvalidRequest(e) => {
                write!(f, "{}", e)
            }
        }
    }
}
